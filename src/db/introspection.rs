//! Privilege and schema checks performed before a partition is touched.

use crate::error::ArchiverError;
use deadpool_postgres::Object as Client;

/// Returns true if the current role has `SELECT` on `table`.
pub async fn has_select_privilege(client: &Client, table: &str) -> Result<bool, ArchiverError> {
    let row = client
        .query_one("SELECT has_table_privilege(current_user, $1, 'SELECT')", &[&table])
        .await
        .map_err(|e| ArchiverError::Privileges {
            object: table.to_string(),
            reason: e.to_string(),
        })?;
    Ok(row.get(0))
}

/// Returns true if `column` exists on `table` in the current schema.
pub async fn has_column(client: &Client, table: &str, column: &str) -> Result<bool, ArchiverError> {
    let row = client
        .query_opt(
            "SELECT 1 FROM information_schema.columns
             WHERE table_schema = current_schema() AND table_name = $1 AND column_name = $2",
            &[&table, &column],
        )
        .await
        .map_err(|e| ArchiverError::Discovery(e.into()))?;
    Ok(row.is_some())
}

/// Returns true if `table` has at least one column in the current schema.
/// Part of the discovery-set definition alongside `has_select_privilege`:
/// a table with zero columns (e.g. a stub inheriting nothing real) is
/// excluded the same way a table lacking `SELECT` is.
pub async fn has_any_columns(client: &Client, table: &str) -> Result<bool, ArchiverError> {
    let row = client
        .query_opt(
            "SELECT 1 FROM information_schema.columns
             WHERE table_schema = current_schema() AND table_name = $1
             LIMIT 1",
            &[&table],
        )
        .await
        .map_err(|e| ArchiverError::Discovery(e.into()))?;
    Ok(row.is_some())
}

/// Exact row count for a single partition, using a plain `COUNT(*)`. The
/// caller is expected to consult the row-count cache first; this is only
/// reached on a cache miss.
pub async fn count_rows(client: &Client, table: &str) -> Result<i64, ArchiverError> {
    let quoted = format!("\"{table}\"");
    let row = client
        .query_one(&format!("SELECT COUNT(*) FROM {quoted}"), &[])
        .await
        .map_err(|e| ArchiverError::Extraction {
            partition: table.to_string(),
            source: e.into(),
        })?;
    Ok(row.get(0))
}

/// Row count for a date-column window `[start, end)`, used in date-column
/// windowing mode where there is no physical partition to count directly.
pub async fn count_rows_in_window(
    client: &Client,
    table: &str,
    date_column: &str,
    start: chrono::DateTime<chrono::Utc>,
    end: chrono::DateTime<chrono::Utc>,
) -> Result<i64, ArchiverError> {
    let quoted_table = format!("\"{table}\"");
    let quoted_column = format!("\"{date_column}\"");
    let query = format!(
        "SELECT COUNT(*) FROM {quoted_table} WHERE {quoted_column} >= $1 AND {quoted_column} < $2"
    );
    let row = client
        .query_one(&query, &[&start, &end])
        .await
        .map_err(|e| ArchiverError::Extraction {
            partition: table.to_string(),
            source: e.into(),
        })?;
    Ok(row.get(0))
}
