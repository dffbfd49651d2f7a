//! Partition discovery via catalog inheritance and naming convention.
//!
//! Both legacy (trigger-based) and declarative partitioned tables register
//! their children in `pg_inherits`, covering the common case. Tables that
//! match the `<parent>_<datepat>` naming convention but were never attached
//! via inheritance are discovered separately by a `LIKE` scan, and the two
//! sets are unioned.

use crate::error::ArchiverError;
use crate::partition::{parse_partition_date, Partition};
use deadpool_postgres::Object as Client;
use tracing::{debug, warn};

const CHILD_QUERY: &str = "
    SELECT c.relname
    FROM pg_inherits i
    JOIN pg_class c ON c.oid = i.inhrelid
    JOIN pg_class p ON p.oid = i.inhparent
    JOIN pg_namespace n ON n.oid = p.relnamespace
    WHERE p.relname = $1 AND n.nspname = current_schema()
      AND NOT EXISTS (
          SELECT 1 FROM pg_inherits i2 WHERE i2.inhparent = c.oid
      )
    ORDER BY c.relname
";

const NAME_PATTERN_QUERY: &str = "
    SELECT c.relname
    FROM pg_class c
    JOIN pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = current_schema()
      AND c.relkind IN ('r', 'p')
      AND c.relname LIKE $1 ESCAPE '\\'
      AND c.relname <> $2
    ORDER BY c.relname
";

/// Escape `_` and `%` so they're matched literally rather than as LIKE
/// wildcards, then append the wildcard suffix that stands for the date
/// part of `<parent>_<datepat>`.
fn name_pattern_for(table: &str) -> String {
    let escaped = table.replace('\\', "\\\\").replace('_', "\\_").replace('%', "\\%");
    format!("{escaped}\\_%")
}

/// Enumerate the leaf children of `table` (those with no further
/// `pg_inherits` children of their own, so intermediate partitioned nodes
/// don't get treated as leaves) unioned with tables matching the
/// `<parent>_<datepat>` naming convention that aren't registered via
/// inheritance at all, and parse a date out of each name. Names that don't
/// match a known date pattern are logged and skipped rather than aborting
/// the whole discovery step.
pub async fn discover_partitions(client: &Client, table: &str) -> Result<Vec<Partition>, ArchiverError> {
    let inherited = client
        .query(CHILD_QUERY, &[&table])
        .await
        .map_err(|e| ArchiverError::Discovery(e.into()))?;

    let pattern = name_pattern_for(table);
    let name_matched = client
        .query(NAME_PATTERN_QUERY, &[&pattern, &table])
        .await
        .map_err(|e| ArchiverError::Discovery(e.into()))?;

    if inherited.is_empty() && name_matched.is_empty() {
        debug!(table, "no child partitions found via pg_inherits or naming convention");
    }

    let mut seen = std::collections::HashSet::new();
    let mut partitions = Vec::with_capacity(inherited.len() + name_matched.len());
    for row in inherited.into_iter().chain(name_matched) {
        let name: String = row.get(0);
        if !seen.insert(name.clone()) {
            continue;
        }
        match parse_partition_date(&name) {
            Some(date) => partitions.push(Partition::physical(name, date)),
            None => warn!(partition = %name, "skipping partition with unparseable name"),
        }
    }
    partitions.sort_by_key(|p| p.parsed_date);
    Ok(partitions)
}

/// Returns true if `table` is itself a partitioned (declarative) parent,
/// i.e. has entries in `pg_partitioned_table`.
pub async fn is_partitioned_parent(client: &Client, table: &str) -> Result<bool, ArchiverError> {
    let row = client
        .query_opt(
            "SELECT 1 FROM pg_partitioned_table pt
             JOIN pg_class c ON c.oid = pt.partrelid
             WHERE c.relname = $1",
            &[&table],
        )
        .await
        .map_err(|e| ArchiverError::Discovery(e.into()))?;
    Ok(row.is_some())
}
