//! Native-dump archiver: shells out to `pg_dump` rather than streaming rows
//! through our own row writer. Used for schema-only dumps, and for two
//! per-window sub-modes: grouped-by-date (physical partitions dumped
//! directly, one `pg_dump` invocation per slice) and date-column windowing
//! (an unlogged staging table populated by a bounded `SELECT`, used when
//! the target has no physical partitions to dump from).

use crate::config::{ArchiveJob, DumpMode};
use crate::error::ArchiverError;
use crate::objectstore::ObjectStoreClient;
use crate::partition::Partition;
use crate::path_template::schema_only_object_key;
use crate::slice::{OutputDuration, Slice};
use chrono::{DateTime, Utc};
use deadpool_postgres::Object as Client;
use tokio::process::Command;
use tracing::info;

/// Dump only the schema of `table` (no rows) via `pg_dump --schema-only`.
pub async fn dump_schema_only(
    job: &ArchiveJob,
    store: &ObjectStoreClient,
) -> Result<String, ArchiverError> {
    let key = schema_only_object_key(&job.path_template, &job.table);
    let tmp = tempfile::NamedTempFile::new().map_err(|e| ArchiverError::Extraction {
        partition: job.table.clone(),
        source: e.into(),
    })?;

    run_pg_dump(job, &["--schema-only", "--table", &job.table], tmp.path()).await?;
    store.put_multipart_from_path(&key, tmp.path()).await?;
    info!(table = %job.table, %key, "uploaded schema-only dump");
    Ok(key)
}

/// Group partitions by the slice their `parsed_date` falls into. Partitions
/// are expected to already be sorted by date (as `catalog::discover_partitions`
/// returns them), so a linear scan with a running "current group" is enough.
pub fn group_partitions_by_slice(partitions: &[Partition], duration: OutputDuration) -> Vec<(Slice, Vec<Partition>)> {
    let mut groups: Vec<(Slice, Vec<Partition>)> = Vec::new();
    for partition in partitions {
        let slice = Slice::containing(partition.parsed_date, duration);
        match groups.last_mut() {
            Some((current, members)) if *current == slice => members.push(partition.clone()),
            _ => groups.push((slice, vec![partition.clone()])),
        }
    }
    groups
}

/// Dump one slice's worth of partitions to a single artifact. For physical
/// partitions this is a direct `pg_dump` naming every member with its own
/// `--table` flag (no staging relation, per the grouped-by-date sub-mode);
/// for the synthesized virtual partition used in date-column windowing mode
/// it instead builds a bounded staging table first. Returns `None` when a
/// date-column window turned out to be empty (staging dropped, nothing to
/// upload).
pub async fn dump_slice(
    client: &Client,
    job: &ArchiveJob,
    store: &ObjectStoreClient,
    slice: &Slice,
    partitions: &[Partition],
    staging_idx: usize,
) -> Result<Option<String>, ArchiverError> {
    let physical: Vec<&str> = partitions.iter().filter(|p| !p.is_virtual()).map(|p| p.name.as_str()).collect();
    if !physical.is_empty() {
        return dump_relations_to_slice(job, store, slice, &physical).await.map(Some);
    }

    let partition = partitions.first().ok_or_else(|| ArchiverError::Extraction {
        partition: job.table.clone(),
        source: anyhow::anyhow!("empty slice group passed to dump_slice"),
    })?;
    let (start, end) = partition.range.ok_or_else(|| ArchiverError::Configuration {
        field: "date_column".to_string(),
        message: "date-column windowing requires the virtual partition to carry a range".to_string(),
    })?;

    let staging_name = staging_table_name(&job.table, slice.start, staging_idx);
    if !create_staging_table(client, job, &staging_name, start, end).await? {
        return Ok(None);
    }

    let result = dump_relations_to_slice(job, store, slice, &[staging_name.as_str()]).await;
    drop_staging_relation(client, &staging_name).await?;
    result.map(Some)
}

/// Deterministic staging name: `_archiver_<table>_<yyyymmdd>_<idx>`,
/// truncated to Postgres's 63-byte identifier limit.
fn staging_table_name(table: &str, at: DateTime<Utc>, idx: usize) -> String {
    let name = format!("_archiver_{}_{}_{}", sanitize(table), at.format("%Y%m%d"), idx);
    name.chars().take(63).collect()
}

/// Populate an unlogged staging table with `SELECT * FROM <table> WHERE
/// <date_column> >= $1 AND <date_column> < $2`, bounds bound as parameters.
/// Returns `false` (staging already dropped) if the window is empty.
async fn create_staging_table(
    client: &Client,
    job: &ArchiveJob,
    staging_name: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<bool, ArchiverError> {
    let date_column = job.date_column.as_deref().ok_or_else(|| ArchiverError::Configuration {
        field: "date_column".to_string(),
        message: "date-column windowing requires a date column".to_string(),
    })?;

    // A previous crashed run may have left a same-named staging table behind.
    drop_staging_relation(client, staging_name).await?;

    let sql = format!(
        "CREATE UNLOGGED TABLE \"{staging_name}\" AS SELECT * FROM \"{}\" WHERE \"{date_column}\" >= $1 AND \"{date_column}\" < $2",
        job.table
    );
    client.execute(&sql, &[&start, &end]).await.map_err(|e| ArchiverError::Extraction {
        partition: staging_name.to_string(),
        source: e.into(),
    })?;

    let count_row = client
        .query_one(&format!("SELECT COUNT(*) FROM \"{staging_name}\""), &[])
        .await
        .map_err(|e| ArchiverError::Extraction {
            partition: staging_name.to_string(),
            source: e.into(),
        })?;
    let count: i64 = count_row.get(0);
    if count == 0 {
        drop_staging_relation(client, staging_name).await?;
        return Ok(false);
    }
    Ok(true)
}

async fn drop_staging_relation(client: &Client, staging_name: &str) -> Result<(), ArchiverError> {
    let sql = format!("DROP TABLE IF EXISTS \"{staging_name}\"");
    client
        .batch_execute(&sql)
        .await
        .map_err(|e| ArchiverError::Extraction {
            partition: staging_name.to_string(),
            source: e.into(),
        })
}

/// Dump one or more relations into a single artifact keyed by the slice
/// start (one `--table` flag per relation), so a slice that groups several
/// partitions still produces exactly one object.
async fn dump_relations_to_slice(
    job: &ArchiveJob,
    store: &ObjectStoreClient,
    slice: &Slice,
    relations: &[&str],
) -> Result<String, ArchiverError> {
    let key = crate::path_template::object_key(&job.path_template, &job.table, slice.start, job.output_duration);
    let tmp = tempfile::NamedTempFile::new().map_err(|e| ArchiverError::Extraction {
        partition: job.table.clone(),
        source: e.into(),
    })?;

    let mode_flags: &[&str] = match job.dump_mode {
        DumpMode::SchemaOnly => &["--schema-only"],
        DumpMode::DataOnly => &["--data-only"],
        _ => &[],
    };
    let mut args: Vec<&str> = Vec::with_capacity(relations.len() * 2 + mode_flags.len());
    for relation in relations {
        args.push("--table");
        args.push(relation);
    }
    args.extend_from_slice(mode_flags);
    run_pg_dump(job, &args, tmp.path()).await?;

    store.put_multipart_from_path(&key, tmp.path()).await?;
    info!(%key, tables = relations.len(), "uploaded grouped native dump");
    Ok(key)
}

async fn run_pg_dump(
    job: &ArchiveJob,
    extra_args: &[&str],
    output_path: &std::path::Path,
) -> Result<(), ArchiverError> {
    let mut command = Command::new("pg_dump");
    command
        .arg("--host")
        .arg(&job.db.host)
        .arg("--port")
        .arg(job.db.port.to_string())
        .arg("--username")
        .arg(&job.db.user)
        .arg("--dbname")
        .arg(&job.db.database)
        .arg("--format=custom")
        .arg("--file")
        .arg(output_path)
        .args(extra_args)
        .env("PGPASSWORD", &job.db.password);

    let status = command.status().await.map_err(|e| ArchiverError::Extraction {
        partition: job.table.clone(),
        source: e.into(),
    })?;

    if !status.success() {
        return Err(ArchiverError::Extraction {
            partition: job.table.clone(),
            source: anyhow::anyhow!("pg_dump exited with {status}"),
        });
    }
    Ok(())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn sanitize_replaces_non_identifier_characters() {
        assert_eq!(sanitize("events_2024-01-03"), "events_2024_01_03");
        assert_eq!(sanitize("events_20240103"), "events_20240103");
    }

    #[test]
    fn staging_name_is_deterministic_and_bounded() {
        let date = chrono::TimeZone::from_utc_datetime(
            &Utc,
            &NaiveDate::from_ymd_opt(2024, 1, 3).unwrap().and_hms_opt(0, 0, 0).unwrap(),
        );
        let name = staging_table_name("events", date, 0);
        assert_eq!(name, "_archiver_events_20240103_0");
        assert!(name.len() <= 63);
    }

    #[test]
    fn groups_partitions_sharing_a_slice() {
        let p = |name: &str, y, m, d| Partition::physical(name.to_string(), NaiveDate::from_ymd_opt(y, m, d).unwrap());
        let partitions = vec![
            p("events_20240101", 2024, 1, 1),
            p("events_20240102", 2024, 1, 2),
            p("events_20240201", 2024, 2, 1),
        ];
        let groups = group_partitions_by_slice(&partitions, OutputDuration::Monthly);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].1.len(), 1);
    }
}
