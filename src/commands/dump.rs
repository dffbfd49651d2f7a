use crate::archiver::{self, ProcessResult};
use crate::cache::RowCountCache;
use crate::config::{ArchiveJob, DumpMode};
use crate::db;
use crate::native_dump;
use crate::objectstore::ObjectStoreClient;
use anyhow::{bail, Result};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Run a native-dump job directly (outside the streaming archiver), used
/// for schema-only exports and whole-relation dumps via `pg_dump`. `Hybrid`
/// mode dumps the schema natively but streams row data through the same
/// pipeline `archive` uses, rather than through a second `pg_dump` process.
pub async fn handle_dump(job: ArchiveJob) -> Result<Vec<String>> {
    job.validate()?;
    if matches!(job.dump_mode, DumpMode::Streaming) {
        bail!("dump-mode 'streaming' only applies to the `archive` command");
    }

    let pool = db::build_pool(&job.db, job.workers.max(1))?;
    let client = db::get_client(&pool).await?;
    let store = ObjectStoreClient::new(&job.object_store)?;

    let mut keys = Vec::new();
    if matches!(job.dump_mode, DumpMode::SchemaOnly | DumpMode::SchemaAndData | DumpMode::Hybrid) {
        keys.push(native_dump::dump_schema_only(&job, &store).await?);
    }

    if matches!(job.dump_mode, DumpMode::SchemaOnly) {
        return Ok(keys);
    }

    let partitions = crate::db::catalog::discover_partitions(&client, &job.table).await?;

    if matches!(job.dump_mode, DumpMode::Hybrid) {
        let cache = RowCountCache::open(&job.table)?;
        let cancel = CancellationToken::new();
        for partition in &partitions {
            match archiver::archive_partition(&client, &job, &store, &cache, partition, &cancel).await {
                ProcessResult::Uploaded { key, .. } => keys.push(key),
                ProcessResult::SkippedExisting { key, .. } => keys.push(key),
                ProcessResult::SkippedEmpty { .. } => {}
                ProcessResult::Failed { partition, error } => {
                    warn!(partition = %partition, "hybrid dump: partition failed: {}", error);
                    return Err(error.into());
                }
            }
        }
        return Ok(keys);
    }

    let groups = native_dump::group_partitions_by_slice(&partitions, job.output_duration);
    for (idx, (slice, members)) in groups.iter().enumerate() {
        if let Some(key) = native_dump::dump_slice(&client, &job, &store, slice, members, idx).await? {
            keys.push(key);
        }
    }
    Ok(keys)
}
