//! Run orchestration: phase machine, bounded worker pool, and cancellation
//! wiring for a single archive job.

use crate::archiver::{self, ProcessResult};
use crate::cache::RowCountCache;
use crate::config::{ArchiveJob, DumpMode};
use crate::db::{self, catalog, introspection};
use crate::error::ArchiverError;
use crate::objectstore::ObjectStoreClient;
use crate::partition::Partition;
use crate::progress::{Phase, ProgressBus, ProgressEvent};
use metrics::gauge;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

#[derive(Debug, Default)]
pub struct RunSummary {
    pub uploaded: Vec<(String, String)>,
    pub skipped_existing: Vec<String>,
    pub skipped_empty: Vec<String>,
    pub failed: Vec<(String, ArchiverError)>,
    pub cancelled: bool,
    pub fatal: Option<ArchiverError>,
}

impl RunSummary {
    /// Exit code semantics: 0 on a clean run, 130 if cancellation was the
    /// reason processing stopped, 1 for any other failure.
    pub fn exit_code(&self) -> i32 {
        if self.cancelled {
            130
        } else if self.fatal.is_some() || !self.failed.is_empty() {
            1
        } else {
            0
        }
    }
}

pub async fn run(job: &ArchiveJob, bus: Arc<ProgressBus>, cancel: CancellationToken) -> RunSummary {
    match run_inner(job, &bus, &cancel).await {
        Ok(summary) => summary,
        Err(error) => {
            error!("run aborted: {}", error);
            bus.publish(ProgressEvent::Message {
                text: format!("run aborted: {error}"),
            })
            .await;
            RunSummary {
                fatal: Some(error),
                ..Default::default()
            }
        }
    }
}

async fn run_inner(
    job: &ArchiveJob,
    bus: &ProgressBus,
    cancel: &CancellationToken,
) -> Result<RunSummary, ArchiverError> {
    job.validate()?;

    bus.publish(ProgressEvent::PhaseChanged { phase: Phase::Connecting }).await;
    let pool = db::build_pool(&job.db, job.workers)?;
    let client = db::get_client(&pool).await?;

    bus.publish(ProgressEvent::PhaseChanged { phase: Phase::CheckingPermissions }).await;
    if !introspection::has_select_privilege(&client, &job.table).await? {
        return Err(ArchiverError::Privileges {
            object: job.table.clone(),
            reason: "missing SELECT privilege".to_string(),
        });
    }
    if let Some(col) = &job.date_column
        && !introspection::has_column(&client, &job.table, col).await?
    {
        return Err(ArchiverError::Configuration {
            field: "date_column".to_string(),
            message: format!("column '{col}' does not exist on '{}'", job.table),
        });
    }

    bus.publish(ProgressEvent::PhaseChanged { phase: Phase::Discovering }).await;
    let discover_started = Instant::now();
    let discovered = discover(&client, job).await?;
    let (partitions, privilege_failures) = filter_by_privilege(&client, discovered).await;
    metrics::histogram!("orchestrator.discovery_duration_ms")
        .record(discover_started.elapsed().as_millis() as f64);
    gauge!("orchestrator.partitions_found").set(partitions.len() as f64);
    bus.publish(ProgressEvent::PartitionsFound { count: partitions.len() }).await;

    if matches!(job.dump_mode, DumpMode::SchemaOnly | DumpMode::SchemaAndData) {
        let store = ObjectStoreClient::new(&job.object_store)?;
        crate::native_dump::dump_schema_only(job, &store).await?;
    }

    bus.publish(ProgressEvent::PhaseChanged { phase: Phase::Counting }).await;
    if !job.skip_count {
        for partition in &partitions {
            let count = introspection::count_rows(&client, &partition.name).await.unwrap_or(0);
            bus.publish(ProgressEvent::TableCounted {
                table: partition.name.clone(),
                row_count: count,
            })
            .await;
        }
    }

    bus.publish(ProgressEvent::PhaseChanged { phase: Phase::Processing }).await;
    let mut summary = process_partitions(&pool, job, &partitions, bus, cancel).await?;
    summary.failed.extend(privilege_failures);

    bus.publish(ProgressEvent::PhaseChanged { phase: Phase::Complete }).await;
    Ok(summary)
}

/// Drop partitions that fail either half of the discovery-set AND
/// condition the current role can't `SELECT` from, or that have no
/// columns at all — from the set that will be processed, logging a
/// warning for each; they're still reported as failures in the final
/// summary rather than silently disappearing.
async fn filter_by_privilege(
    client: &deadpool_postgres::Object,
    partitions: Vec<Partition>,
) -> (Vec<Partition>, Vec<(String, ArchiverError)>) {
    let mut kept = Vec::with_capacity(partitions.len());
    let mut failed = Vec::new();
    for partition in partitions {
        match introspection::has_select_privilege(client, &partition.name).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(partition = %partition.name, "excluding partition from discovery: missing SELECT privilege");
                failed.push((
                    partition.name.clone(),
                    ArchiverError::Privileges {
                        object: partition.name,
                        reason: "missing SELECT privilege".to_string(),
                    },
                ));
                continue;
            }
            Err(e) => {
                warn!(partition = %partition.name, "privilege check failed, keeping partition: {}", e);
                kept.push(partition);
                continue;
            }
        }

        match introspection::has_any_columns(client, &partition.name).await {
            Ok(true) => kept.push(partition),
            Ok(false) => {
                warn!(partition = %partition.name, "excluding partition from discovery: no columns");
                failed.push((
                    partition.name.clone(),
                    ArchiverError::Discovery(anyhow::anyhow!("'{}' has no columns", partition.name)),
                ));
            }
            Err(e) => {
                warn!(partition = %partition.name, "column check failed, keeping partition: {}", e);
                kept.push(partition);
            }
        }
    }
    (kept, failed)
}

async fn discover(client: &deadpool_postgres::Object, job: &ArchiveJob) -> Result<Vec<Partition>, ArchiverError> {
    if job.date_column.is_some() && !catalog::is_partitioned_parent(client, &job.table).await? {
        // Date-column windowing mode: synthesize one virtual partition per
        // output-duration slice across the requested date range.
        let start = job.start_date.ok_or_else(|| ArchiverError::Configuration {
            field: "start_date".to_string(),
            message: "start_date is required in date-column windowing mode".to_string(),
        })?;
        let end = job.end_date.unwrap_or_else(|| chrono::Utc::now().date_naive());
        let slices = crate::slice::slices_for_range(start, end, job.output_duration);
        return Ok(slices
            .into_iter()
            .map(|s| Partition::virtual_partition(job.table.clone(), s.start, s.next))
            .collect());
    }

    let mut partitions = catalog::discover_partitions(client, &job.table).await?;

    if partitions.is_empty() && job.include_non_partition_tables {
        // No pg_inherits children. With a date column, slice the table into
        // windows the same way date-column mode does above; without one,
        // there's no way to window it, so archive the whole table as a
        // single partition.
        let today = chrono::Utc::now().date_naive();
        return Ok(match &job.date_column {
            Some(_) => {
                let start = job.start_date.unwrap_or(today);
                let end = job.end_date.unwrap_or(start);
                crate::slice::slices_for_range(start, end, job.output_duration)
                    .into_iter()
                    .map(|s| Partition::virtual_partition(job.table.clone(), s.start, s.next))
                    .collect()
            }
            None => vec![Partition::physical(job.table.clone(), job.start_date.unwrap_or(today))],
        });
    }

    partitions.retain(|p| {
        job.start_date.is_none_or(|start| p.parsed_date >= start)
            && job.end_date.is_none_or(|end| p.parsed_date <= end)
    });
    Ok(partitions)
}

async fn process_partitions(
    pool: &db::PgPool,
    job: &ArchiveJob,
    partitions: &[Partition],
    bus: &ProgressBus,
    cancel: &CancellationToken,
) -> Result<RunSummary, ArchiverError> {
    let store = Arc::new(ObjectStoreClient::new(&job.object_store)?);
    let cache = Arc::new(RowCountCache::open(&job.table).map_err(ArchiverError::CacheIo)?);
    let semaphore = Arc::new(Semaphore::new(job.workers.max(1)));

    let mut handles = Vec::with_capacity(partitions.len());
    for partition in partitions {
        let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
        let pool = pool.clone();
        let job = job.clone();
        let store = store.clone();
        let cache = cache.clone();
        let partition = partition.clone();
        let cancel = cancel.clone();

        handles.push(tokio::spawn(async move {
            let _permit = permit;
            let client = match db::get_client(&pool).await {
                Ok(c) => c,
                Err(e) => return ProcessResult::Failed { partition: partition.name, error: e },
            };
            archiver::archive_partition(&client, &job, &store, &cache, &partition, &cancel).await
        }));
    }

    let mut summary = RunSummary::default();
    for handle in handles {
        match handle.await {
            Ok(ProcessResult::Uploaded { partition, key, rows, .. }) => {
                bus.publish(ProgressEvent::PartitionComplete { partition: partition.clone(), rows_written: rows }).await;
                summary.uploaded.push((partition, key));
            }
            Ok(ProcessResult::SkippedExisting { partition, key }) => {
                summary.skipped_existing.push(partition);
                let _ = key;
            }
            Ok(ProcessResult::SkippedEmpty { partition }) => {
                summary.skipped_empty.push(partition);
            }
            Ok(ProcessResult::Failed { partition, error }) => {
                if matches!(error, ArchiverError::Cancelled) {
                    summary.cancelled = true;
                } else {
                    bus.publish(ProgressEvent::PartitionFailed {
                        partition: partition.clone(),
                        phase_tag: error.phase_tag().to_string(),
                        message: error.to_string(),
                    })
                    .await;
                    warn!(partition = %partition, "partition archival failed: {}", error);
                }
                summary.failed.push((partition, error));
            }
            Err(join_error) => {
                error!("worker task panicked: {}", join_error);
            }
        }
    }
    if cancel.is_cancelled() {
        summary.cancelled = true;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_run_exits_zero() {
        let summary = RunSummary::default();
        assert_eq!(summary.exit_code(), 0);
    }

    #[test]
    fn cancellation_exits_130_even_with_failures() {
        let summary = RunSummary {
            cancelled: true,
            failed: vec![("events_20240101".to_string(), ArchiverError::Cancelled)],
            ..Default::default()
        };
        assert_eq!(summary.exit_code(), 130);
    }

    #[test]
    fn any_failure_exits_one() {
        let summary = RunSummary {
            failed: vec![(
                "events_20240101".to_string(),
                ArchiverError::Extraction {
                    partition: "events_20240101".to_string(),
                    source: anyhow::anyhow!("boom"),
                },
            )],
            ..Default::default()
        };
        assert_eq!(summary.exit_code(), 1);
    }
}
