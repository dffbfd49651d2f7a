//! Streaming archiver: probe → extract → format → compress → upload for a
//! single partition, with cache-backed idempotency.

use crate::cache::RowCountCache;
use crate::compress::{self};
use crate::config::ArchiveJob;
use crate::db::introspection;
use crate::error::ArchiverError;
use crate::format::{self};
use crate::objectstore::{ExistenceCheck, ObjectStoreClient};
use crate::partition::Partition;
use crate::path_template::object_key;
use chrono::{DateTime, Utc};
use deadpool_postgres::Object as Client;
use futures_util::TryStreamExt;
use metrics::{counter, histogram};
use sha2::{Digest, Sha256};
use std::io::{BufWriter, Write};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outcome of attempting to archive one partition, recorded in the run
/// summary regardless of success or failure.
#[derive(Debug)]
pub enum ProcessResult {
    Uploaded { partition: String, key: String, rows: u64, bytes: u64 },
    SkippedExisting { partition: String, key: String },
    SkippedEmpty { partition: String },
    Failed { partition: String, error: ArchiverError },
}

/// Archive a single physical partition: build its object key, check
/// whether an equivalent artifact already exists, stream its rows through
/// the configured format and compressor, and upload the result.
pub async fn archive_partition(
    client: &Client,
    job: &ArchiveJob,
    store: &ObjectStoreClient,
    cache: &RowCountCache,
    partition: &Partition,
    cancel: &CancellationToken,
) -> ProcessResult {
    match archive_partition_inner(client, job, store, cache, partition, cancel).await {
        Ok(result) => result,
        Err(error) => ProcessResult::Failed {
            partition: partition.name.clone(),
            error,
        },
    }
}

async fn archive_partition_inner(
    client: &Client,
    job: &ArchiveJob,
    store: &ObjectStoreClient,
    cache: &RowCountCache,
    partition: &Partition,
    cancel: &CancellationToken,
) -> Result<ProcessResult, ArchiverError> {
    if cancel.is_cancelled() {
        return Err(ArchiverError::Cancelled);
    }

    let at = partition
        .range
        .map(|(start, _)| start)
        .unwrap_or_else(|| midnight(partition.parsed_date));
    let key = object_key(&job.path_template, &job.table, at, job.output_duration);

    if job.skip_empty {
        let row_count = resolve_row_count(client, job, cache, partition, at).await?;
        if row_count == 0 {
            info!(partition = %partition.name, "skipping empty partition");
            return Ok(ProcessResult::SkippedEmpty {
                partition: partition.name.clone(),
            });
        }
    }

    if job.dry_run {
        info!(partition = %partition.name, %key, "dry run: would archive partition");
        return Ok(ProcessResult::SkippedExisting {
            partition: partition.name.clone(),
            key,
        });
    }

    // Existence probe happens before any extraction work: if object storage
    // already holds what we last produced for this key, skip straight to
    // done without opening a cursor, so a skip truly performs no extraction.
    // Only the cache's previously-recorded digest is used here; there is no
    // freshly-materialized file yet to hash.
    if let Some(cached_digest) = cache.get(&partition.name).and_then(|e| e.file_digest) {
        let already_uploaded = match store.check_existence(&key, &cached_digest).await? {
            ExistenceCheck::MatchesDigest => true,
            ExistenceCheck::Indeterminate => cache_confirms_upload(cache, partition, &key),
            ExistenceCheck::Absent | ExistenceCheck::Differs => false,
        };
        if already_uploaded {
            info!(partition = %partition.name, %key, "existing object already uploaded, skipping");
            counter!("archiver.partitions_skipped_existing_total").increment(1);
            cache
                .set_uploaded(&partition.name, &key, Utc::now())
                .map_err(ArchiverError::CacheIo)?;
            return Ok(ProcessResult::SkippedExisting {
                partition: partition.name.clone(),
                key,
            });
        }
    }

    let tmp = tempfile::NamedTempFile::new().map_err(|e| ArchiverError::Encoding {
        partition: partition.name.clone(),
        row: 0,
        source: e.into(),
    })?;
    let tmp_path = tmp.path().to_path_buf();

    let extract_started = Instant::now();
    let rows_written = {
        let file = tmp.reopen().map_err(|e| ArchiverError::Encoding {
            partition: partition.name.clone(),
            row: 0,
            source: e.into(),
        })?;
        let sink: Box<dyn Write + Send> = Box::new(BufWriter::new(file));
        let compressor = compress::new_compressor(job.compression, job.compression_level);
        let compressed = compressor.wrap_writer(sink);
        let mut writer = format::new_writer(job.output_format, compressed_as_write(compressed));
        stream_rows(client, job, partition, cancel, writer.as_mut()).await?;
        writer.finish()?
    };
    histogram!("archiver.extract_duration_ms").record(extract_started.elapsed().as_millis() as f64);

    if rows_written == 0 && job.skip_empty {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Ok(ProcessResult::SkippedEmpty {
            partition: partition.name.clone(),
        });
    }

    let digest = sha256_file(&tmp_path).await?;
    let metadata = tokio::fs::metadata(&tmp_path).await.map_err(|e| ArchiverError::Upload {
        partition: partition.name.clone(),
        key: key.clone(),
        source: e.into(),
    })?;

    let upload_started = Instant::now();
    store.put_multipart_from_path(&key, &tmp_path).await?;
    histogram!("archiver.upload_duration_ms").record(upload_started.elapsed().as_millis() as f64);
    let _ = tokio::fs::remove_file(&tmp_path).await;

    cache
        .set_file(&partition.name, metadata.len(), metadata.len(), &digest, Utc::now())
        .map_err(ArchiverError::CacheIo)?;
    cache
        .set_uploaded(&partition.name, &key, Utc::now())
        .map_err(ArchiverError::CacheIo)?;

    counter!("archiver.partitions_uploaded_total").increment(1);
    counter!("archiver.bytes_uploaded_total").increment(metadata.len());

    Ok(ProcessResult::Uploaded {
        partition: partition.name.clone(),
        key,
        rows: rows_written,
        bytes: metadata.len(),
    })
}

/// `format::new_writer` wants a `Box<dyn Write + Send>`; `FinishableWriter`
/// already implements `Write`, so this only needs an upcast.
fn compressed_as_write(writer: Box<dyn compress::FinishableWriter>) -> Box<dyn Write + Send> {
    Box::new(FinishOnDrop(Some(writer)))
}

/// Wraps a `FinishableWriter` so the format layer can treat it as a plain
/// `Write`, while the real `finish()` call (which may surface a trailer
/// error) happens explicitly once the format writer is done.
struct FinishOnDrop(Option<Box<dyn compress::FinishableWriter>>);

impl Write for FinishOnDrop {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.as_mut().expect("writer finished twice").write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.0.as_mut().expect("writer finished twice").flush()
    }
}

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        if let Some(writer) = self.0.take()
            && let Err(e) = writer.finish()
        {
            warn!("compressor trailer flush failed on drop: {}", e);
        }
    }
}

async fn stream_rows(
    client: &Client,
    job: &ArchiveJob,
    partition: &Partition,
    cancel: &CancellationToken,
    writer: &mut dyn format::RowWriter,
) -> Result<(), ArchiverError> {
    let query = build_select(job, partition);
    let params: Vec<&(dyn postgres_types::ToSql + Sync)> = match &partition.range {
        Some((start, end)) => vec![start, end],
        None => vec![],
    };

    let statement = client.prepare(&query).await.map_err(|e| ArchiverError::Extraction {
        partition: partition.name.clone(),
        source: e.into(),
    })?;
    writer.observe_columns(statement.columns());

    let row_stream = client
        .query_raw(&statement, params)
        .await
        .map_err(|e| ArchiverError::Extraction {
            partition: partition.name.clone(),
            source: e.into(),
        })?;
    tokio::pin!(row_stream);

    loop {
        if cancel.is_cancelled() {
            return Err(ArchiverError::Cancelled);
        }
        let next = row_stream.try_next().await.map_err(|e| ArchiverError::Extraction {
            partition: partition.name.clone(),
            source: e.into(),
        })?;
        let Some(row) = next else { break };
        writer.write_row(&row)?;
    }
    Ok(())
}

fn build_select(job: &ArchiveJob, partition: &Partition) -> String {
    match (&partition.range, &job.date_column) {
        (Some(_), Some(date_column)) => {
            format!(
                "SELECT * FROM \"{}\" WHERE \"{}\" >= $1 AND \"{}\" < $2",
                job.table, date_column, date_column
            )
        }
        _ => format!("SELECT * FROM \"{}\"", partition.name),
    }
}

/// Without a comparable digest, fall back to the cache's own record of the
/// upload: if it already names this key and was recorded after the last
/// time we confirmed the partition's row count, treat the partition as
/// unchanged since that upload and skip re-uploading it.
fn cache_confirms_upload(cache: &RowCountCache, partition: &Partition, key: &str) -> bool {
    let Some(entry) = cache.get(&partition.name) else {
        return false;
    };
    let Some(object_time) = entry.object_time else {
        return false;
    };
    if entry.object_key.as_deref() != Some(key) {
        return false;
    }
    match entry.counted_at {
        Some(counted_at) => object_time >= counted_at,
        None => true,
    }
}

async fn resolve_row_count(
    client: &Client,
    job: &ArchiveJob,
    cache: &RowCountCache,
    partition: &Partition,
    at: DateTime<Utc>,
) -> Result<i64, ArchiverError> {
    let now = Utc::now();
    if let Some(cached) = cache.get_row_count(&partition.name, now) {
        return Ok(cached);
    }
    let count = match (&partition.range, &job.date_column) {
        (Some((start, end)), Some(date_column)) => {
            introspection::count_rows_in_window(client, &job.table, date_column, *start, *end).await?
        }
        _ => introspection::count_rows(client, &partition.name).await?,
    };
    cache
        .set_row_count(&partition.name, partition.parsed_date, count, now)
        .map_err(ArchiverError::CacheIo)?;
    let _ = at;
    Ok(count)
}

async fn sha256_file(path: &std::path::Path) -> Result<String, ArchiverError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| ArchiverError::Encoding {
        partition: String::new(),
        row: 0,
        source: e.into(),
    })?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

fn midnight(date: chrono::NaiveDate) -> DateTime<Utc> {
    use chrono::TimeZone;
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight is always valid"))
}
