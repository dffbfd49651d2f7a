//! Persistent per-table row-count cache.
//!
//! One JSON file per cache scope (typically the parent-table name), stored
//! under the user's cache directory. Writes are atomic (write to a temp file
//! in the same directory, then rename) so a crash mid-write never corrupts
//! the cache; reads simply treat a missing or unparsable file as empty.

use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::ArchiverError;

/// Counts for historical (sealed) dates are retained long; counts for
/// today/yesterday are short-lived because those partitions may still be
/// receiving writes.
const HISTORICAL_TTL: chrono::Duration = chrono::Duration::days(30);
const RECENT_TTL: chrono::Duration = chrono::Duration::minutes(15);

/// Historical retention horizon used by `evict_expired`.
const RETENTION_HORIZON: chrono::Duration = chrono::Duration::days(30);

fn ttl_for(parsed_date: NaiveDate, now: DateTime<Utc>) -> chrono::Duration {
    let today = now.date_naive();
    if parsed_date == today || parsed_date == today - chrono::Duration::days(1) {
        RECENT_TTL
    } else {
        HISTORICAL_TTL
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheEntry {
    pub row_count: Option<i64>,
    pub counted_at: Option<DateTime<Utc>>,
    pub parsed_date: Option<NaiveDate>,
    pub file_digest: Option<String>,
    pub file_time: Option<DateTime<Utc>>,
    pub file_size: Option<u64>,
    pub uncompressed_size: Option<u64>,
    pub object_uploaded: Option<bool>,
    pub object_key: Option<String>,
    pub object_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheDocument {
    entries: HashMap<String, CacheEntry>,
}

/// A cache scope's on-disk file plus an in-memory mirror guarded by a mutex:
/// reads never touch disk, writes always go through an atomic rename.
pub struct RowCountCache {
    path: PathBuf,
    doc: Mutex<CacheDocument>,
}

impl RowCountCache {
    /// Open (or create) the cache file for a given scope under the user's
    /// cache directory.
    pub fn open(scope: &str) -> anyhow::Result<Self> {
        let path = cache_file_path(scope)?;
        Self::open_at(path)
    }

    /// Open a cache file at an explicit path. Exposed for tests and for
    /// callers that want a non-default cache directory.
    pub fn open_at(path: PathBuf) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let doc = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!("cache file {} is unreadable, starting fresh: {}", path.display(), e);
                CacheDocument::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CacheDocument::default(),
            Err(e) => {
                warn!("cache file {} could not be read: {}", path.display(), e);
                CacheDocument::default()
            }
        };
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    /// Returns the cached row count if still fresh under the TTL policy,
    /// `None` otherwise (treated as "missing").
    pub fn get_row_count(&self, name: &str, now: DateTime<Utc>) -> Option<i64> {
        let hit = self.get_row_count_inner(name, now);
        if hit.is_some() {
            counter!("row_count_cache.hit_total").increment(1);
        } else {
            counter!("row_count_cache.miss_total").increment(1);
        }
        hit
    }

    fn get_row_count_inner(&self, name: &str, now: DateTime<Utc>) -> Option<i64> {
        let doc = self.doc.lock().unwrap();
        let entry = doc.entries.get(name)?;
        let (count, counted_at, parsed_date) =
            (entry.row_count?, entry.counted_at?, entry.parsed_date?);
        if counted_at + ttl_for(parsed_date, now) >= now {
            Some(count)
        } else {
            None
        }
    }

    pub fn set_row_count(
        &self,
        name: &str,
        parsed_date: NaiveDate,
        count: i64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        {
            let mut doc = self.doc.lock().unwrap();
            let entry = doc.entries.entry(name.to_string()).or_default();
            entry.row_count = Some(count);
            entry.counted_at = Some(now);
            entry.parsed_date = Some(parsed_date);
        }
        self.flush()
    }

    pub fn set_file(
        &self,
        name: &str,
        size: u64,
        uncompressed_size: u64,
        digest: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        {
            let mut doc = self.doc.lock().unwrap();
            let entry = doc.entries.entry(name.to_string()).or_default();
            entry.file_size = Some(size);
            entry.uncompressed_size = Some(uncompressed_size);
            entry.file_digest = Some(digest.to_string());
            entry.file_time = Some(now);
        }
        self.flush()
    }

    pub fn set_uploaded(&self, name: &str, object_key: &str, now: DateTime<Utc>) -> anyhow::Result<()> {
        {
            let mut doc = self.doc.lock().unwrap();
            let entry = doc.entries.entry(name.to_string()).or_default();
            entry.object_uploaded = Some(true);
            entry.object_key = Some(object_key.to_string());
            entry.object_time = Some(now);
        }
        self.flush()
    }

    pub fn get(&self, name: &str) -> Option<CacheEntry> {
        self.doc.lock().unwrap().entries.get(name).cloned()
    }

    /// A point-in-time copy of every entry, for the cache-viewer HTTP surface.
    pub fn snapshot(&self) -> Vec<(String, CacheEntry)> {
        self.doc
            .lock()
            .unwrap()
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Remove entries whose parsed date is older than the historical
    /// retention horizon.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let horizon = now.date_naive() - RETENTION_HORIZON;
        let removed;
        {
            let mut doc = self.doc.lock().unwrap();
            let before = doc.entries.len();
            doc.entries
                .retain(|_, entry| entry.parsed_date.is_none_or(|d| d >= horizon));
            removed = before - doc.entries.len();
        }
        if removed > 0 {
            self.flush()?;
            info!("evicted {} expired cache entries", removed);
        }
        Ok(removed)
    }

    fn flush(&self) -> anyhow::Result<()> {
        let doc = self.doc.lock().unwrap();
        let serialized = serde_json::to_vec_pretty(&*doc)?;
        drop(doc);
        atomic_write(&self.path, &serialized)
            .map_err(|e| ArchiverError::CacheIo(e).into())
    }
}

fn atomic_write(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp_path = dir.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("cache")
    ));
    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, path)?;
    debug!("wrote cache file {}", path.display());
    Ok(())
}

fn cache_file_path(scope: &str) -> anyhow::Result<PathBuf> {
    let base = dirs_cache_home()?;
    Ok(base.join("pg-archiver").join(format!("{scope}.json")))
}

fn dirs_cache_home() -> anyhow::Result<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        return Ok(PathBuf::from(xdg));
    }
    let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME is not set"))?;
    Ok(PathBuf::from(home).join(".cache"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn fresh_historical_entry_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RowCountCache::open_at(dir.path().join("scope.json")).unwrap();
        let now = at(2024, 1, 10);
        let parsed_date = (now - chrono::Duration::days(2)).date_naive();
        cache
            .set_row_count("events_20240108", parsed_date, 42, now - chrono::Duration::days(8))
            .unwrap();
        assert_eq!(cache.get_row_count("events_20240108", now), Some(42));
    }

    #[test]
    fn stale_recent_entry_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RowCountCache::open_at(dir.path().join("scope.json")).unwrap();
        let now = at(2024, 1, 10);
        cache
            .set_row_count("events_20240110", now.date_naive(), 7, now - chrono::Duration::minutes(30))
            .unwrap();
        assert_eq!(cache.get_row_count("events_20240110", now), None);
    }

    #[test]
    fn survives_reopen_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scope.json");
        let now = at(2024, 1, 10);
        {
            let cache = RowCountCache::open_at(path.clone()).unwrap();
            cache
                .set_row_count("events_20231225", NaiveDate::from_ymd_opt(2023, 12, 25).unwrap(), 100, now)
                .unwrap();
        }
        let reopened = RowCountCache::open_at(path).unwrap();
        assert_eq!(reopened.get_row_count("events_20231225", now), Some(100));
    }

    #[test]
    fn set_row_count_preserves_other_fields() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RowCountCache::open_at(dir.path().join("scope.json")).unwrap();
        let now = at(2024, 1, 10);
        let parsed_date = NaiveDate::from_ymd_opt(2023, 12, 1).unwrap();
        cache.set_uploaded("events_20231201", "k/events-2023-12-01.dump", now).unwrap();
        cache.set_row_count("events_20231201", parsed_date, 9, now).unwrap();
        let entry = cache.get("events_20231201").unwrap();
        assert_eq!(entry.row_count, Some(9));
        assert_eq!(entry.object_key.as_deref(), Some("k/events-2023-12-01.dump"));
    }
}
