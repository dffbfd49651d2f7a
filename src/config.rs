//! Archive job configuration: the immutable descriptor assembled once from
//! CLI flags and environment, then passed by reference for the life of a
//! run.

use crate::error::ArchiverError;
use crate::slice::OutputDuration;
use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    Jsonl,
    Csv,
    Columnar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Compression {
    Identity,
    Gzip,
    Zstd,
    Lz4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DumpMode {
    Streaming,
    SchemaOnly,
    DataOnly,
    SchemaAndData,
    /// Schema via native `pg_dump --schema-only`, row data via the streaming
    /// archiver pipeline instead of `pg_dump --data-only`.
    Hybrid,
}

/// Database connection parameters.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

/// Object-store connection parameters. Path-style addressing is always
/// forced.
#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

/// Immutable configuration for one archival run.
#[derive(Debug, Clone)]
pub struct ArchiveJob {
    pub db: DbConfig,
    pub object_store: ObjectStoreConfig,
    pub table: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub output_duration: OutputDuration,
    pub output_format: OutputFormat,
    pub compression: Compression,
    pub compression_level: i32,
    pub workers: usize,
    pub path_template: String,
    pub date_column: Option<String>,
    pub dump_mode: DumpMode,
    pub skip_count: bool,
    pub skip_empty: bool,
    pub dry_run: bool,
    pub include_non_partition_tables: bool,
}

fn table_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").unwrap())
}

fn region_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9_-]{1,50}$").unwrap())
}

/// Validate a table or column identifier against the conservative
/// identifier regex. Anything that passes is safe to interpolate into a
/// quoted identifier position.
pub fn validate_identifier(field: &str, value: &str) -> Result<(), ArchiverError> {
    if table_regex().is_match(value) {
        Ok(())
    } else {
        Err(ArchiverError::Configuration {
            field: field.to_string(),
            message: format!("'{value}' is not a valid identifier"),
        })
    }
}

pub fn validate_region(region: &str) -> Result<(), ArchiverError> {
    if region == "auto" || region_regex().is_match(region) {
        Ok(())
    } else {
        Err(ArchiverError::Configuration {
            field: "region".to_string(),
            message: format!("'{region}' is not a valid region"),
        })
    }
}

pub fn validate_workers(workers: usize) -> Result<(), ArchiverError> {
    if (1..=1000).contains(&workers) {
        Ok(())
    } else {
        Err(ArchiverError::Configuration {
            field: "workers".to_string(),
            message: format!("workers must be in [1, 1000], got {workers}"),
        })
    }
}

pub fn validate_port(port: u16) -> Result<(), ArchiverError> {
    if port >= 1 {
        Ok(())
    } else {
        Err(ArchiverError::Configuration {
            field: "port".to_string(),
            message: "port must be in [1, 65535]".to_string(),
        })
    }
}

pub fn validate_date_range(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<(), ArchiverError> {
    if let (Some(s), Some(e)) = (start, end)
        && s > e
    {
        return Err(ArchiverError::Configuration {
            field: "date_range".to_string(),
            message: format!("start date {s} is after end date {e}"),
        });
    }
    Ok(())
}

impl ArchiveJob {
    /// Validate every field that must be checked before any I/O happens.
    pub fn validate(&self) -> Result<(), ArchiverError> {
        validate_identifier("table", &self.table)?;
        if let Some(col) = &self.date_column {
            validate_identifier("date_column", col)?;
        }
        validate_region(&self.object_store.region)?;
        validate_workers(self.workers)?;
        validate_port(self.db.port)?;
        validate_date_range(self.start_date, self.end_date)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_table_name_with_semicolon() {
        assert!(validate_identifier("table", "events; drop table users").is_err());
    }

    #[test]
    fn accepts_plain_table_name() {
        assert!(validate_identifier("table", "events").is_ok());
    }

    #[test]
    fn rejects_out_of_range_workers() {
        assert!(validate_workers(0).is_err());
        assert!(validate_workers(1001).is_err());
        assert!(validate_workers(4).is_ok());
    }

    #[test]
    fn rejects_start_after_end() {
        let start = NaiveDate::from_ymd_opt(2024, 2, 1);
        let end = NaiveDate::from_ymd_opt(2024, 1, 1);
        assert!(validate_date_range(start, end).is_err());
    }

    #[test]
    fn region_auto_is_always_valid() {
        assert!(validate_region("auto").is_ok());
    }
}
