//! Top-level error classification for the archival pipeline.
//!
//! Each variant corresponds to one of the error kinds the orchestrator needs
//! to reason about: some are fatal to a whole run, others are scoped to a
//! single partition and simply get recorded in the run summary.

/// A single error kind, classified so callers can decide whether it is
/// fatal to the run or only to the partition/window that produced it.
#[derive(Debug, thiserror::Error)]
pub enum ArchiverError {
    #[error("configuration error in field '{field}': {message}")]
    Configuration { field: String, message: String },

    #[error("failed to connect to {target}: {source}")]
    Connectivity {
        target: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("insufficient privileges on '{object}': {reason}")]
    Privileges { object: String, reason: String },

    #[error("partition discovery failed: {0}")]
    Discovery(#[source] anyhow::Error),

    #[error("extraction failed for '{partition}': {source}")]
    Extraction {
        partition: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("encoding failed for '{partition}' at row {row}: {source}")]
    Encoding {
        partition: String,
        row: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("compression failed for '{partition}': {source}")]
    Compression {
        partition: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("upload failed for '{partition}' (key={key}): {source}")]
    Upload {
        partition: String,
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("cache I/O error (non-fatal): {0}")]
    CacheIo(#[source] anyhow::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl ArchiverError {
    /// Whether this error kind aborts the whole run, as opposed to being
    /// scoped to the partition/window that produced it.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            ArchiverError::Configuration { .. }
                | ArchiverError::Connectivity { .. }
                | ArchiverError::Discovery(_)
        )
    }

    /// Human-readable phase tag, used when surfacing a per-partition failure
    /// in the run summary.
    pub fn phase_tag(&self) -> &'static str {
        match self {
            ArchiverError::Configuration { .. } => "configuration",
            ArchiverError::Connectivity { .. } => "connectivity",
            ArchiverError::Privileges { .. } => "privileges",
            ArchiverError::Discovery(_) => "discovery",
            ArchiverError::Extraction { .. } => "extraction",
            ArchiverError::Encoding { .. } => "encoding",
            ArchiverError::Compression { .. } => "compression",
            ArchiverError::Upload { .. } => "upload",
            ArchiverError::CacheIo(_) => "cache-io",
            ArchiverError::Cancelled => "cancelled",
        }
    }
}
