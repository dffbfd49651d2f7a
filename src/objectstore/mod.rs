//! Object-store client wrapper: existence probes, digest comparison, and
//! multipart upload, built on the `object_store` crate's S3-compatible
//! abstraction.

use crate::config::ObjectStoreConfig;
use crate::error::ArchiverError;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;
use tracing::{debug, info};

pub struct ObjectStoreClient {
    store: Arc<dyn ObjectStore>,
}

/// Result of checking whether a key already holds the content we're about
/// to write, used to implement the existence-shortcut idempotency rule.
pub enum ExistenceCheck {
    /// No object at this key.
    Absent,
    /// An object exists and its ETag matches the digest of the content we
    /// would upload: safe to skip the upload entirely.
    MatchesDigest,
    /// An object exists but its ETag isn't a comparable digest (e.g. a
    /// multipart upload's opaque ETag on some S3-compatible backends). The
    /// caller falls back to the cache's recorded upload time.
    Indeterminate,
    /// An object exists and its ETag is comparable but does not match: the
    /// upload proceeds and overwrites it (last-upload-wins).
    Differs,
}

impl ObjectStoreClient {
    pub fn new(config: &ObjectStoreConfig) -> Result<Self, ArchiverError> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_virtual_hosted_style_request(false);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        if let Some(key) = &config.access_key_id {
            builder = builder.with_access_key_id(key);
        }
        if let Some(secret) = &config.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }

        let store = builder.build().map_err(|e| ArchiverError::Configuration {
            field: "object_store".to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            store: Arc::new(store),
        })
    }

    /// Check whether `key` already holds content matching `digest` (the hex
    /// SHA-256 of the artifact). The object's ETag is only a comparable
    /// digest when it's a bare 64-character hex string of the same shape as
    /// `digest` itself; a single-part PUT's content-MD5 ETag (32 hex chars)
    /// or a multipart upload's opaque `md5-partcount` ETag carries no
    /// SHA-256 we can compare against, so both are `Indeterminate` rather
    /// than `Differs` — the caller falls back to the cache's recorded
    /// upload time instead of forcing a needless re-upload.
    pub async fn check_existence(&self, key: &str, digest: &str) -> Result<ExistenceCheck, ArchiverError> {
        let path = ObjectPath::from(key);
        match self.store.head(&path).await {
            Ok(meta) => {
                let Some(tag) = meta.e_tag.as_deref().map(|t| t.trim_matches('"')) else {
                    return Ok(ExistenceCheck::Indeterminate);
                };
                if tag.len() != digest.len() || !tag.chars().all(|c| c.is_ascii_hexdigit()) {
                    debug!(key, etag = tag, "object exists with non-comparable ETag");
                    return Ok(ExistenceCheck::Indeterminate);
                }
                if tag.eq_ignore_ascii_case(digest) {
                    debug!(key, "object exists with matching digest, skipping upload");
                    Ok(ExistenceCheck::MatchesDigest)
                } else {
                    Ok(ExistenceCheck::Differs)
                }
            }
            Err(object_store::Error::NotFound { .. }) => Ok(ExistenceCheck::Absent),
            Err(e) => Err(ArchiverError::Upload {
                partition: String::new(),
                key: key.to_string(),
                source: e.into(),
            }),
        }
    }

    /// Upload `bytes` to `key` in a single PUT. Large artifacts should be
    /// chunked by the caller and passed in pieces via `put_multipart`
    /// instead; this is the common path for compressed partition dumps that
    /// comfortably fit in memory.
    pub async fn put(&self, key: &str, bytes: Bytes) -> Result<(), ArchiverError> {
        let path = ObjectPath::from(key);
        self.store
            .put(&path, PutPayload::from_bytes(bytes))
            .await
            .map_err(|e| ArchiverError::Upload {
                partition: String::new(),
                key: key.to_string(),
                source: e.into(),
            })?;
        info!(key, "uploaded object");
        Ok(())
    }

    /// Stream an artifact to `key` via the multipart API, for artifacts too
    /// large to buffer whole.
    pub async fn put_multipart_from_path(
        &self,
        key: &str,
        local_path: &std::path::Path,
    ) -> Result<(), ArchiverError> {
        let path = ObjectPath::from(key);
        let upload_err = |e: object_store::Error| ArchiverError::Upload {
            partition: String::new(),
            key: key.to_string(),
            source: e.into(),
        };

        let mut file = tokio::fs::File::open(local_path)
            .await
            .map_err(|e| ArchiverError::Upload {
                partition: String::new(),
                key: key.to_string(),
                source: e.into(),
            })?;

        let mut writer = self.store.put_multipart(&path).await.map_err(upload_err)?;
        let mut buf = vec![0u8; 8 * 1024 * 1024];
        loop {
            use tokio::io::AsyncReadExt;
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| ArchiverError::Upload {
                    partition: String::new(),
                    key: key.to_string(),
                    source: e.into(),
                })?;
            if n == 0 {
                break;
            }
            writer
                .put_part(Bytes::copy_from_slice(&buf[..n]).into())
                .await
                .map_err(upload_err)?;
        }
        writer.complete().await.map_err(upload_err)?;
        info!(key, "uploaded object via multipart");
        Ok(())
    }
}
