//! Postgres connection pooling and catalog access.
//!
//! Partition contents are read with `tokio-postgres` directly rather than
//! through a compile-time-typed ORM: the set of columns being archived is
//! only known once a partition's row type is introspected at runtime.

pub mod catalog;
pub mod introspection;

use crate::config::DbConfig;
use crate::error::ArchiverError;
use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use tracing::info;

pub type PgPool = Pool;

/// Build a bounded connection pool from the job's database configuration.
pub fn build_pool(db: &DbConfig, max_size: usize) -> Result<PgPool, ArchiverError> {
    let mut cfg = PoolConfig::new();
    cfg.host = Some(db.host.clone());
    cfg.port = Some(db.port);
    cfg.user = Some(db.user.clone());
    cfg.password = Some(db.password.clone());
    cfg.dbname = Some(db.database.clone());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    let pool = cfg
        .create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| ArchiverError::Configuration {
            field: "db".to_string(),
            message: e.to_string(),
        })?;
    pool.resize(max_size.max(1));
    info!(host = %db.host, database = %db.database, "built postgres connection pool");
    Ok(pool)
}

/// Acquire a client from the pool, reporting failures as connectivity
/// errors (fatal to the whole run).
pub async fn get_client(pool: &PgPool) -> Result<deadpool_postgres::Object, ArchiverError> {
    pool.get().await.map_err(|e| ArchiverError::Connectivity {
        target: "postgres".to_string(),
        source: e.into(),
    })
}
