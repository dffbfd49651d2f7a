use crate::cache::RowCountCache;
use crate::progress::{ProgressBus, TaskInfo};
use anyhow::Result;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Request bodies on this surface are never more than a few bytes, so read
/// and write are bounded by the same overall request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
struct AppState {
    cache: Arc<RowCountCache>,
    bus: Arc<ProgressBus>,
}

/// Minimal read-only HTTP surface over the row-count cache and the current
/// task's progress state: `GET /api/cache`, `GET /api/task`, `GET
/// /healthz`. The interactive terminal viewer itself is an external
/// collaborator; this just serves the JSON it would consume.
pub async fn handle_cache_viewer(table: &str, port: u16, bus: Arc<ProgressBus>) -> Result<()> {
    let cache = Arc::new(RowCountCache::open(table)?);
    let state = AppState { cache, bus };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/cache", get(get_cache))
        .route("/api/task", get(get_task))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "cache viewer listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn get_cache(State(state): State<AppState>) -> Json<Vec<(String, crate::cache::CacheEntry)>> {
    Json(state.cache.snapshot())
}

async fn get_task(State(state): State<AppState>) -> Json<TaskInfo> {
    Json(state.bus.state().await)
}
