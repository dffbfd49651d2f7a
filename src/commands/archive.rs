use crate::config::ArchiveJob;
use crate::orchestrator::{self, RunSummary};
use crate::progress::{ProgressBus, ProgressEvent};
use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Run a full archive job to completion, wiring `Ctrl-C` to graceful
/// cancellation and printing a summary once the orchestrator settles.
pub async fn handle_archive(job: ArchiveJob, task_info_path: Option<std::path::PathBuf>) -> Result<RunSummary> {
    let bus = Arc::new(ProgressBus::new(task_info_path));
    let cancel = CancellationToken::new();

    let mut events = bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!("{event}");
        }
    });

    let watchdog_cancel = cancel.clone();
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
            let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");

            tokio::select! {
                _ = sigterm.recv() => warn!("received SIGTERM, cancelling run"),
                _ = sigint.recv() => warn!("received SIGINT, cancelling run"),
            }
        }

        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("received interrupt, cancelling run");
            }
        }

        watchdog_cancel.cancel();
    });

    let summary = orchestrator::run(&job, bus.clone(), cancel).await;
    bus.publish(ProgressEvent::Message {
        text: format!(
            "done: {} uploaded, {} skipped (existing), {} skipped (empty), {} failed",
            summary.uploaded.len(),
            summary.skipped_existing.len(),
            summary.skipped_empty.len(),
            summary.failed.len()
        ),
    })
    .await;

    Ok(summary)
}
