//! Progress bus: typed events broadcast during a run, plus a task-info JSON
//! file mirroring the latest state for external pollers (used by the
//! cache-viewer HTTP surface and any out-of-process monitor).

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Connecting,
    CheckingPermissions,
    Discovering,
    Counting,
    Processing,
    Complete,
}

impl Phase {
    pub fn as_tag(&self) -> &'static str {
        match self {
            Phase::Connecting => "connecting",
            Phase::CheckingPermissions => "checking-permissions",
            Phase::Discovering => "discovering",
            Phase::Counting => "counting",
            Phase::Processing => "processing",
            Phase::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ProgressEvent {
    PhaseChanged { phase: Phase },
    Message { text: String },
    PartitionsFound { count: usize },
    TableCounted { table: String, row_count: i64 },
    PartitionComplete { partition: String, rows_written: u64 },
    PartitionFailed { partition: String, phase_tag: String, message: String },
    SliceStart { slice: String },
    SliceComplete { slice: String },
    Progress { current: u64, total: u64 },
    StageUpdate { stage: String },
    Tick,
}

impl std::fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgressEvent::PhaseChanged { phase } => write!(f, "phase -> {}", phase.as_tag()),
            ProgressEvent::Message { text } => write!(f, "{text}"),
            ProgressEvent::PartitionsFound { count } => write!(f, "found {count} partitions"),
            ProgressEvent::TableCounted { table, row_count } => {
                write!(f, "{table}: {row_count} rows")
            }
            ProgressEvent::PartitionComplete { partition, rows_written } => {
                write!(f, "{partition}: wrote {rows_written} rows")
            }
            ProgressEvent::PartitionFailed { partition, phase_tag, message } => {
                write!(f, "{partition} failed during {phase_tag}: {message}")
            }
            ProgressEvent::SliceStart { slice } => write!(f, "slice {slice} starting"),
            ProgressEvent::SliceComplete { slice } => write!(f, "slice {slice} done"),
            ProgressEvent::Progress { current, total } => write!(f, "{current}/{total}"),
            ProgressEvent::StageUpdate { stage } => write!(f, "stage: {stage}"),
            ProgressEvent::Tick => write!(f, "tick"),
        }
    }
}

/// Latest-known state, mirrored to a JSON file so external processes can
/// poll progress without subscribing to the broadcast channel.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskInfo {
    pub phase: Option<&'static str>,
    pub partitions_found: Option<usize>,
    pub partitions_done: u64,
    pub partitions_total: u64,
    pub last_message: Option<String>,
}

pub struct ProgressBus {
    tx: broadcast::Sender<ProgressEvent>,
    state: Arc<RwLock<TaskInfo>>,
    task_info_path: Option<PathBuf>,
}

impl ProgressBus {
    pub fn new(task_info_path: Option<PathBuf>) -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self {
            tx,
            state: Arc::new(RwLock::new(TaskInfo::default())),
            task_info_path,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    pub async fn state(&self) -> TaskInfo {
        self.state.read().await.clone()
    }

    /// Publish an event to subscribers, update the mirrored state, and
    /// persist it to the task-info file if one was configured.
    pub async fn publish(&self, event: ProgressEvent) {
        {
            let mut state = self.state.write().await;
            match &event {
                ProgressEvent::PhaseChanged { phase } => state.phase = Some(phase.as_tag()),
                ProgressEvent::PartitionsFound { count } => {
                    state.partitions_found = Some(*count);
                    state.partitions_total = *count as u64;
                }
                ProgressEvent::PartitionComplete { .. } => state.partitions_done += 1,
                ProgressEvent::Message { text } => state.last_message = Some(text.clone()),
                _ => {}
            }
        }
        let _ = self.tx.send(event);
        self.write_task_info().await;
    }

    async fn write_task_info(&self) {
        let Some(path) = &self.task_info_path else {
            return;
        };
        let state = self.state.read().await.clone();
        match serde_json::to_vec_pretty(&state) {
            Ok(bytes) => {
                if let Some(parent) = path.parent() {
                    let _ = tokio::fs::create_dir_all(parent).await;
                }
                let tmp = path.with_extension("tmp");
                if tokio::fs::write(&tmp, &bytes).await.is_ok() {
                    let _ = tokio::fs::rename(&tmp, path).await;
                }
            }
            Err(e) => warn!("failed to serialize task info: {}", e),
        }
    }
}
