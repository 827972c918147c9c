//! Scheduler-visible shapes (spec §3 `QueueItem`, §6 progress stream).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use nodes::ExecutionStats;

/// Five-state status machine for one [`QueueItem`] (spec §3 invariant 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Waiting,
    Queued,
    Executing,
    Completed,
    Failed,
}

/// One scheduler-visible unit of work bound to a graph node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub node_id: String,
    pub node_label: Option<String>,
    pub node_kind: String,
    pub priority: i64,
    pub status: QueueStatus,
    pub dependencies: Vec<String>,
    pub added_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub worker_id: Option<usize>,
    pub output: Option<Value>,
    pub stats: Option<ExecutionStats>,
    pub error: Option<String>,
    pub relative_start_ms: Option<i64>,
    pub relative_end_ms: Option<i64>,
}

impl QueueItem {
    /// Construct a fresh, `waiting` item. `promote()` moves it to `queued`
    /// once its dependencies (possibly empty) are satisfied.
    pub fn new(
        node_id: impl Into<String>,
        node_label: Option<String>,
        node_kind: impl Into<String>,
        priority: i64,
        dependencies: Vec<String>,
        added_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            node_id: node_id.into(),
            node_label,
            node_kind: node_kind.into(),
            priority,
            status: QueueStatus::Waiting,
            dependencies,
            added_at,
            started_at: None,
            completed_at: None,
            worker_id: None,
            output: None,
            stats: None,
            error: None,
            relative_start_ms: None,
            relative_end_ms: None,
        }
    }
}

/// Snapshot pushed to every subscriber on each state change, and at ~10Hz
/// while any worker is active (spec §4.5 "Progress contract").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QueueStats {
    pub total_queued: usize,
    pub executing: usize,
    pub completed: usize,
    pub failed: usize,
    pub waiting: usize,
    pub active_workers: usize,
    pub max_workers: usize,
    pub average_execution_time: f64,
}

/// Which terminal transition a [`ProgressEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Completed,
    Failed,
}

/// Run-wide completion counters and the stable percentage denominator
/// (spec §3 invariant 5, "total nodes at run start").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProgressCounts {
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    pub percentage: f64,
}

/// Per-node progress event emitted to the listener and optional structured
/// log sink (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub timestamp: DateTime<Utc>,
    pub node_id: String,
    pub node_label: Option<String>,
    pub status: ProgressStatus,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
    pub progress: ProgressCounts,
}

/// Everything a subscriber may receive from [`crate::manager::QueueManager::subscribe`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueEvent {
    ExecutionStart { total_nodes: usize },
    Progress(ProgressEvent),
    Stats(QueueStats),
    ExecutionComplete { completed: usize, failed: usize, total: usize, duration_ms: i64 },
}
