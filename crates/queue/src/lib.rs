//! `queue` — the priority-ordered, worker-pooled DAG scheduler that turns a
//! validated graph plus seed variables into a running execution (spec §4.5).

pub mod manager;
pub mod models;

pub use manager::{QueueManager, MAX_WORKERS_CAP};
pub use models::{
    ProgressCounts, ProgressEvent, ProgressStatus, QueueEvent, QueueItem, QueueStats, QueueStatus,
};

#[cfg(test)]
mod tests;
