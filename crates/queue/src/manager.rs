//! `QueueManager` — the priority-aware, worker-pooled scheduler core
//! (spec §4.5, §5, §8).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex, Notify};
use tracing::{info, warn};
use uuid::Uuid;

use nodes::{ExecutionContext, NodeRegistry};

use crate::models::{
    ProgressCounts, ProgressEvent, ProgressStatus, QueueEvent, QueueItem, QueueStats, QueueStatus,
};

/// How often the progress ticker pushes a `QueueEvent::Stats` snapshot
/// while any worker slot is occupied (spec §4.5 "~10 Hz").
const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound the planner enforces on `max_workers` (spec §4.6 step 2).
pub const MAX_WORKERS_CAP: usize = 25;

struct State {
    items: Vec<QueueItem>,
    worker_slots: Vec<bool>,
    completed: HashSet<String>,
    failed: HashSet<String>,
    flow_start_ms: Option<i64>,
    flow_end_ms: Option<i64>,
    total_at_start: usize,
    execution_durations_ms: Vec<i64>,
}

/// The scheduler core. Construct one fresh instance per run (spec §9:
/// "one-per-run in headless mode"); the interactive/API path keeps one
/// behind `Arc<Mutex<Option<QueueManager>>>`, replaced per run.
pub struct QueueManager {
    state: Mutex<State>,
    max_workers: usize,
    /// Fires on a user-initiated stop or an external cancellation signal —
    /// spec §5 treats the two as equivalent, so one flag covers both.
    user_stop: Arc<AtomicBool>,
    /// Set by `run_item` on *any* task failure (spec §4.5 "Stop policy",
    /// source-faithful). Halts new admissions; does not abort tasks
    /// already executing.
    should_stop_flow: Arc<AtomicBool>,
    notify: Arc<Notify>,
    events: broadcast::Sender<QueueEvent>,
    job_identity: Option<String>,
}

impl QueueManager {
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.clamp(1, MAX_WORKERS_CAP);
        let (events, _) = broadcast::channel(1024);
        Self {
            state: Mutex::new(State {
                items: Vec::new(),
                worker_slots: vec![false; max_workers],
                completed: HashSet::new(),
                failed: HashSet::new(),
                flow_start_ms: None,
                flow_end_ms: None,
                total_at_start: 0,
                execution_durations_ms: Vec::new(),
            }),
            max_workers,
            user_stop: Arc::new(AtomicBool::new(false)),
            should_stop_flow: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
            events,
            job_identity: None,
        }
    }

    pub fn with_job_identity(mut self, id: impl Into<String>) -> Self {
        self.job_identity = Some(id.into());
        self
    }

    /// Seed `completed_node_ids` from a prior successful-results map so an
    /// incremental re-run can skip already-done nodes (spec §4.5
    /// "Completion tracking").
    pub async fn seed_completed(&self, ids: impl IntoIterator<Item = String>) {
        let mut state = self.state.lock().await;
        state.completed.extend(ids);
    }

    /// Enqueue a batch of items, all starting `waiting`; `promote()` will
    /// move zero-dependency items to `queued` on the scheduler's first
    /// pass. Items whose node id is already in the seeded completed set
    /// are skipped entirely (spec testable property 11).
    pub async fn enqueue(&self, items: Vec<QueueItem>) {
        let mut state = self.state.lock().await;
        for item in items {
            if state.completed.contains(&item.node_id) {
                continue;
            }
            state.items.push(item);
        }
        state.total_at_start = state.items.len();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Equivalent to firing the cancellation handle (spec §5).
    pub fn stop(&self) {
        self.user_stop.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn was_stopped(&self) -> bool {
        self.user_stop.load(Ordering::SeqCst)
    }

    pub async fn completed_ids(&self) -> HashSet<String> {
        self.state.lock().await.completed.clone()
    }

    pub async fn failed_ids(&self) -> HashSet<String> {
        self.state.lock().await.failed.clone()
    }

    pub async fn items(&self) -> Vec<QueueItem> {
        self.state.lock().await.items.clone()
    }

    pub async fn flow_duration_ms(&self) -> Option<i64> {
        let state = self.state.lock().await;
        match (state.flow_start_ms, state.flow_end_ms) {
            (Some(s), Some(e)) => Some(e - s),
            _ => None,
        }
    }

    /// Drive the scheduling loop to quiescence (spec §4.5 steps 1-5).
    pub async fn run(self: Arc<Self>, registry: Arc<NodeRegistry>, ctx: Arc<dyn ExecutionContext>) {
        let total = self.state.lock().await.total_at_start;
        let _ = self.events.send(QueueEvent::ExecutionStart { total_nodes: total });

        let ticker = {
            let mgr = self.clone();
            tokio::spawn(async move { mgr.progress_ticker().await })
        };

        loop {
            if self.user_stop.load(Ordering::SeqCst) {
                self.fail_all_pending("Flow stopped by user", &ctx).await;
                break;
            }

            self.promote(&ctx).await;

            if self.should_stop_flow.load(Ordering::SeqCst) {
                let executing = self.executing_count().await;
                let pending = self.pending_count().await;
                if executing == 0 && pending > 0 {
                    self.fail_all_pending("Flow stopped: a prior task failed", &ctx).await;
                    break;
                }
                if pending == 0 && executing == 0 {
                    break;
                }
                // Admissions are frozen; just wait for in-flight tasks.
                let _ = tokio::time::timeout(Duration::from_millis(50), self.notify.notified()).await;
                continue;
            }

            let started = self.start_ready(&registry, &ctx, &self).await;
            self.publish_stats().await;

            if !started {
                let executing = self.executing_count().await;
                let pending = self.pending_count().await;
                if executing == 0 && pending == 0 {
                    break;
                }
                let _ = tokio::time::timeout(Duration::from_millis(50), self.notify.notified()).await;
            }
        }

        ticker.abort();
        self.finish(&ctx).await;
    }

    async fn executing_count(&self) -> usize {
        self.state.lock().await.items.iter().filter(|i| i.status == QueueStatus::Executing).count()
    }

    async fn pending_count(&self) -> usize {
        self.state
            .lock()
            .await
            .items
            .iter()
            .filter(|i| matches!(i.status, QueueStatus::Waiting | QueueStatus::Queued))
            .count()
    }

    /// spec §4.5 step 2: cascade failures then promote ready waiters.
    ///
    /// Runs to a fixpoint in one call so a multi-level dependency chain
    /// (D depends on C depends on B-which-just-failed) fully propagates
    /// before the scheduling loop re-checks quiescence — otherwise a
    /// grandchild could still be `waiting` when the loop decides no
    /// executor is left to advance it and force-fails it with the
    /// generic stop message instead of naming its real failed ancestor.
    async fn promote(&self, ctx: &Arc<dyn ExecutionContext>) {
        let mut state = self.state.lock().await;
        let completed = state.completed.clone();
        let mut all_newly_failed = Vec::new();

        loop {
            let failed = state.failed.clone();
            let mut newly_failed = Vec::new();

            for item in state.items.iter_mut().filter(|i| i.status == QueueStatus::Waiting) {
                let failed_deps: Vec<&String> = item.dependencies.iter().filter(|d| failed.contains(*d)).collect();
                if !failed_deps.is_empty() {
                    let names = failed_deps.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ");
                    item.status = QueueStatus::Failed;
                    item.error = Some(format!("Dependency failed: {names}"));
                    item.completed_at = Some(Utc::now());
                    newly_failed.push(item.node_id.clone());
                } else if item.dependencies.iter().all(|d| completed.contains(d)) {
                    item.status = QueueStatus::Queued;
                }
            }

            if newly_failed.is_empty() {
                break;
            }
            for id in &newly_failed {
                state.failed.insert(id.clone());
            }
            all_newly_failed.extend(newly_failed);
        }
        drop(state);

        for id in &all_newly_failed {
            ctx.update_node_data(id, serde_json::json!({"queueStatus": "failed"}));
        }

        if !all_newly_failed.is_empty() {
            self.should_stop_flow.store(true, Ordering::SeqCst);
        }
    }

    /// spec §4.5 step 3: admit as many ready items as there are free slots,
    /// strict `(priority desc, added_at asc)` selection.
    async fn start_ready(
        &self,
        registry: &Arc<NodeRegistry>,
        ctx: &Arc<dyn ExecutionContext>,
        self_arc: &Arc<Self>,
    ) -> bool {
        let mut started = false;
        loop {
            let mut state = self.state.lock().await;
            let Some(slot) = state.worker_slots.iter().position(|occupied| !occupied) else { break };

            let best = state
                .items
                .iter()
                .enumerate()
                .filter(|(_, it)| it.status == QueueStatus::Queued)
                .max_by(|a, b| a.1.priority.cmp(&b.1.priority).then(b.1.added_at.cmp(&a.1.added_at)))
                .map(|(i, _)| i);

            let Some(idx) = best else { break };

            state.worker_slots[slot] = true;
            let now = Utc::now();
            let now_ms = now.timestamp_millis();
            if state.flow_start_ms.is_none() {
                state.flow_start_ms = Some(now_ms);
            }
            let flow_start = state.flow_start_ms.unwrap();

            state.items[idx].status = QueueStatus::Executing;
            state.items[idx].started_at = Some(now);
            state.items[idx].worker_id = Some(slot);
            state.items[idx].relative_start_ms = Some(now_ms - flow_start);

            let item_id = state.items[idx].id;
            let node_id = state.items[idx].node_id.clone();
            drop(state);

            ctx.update_node_data(&node_id, serde_json::json!({"queueStatus": "executing"}));
            started = true;

            let mgr = self_arc.clone();
            let registry = registry.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                mgr.run_item(item_id, node_id, slot, registry, ctx).await;
            });
        }
        started
    }

    /// spec §4.5 "run_item protocol".
    async fn run_item(
        self: Arc<Self>,
        item_id: Uuid,
        node_id: String,
        slot: usize,
        registry: Arc<NodeRegistry>,
        ctx: Arc<dyn ExecutionContext>,
    ) {
        let Some(node) = ctx.node(&node_id) else {
            self.finish_item(item_id, &node_id, slot, false, None, Some("no such node".into()), None, &ctx).await;
            return;
        };

        let Some(executor) = registry.get(&node.kind).cloned() else {
            // Inert kind with no registered executor: succeed trivially.
            self.finish_item(item_id, &node_id, slot, true, Some(serde_json::Value::Null), None, None, &ctx).await;
            return;
        };

        match executor.execute(&node, ctx.as_ref()).await {
            Ok(()) => match ctx.result(&node_id) {
                Some(result) if result.success => {
                    self.finish_item(item_id, &node_id, slot, true, result.output, None, result.stats, &ctx).await;
                }
                Some(result) => {
                    self.finish_item(item_id, &node_id, slot, false, None, result.error, None, &ctx).await;
                }
                None => {
                    self.finish_item(
                        item_id,
                        &node_id,
                        slot,
                        false,
                        None,
                        Some(format!("node '{node_id}' produced no result")),
                        None,
                        &ctx,
                    )
                    .await;
                }
            },
            Err(err) => {
                self.finish_item(item_id, &node_id, slot, false, None, Some(err.to_string()), None, &ctx).await;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_item(
        &self,
        item_id: Uuid,
        node_id: &str,
        slot: usize,
        success: bool,
        output: Option<serde_json::Value>,
        error: Option<String>,
        stats: Option<nodes::ExecutionStats>,
        ctx: &Arc<dyn ExecutionContext>,
    ) {
        let mut state = self.state.lock().await;
        state.worker_slots[slot] = false;

        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let flow_start = state.flow_start_ms.unwrap_or(now_ms);

        let duration_ms = if let Some(item) = state.items.iter().find(|i| i.id == item_id) {
            item.started_at.map(|s| (now - s).num_milliseconds())
        } else {
            None
        };
        let node_label = state.items.iter().find(|i| i.id == item_id).and_then(|i| i.node_label.clone());

        if let Some(item) = state.items.iter_mut().find(|i| i.id == item_id) {
            item.status = if success { QueueStatus::Completed } else { QueueStatus::Failed };
            item.completed_at = Some(now);
            item.relative_end_ms = Some(now_ms - flow_start);
            item.output = output.clone();
            item.stats = stats;
            item.error = error.clone();
        }

        if success {
            state.completed.insert(node_id.to_string());
        } else {
            state.failed.insert(node_id.to_string());
        }
        if let Some(d) = duration_ms {
            state.execution_durations_ms.push(d);
        }

        let completed = state.completed.len();
        let failed = state.failed.len();
        let total = state.total_at_start;
        drop(state);

        if !success {
            self.should_stop_flow.store(true, Ordering::SeqCst);
            warn!(node_id, error = error.as_deref(), "task failed; halting new admissions");
        }

        let badge_status = if success { "completed" } else { "failed" };
        let mut patch = serde_json::json!({"queueStatus": badge_status, "isExecuting": false});
        if let Some(err) = &error {
            patch["lastError"] = serde_json::json!(err);
        }
        ctx.update_node_data(node_id, patch);

        let percentage = if total > 0 { ((completed + failed) as f64 / total as f64) * 100.0 } else { 100.0 };
        let event = ProgressEvent {
            timestamp: now,
            node_id: node_id.to_string(),
            node_label,
            status: if success { ProgressStatus::Completed } else { ProgressStatus::Failed },
            duration_ms,
            error,
            progress: ProgressCounts { completed, failed, total, percentage },
        };

        if let Some(job) = &self.job_identity {
            info!(job_id = %job, node_id, success, "node execution finished");
        }
        let _ = self.events.send(QueueEvent::Progress(event));

        self.notify.notify_waiters();
    }

    /// spec §4.5 step 1 and the "Stop policy" paragraph: mark every
    /// non-terminal item failed, with the given message.
    async fn fail_all_pending(&self, message: &str, ctx: &Arc<dyn ExecutionContext>) {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut ids = Vec::new();
        for item in state.items.iter_mut() {
            if matches!(item.status, QueueStatus::Waiting | QueueStatus::Queued) {
                item.status = QueueStatus::Failed;
                item.error = Some(message.to_string());
                item.completed_at = Some(now);
                ids.push(item.node_id.clone());
            }
        }
        for id in &ids {
            state.failed.insert(id.clone());
        }
        drop(state);

        for id in ids {
            ctx.update_node_data(&id, serde_json::json!({"queueStatus": "failed", "lastError": message}));
        }
    }

    async fn finish(&self, _ctx: &Arc<dyn ExecutionContext>) {
        let mut state = self.state.lock().await;
        if state.flow_end_ms.is_none() {
            state.flow_end_ms = Some(Utc::now().timestamp_millis());
        }
        let flow_start = state.flow_start_ms.unwrap_or_else(|| Utc::now().timestamp_millis());
        let flow_end = state.flow_end_ms.unwrap();
        let completed = state.completed.len();
        let failed = state.failed.len();
        let total = state.total_at_start;
        drop(state);

        let _ = self.events.send(QueueEvent::ExecutionComplete {
            completed,
            failed,
            total,
            duration_ms: flow_end - flow_start,
        });
    }

    async fn publish_stats(&self) {
        let stats = self.snapshot_stats().await;
        let _ = self.events.send(QueueEvent::Stats(stats));
    }

    async fn snapshot_stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        let total_queued = state.items.iter().filter(|i| i.status == QueueStatus::Queued).count();
        let executing = state.items.iter().filter(|i| i.status == QueueStatus::Executing).count();
        let waiting = state.items.iter().filter(|i| i.status == QueueStatus::Waiting).count();
        let active_workers = state.worker_slots.iter().filter(|&&occupied| occupied).count();
        let average_execution_time = if state.execution_durations_ms.is_empty() {
            0.0
        } else {
            state.execution_durations_ms.iter().sum::<i64>() as f64 / state.execution_durations_ms.len() as f64
        };

        QueueStats {
            total_queued,
            executing,
            completed: state.completed.len(),
            failed: state.failed.len(),
            waiting,
            active_workers,
            max_workers: self.max_workers,
            average_execution_time,
        }
    }

    /// ~10 Hz snapshot while any worker slot is occupied (spec §4.5).
    async fn progress_ticker(self: Arc<Self>) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            interval.tick().await;
            let active = self.state.lock().await.worker_slots.iter().any(|&occupied| occupied);
            if active {
                self.publish_stats().await;
            }
        }
    }
}
