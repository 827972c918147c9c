//! `WorkflowExecutor` — runs a persisted [`Workflow`] end to end against a
//! [`crate::context::LiveContext`], for the API/worker path (spec §4.1,
//! §4.5, §9).
//!
//! This is the DB-backed sibling of [`crate::driver::run`]: same planning
//! step (topological order → priority-ranked `QueueItem`s) and the same
//! `QueueManager`, but variables are seeded from and results mirrored back
//! to Postgres instead of staying purely in memory for the call's
//! duration. Per-node retry lives entirely inside each `nodes::kinds`
//! implementation (spec §4.4) — this executor never retries a node itself.

use std::sync::Arc;

use nodes::{Edge as NodesEdge, ExecutionContext, NodeRegistry, VariableStore};
use queue::QueueManager;
use uuid::Uuid;

use db::DbPool;

use crate::context::LiveContext;
use crate::dag::validate_dag;
use crate::driver::plan_queue_items;
use crate::models::Workflow;
use crate::EngineError;

/// Upper bound on caller-supplied `max_workers` (spec §4.6 step 2), shared
/// with the headless driver.
const MAX_WORKERS: usize = 25;

/// What a DB-backed run produced, mirroring `driver::DriverSummary` minus
/// the `skipped` count — the API/worker path always starts a fresh run.
#[derive(Debug, Clone)]
pub struct ExecutionSummary {
    pub success: bool,
    pub executed: usize,
    pub failed: usize,
    pub duration_ms: i64,
}

/// Mirrors `manager`'s queue items into `queue_snapshots` on every broadcast
/// event, so `GET /api/v1/executions/:id/progress` (spec §9) can answer from
/// Postgres without holding this run's `QueueManager` open.
async fn snapshot_loop(manager: Arc<QueueManager>, pool: DbPool, execution_id: Uuid) {
    let mut events = manager.subscribe();
    loop {
        match events.recv().await {
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
        let items = manager.items().await;
        let Ok(json) = serde_json::to_value(items) else { continue };
        let _ = db::repository::queue_snapshots::upsert_snapshot(&pool, execution_id, json).await;
    }
}

/// Runs workflows against a fixed node registry and worker-slot cap.
/// Construct one per worker process; it holds no per-run state.
pub struct WorkflowExecutor {
    pool: DbPool,
    registry: Arc<NodeRegistry>,
    max_workers: usize,
}

impl WorkflowExecutor {
    pub fn new(pool: DbPool, registry: Arc<NodeRegistry>, max_workers: usize) -> Self {
        Self { pool, registry, max_workers: max_workers.clamp(1, MAX_WORKERS) }
    }

    /// Run `workflow` under `execution_id` (already created as a `pending`
    /// row by the caller), seeding the workflow-scoped `input` variable
    /// from the job payload and merging it with whatever global and
    /// workflow-scoped variables are already on file in Postgres.
    pub async fn run(
        &self,
        workflow: &Workflow,
        execution_id: Uuid,
        input: serde_json::Value,
    ) -> Result<ExecutionSummary, EngineError> {
        validate_dag(workflow)?;

        let mut variables = VariableStore::new();
        for row in db::repository::variables::list_globals(&self.pool).await? {
            variables.upsert_global(&row.name, &row.value, row.description, row.folder);
        }
        for row in db::repository::variables::list_for_workflow(&self.pool, workflow.id).await? {
            variables.upsert_workflow(&row.name, &row.value);
        }
        let input_text = match &input {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        variables.upsert_workflow("input", &input_text);

        let graph_nodes: Vec<nodes::Node> = workflow.nodes.iter().map(|n| n.to_node()).collect();
        let graph_edges: Vec<NodesEdge> =
            workflow.edges.iter().map(|e| NodesEdge { from: e.from.clone(), to: e.to.clone() }).collect();

        let ctx: Arc<dyn ExecutionContext> = Arc::new(LiveContext::new(
            self.pool.clone(),
            execution_id,
            workflow.id,
            graph_nodes,
            graph_edges,
            variables,
            self.registry.clone(),
        ));

        db::repository::executions::update_execution_status(&self.pool, execution_id, "running", false)
            .await?;

        let manager =
            Arc::new(QueueManager::new(self.max_workers).with_job_identity(execution_id.to_string()));
        let items = plan_queue_items(workflow)?;
        manager.enqueue(items).await;

        let snapshotter = {
            let mgr = manager.clone();
            let pool = self.pool.clone();
            tokio::spawn(async move { snapshot_loop(mgr, pool, execution_id).await })
        };

        manager.clone().run(self.registry.clone(), ctx.clone()).await;
        snapshotter.abort();
        let _ = db::repository::queue_snapshots::upsert_snapshot(
            &self.pool,
            execution_id,
            serde_json::to_value(manager.items().await).unwrap_or(serde_json::Value::Null),
        )
        .await;

        let failed = manager.failed_ids().await.len();
        let executed = manager.completed_ids().await.len();
        let duration_ms = manager.flow_duration_ms().await.unwrap_or(0);
        let success = failed == 0 && !manager.was_stopped();

        let status = if success { "succeeded" } else { "failed" };
        db::repository::executions::update_execution_status(&self.pool, execution_id, status, true).await?;

        Ok(ExecutionSummary { success, executed, failed, duration_ms })
    }
}
