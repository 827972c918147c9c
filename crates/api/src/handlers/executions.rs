use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;
use super::AppState;
use db::repository::{executions as exec_repo, jobs as job_repo, queue_snapshots as snap_repo, workflows as wf_repo};
use engine::{Workflow, WorkflowExecutor};

#[derive(serde::Deserialize)]
pub struct ExecuteWorkflowDto {
    pub input: Value,
}

/// What `execute` returns once the in-process run has finished. `job_id`
/// is kept in the body purely for audit/parity with the `job_queue` row —
/// the headless worker never touches this job, since it was already moved
/// to a terminal status before the response went out.
#[derive(Serialize)]
pub struct ExecuteResponse {
    pub execution_id: Uuid,
    pub job_id: Uuid,
    pub success: bool,
    pub executed: usize,
    pub failed: usize,
    pub duration_ms: i64,
}

/// Runs the workflow synchronously in-process via a `LiveContext` +
/// `QueueManager` (spec §9), writing a `job_queue` row alongside it for
/// audit/parity with the scaffold's original enqueue-only contract.
pub async fn execute(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<ExecuteWorkflowDto>,
) -> Result<(StatusCode, Json<ExecuteResponse>), StatusCode> {
    let row = match wf_repo::get_workflow(&state.pool, id).await {
        Ok(row) => row,
        Err(db::DbError::NotFound) => return Err(StatusCode::NOT_FOUND),
        Err(_) => return Err(StatusCode::INTERNAL_SERVER_ERROR),
    };
    let workflow: Workflow = serde_json::from_value(row.definition).map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;

    let exec = exec_repo::create_execution(&state.pool, id).await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let job = job_repo::enqueue_job(&state.pool, exec.id, id, payload.input.clone())
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let executor = WorkflowExecutor::new(state.pool.clone(), state.registry.clone(), state.max_workers);
    let result = executor.run(&workflow, exec.id, payload.input).await;

    let (success, executed, failed, duration_ms) = match &result {
        Ok(summary) => (summary.success, summary.executed, summary.failed, summary.duration_ms),
        Err(err) => {
            tracing::warn!(execution_id = %exec.id, error = %err, "in-process execution failed");
            (false, 0, 0, 0)
        }
    };

    let terminal_status = if success { "completed" } else { "failed" };
    let _ = job_repo::mark_job_terminal(&state.pool, job.id, terminal_status).await;

    Ok((
        StatusCode::OK,
        Json(ExecuteResponse { execution_id: exec.id, job_id: job.id, success, executed, failed, duration_ms }),
    ))
}

/// One-shot snapshot of the last broadcast `QueueStats`/items for an
/// execution (spec §9) — reads the `queue_snapshots` row the executor kept
/// refreshed while it ran, falling back to the execution's own status row
/// for a run whose first event hasn't landed yet (or that predates the
/// snapshot table).
pub async fn progress(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Value>, StatusCode> {
    let snapshot = snap_repo::get_snapshot(&state.pool, id).await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if let Some(snap) = snapshot {
        return Ok(Json(serde_json::json!({
            "execution_id": snap.execution_id,
            "items": snap.items,
            "updated_at": snap.updated_at,
        })));
    }

    match exec_repo::get_execution(&state.pool, id).await {
        Ok(exec) => Ok(Json(serde_json::json!({
            "execution_id": exec.id,
            "status": exec.status,
            "items": [],
        }))),
        Err(db::DbError::NotFound) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}
