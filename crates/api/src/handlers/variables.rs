//! Variable store CRUD (spec §6 "Persisted state" — globals plus
//! per-workflow runtime variables).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use db::repository::variables as var_repo;
use nodes::VariableKind;
use super::AppState;

#[derive(serde::Deserialize)]
pub struct UpsertVariableDto {
    pub name: String,
    pub value: String,
    pub description: Option<String>,
    pub folder: Option<String>,
}

/// `GET /api/v1/variables` — every global variable.
pub async fn list_globals(
    State(state): State<AppState>,
) -> Result<Json<Vec<db::models::VariableRow>>, StatusCode> {
    match var_repo::list_globals(&state.pool).await {
        Ok(rows) => Ok(Json(rows)),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// `PUT /api/v1/variables` — create or update a global variable.
pub async fn upsert_global(
    State(state): State<AppState>,
    Json(payload): Json<UpsertVariableDto>,
) -> Result<Json<db::models::VariableRow>, StatusCode> {
    let kind = VariableKind::detect(&payload.value);
    let kind_str = serde_json::to_value(kind)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "string".to_string());

    match var_repo::upsert_variable(
        &state.pool,
        None,
        &payload.name,
        &payload.value,
        &kind_str,
        payload.description.as_deref(),
        payload.folder.as_deref(),
    )
    .await
    {
        Ok(row) => Ok(Json(row)),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// `DELETE /api/v1/variables/:name` — remove a global variable.
pub async fn delete_global(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> Result<StatusCode, StatusCode> {
    match var_repo::delete_global(&state.pool, &name).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(db::DbError::NotFound) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// `GET /api/v1/workflows/:id/variables` — every variable scoped to one
/// workflow run.
pub async fn list_for_workflow(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Vec<db::models::VariableRow>>, StatusCode> {
    match var_repo::list_for_workflow(&state.pool, id).await {
        Ok(rows) => Ok(Json(rows)),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}
