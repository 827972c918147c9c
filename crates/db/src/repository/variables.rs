//! Variable store repository functions, backing `nodes::VariableStore`
//! persistence across runs (spec §6 "Persisted state").
//!
//! `workflow_id = NULL` is a global variable; `Some(id)` is workflow-scoped,
//! mirroring the `workflow:` key prefix the in-memory store uses.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, models::VariableRow};

/// Insert or update a variable by `(workflow_id, name)`.
///
/// Global and workflow-scoped rows live under two different partial
/// unique indexes (`workflow_id IS NULL` vs. `IS NOT NULL`) since Postgres
/// treats every `NULL` as distinct for a plain composite constraint — a
/// single `ON CONFLICT (workflow_id, name)` can't target both, so this
/// branches on which index applies.
pub async fn upsert_variable(
    pool: &PgPool,
    workflow_id: Option<Uuid>,
    name: &str,
    value: &str,
    kind: &str,
    description: Option<&str>,
    folder: Option<&str>,
) -> Result<VariableRow, DbError> {
    let now = Utc::now();

    let row = match workflow_id {
        None => {
            sqlx::query_as!(
                VariableRow,
                r#"
                INSERT INTO variables (workflow_id, name, value, kind, description, folder, updated_at)
                VALUES (NULL, $1, $2, $3, $4, $5, $6)
                ON CONFLICT (name) WHERE workflow_id IS NULL DO UPDATE
                SET value = EXCLUDED.value,
                    kind = EXCLUDED.kind,
                    description = COALESCE(EXCLUDED.description, variables.description),
                    folder = COALESCE(EXCLUDED.folder, variables.folder),
                    updated_at = EXCLUDED.updated_at
                RETURNING workflow_id, name, value, kind, description, folder, updated_at
                "#,
                name,
                value,
                kind,
                description,
                folder,
                now,
            )
            .fetch_one(pool)
            .await?
        }
        Some(workflow_id) => {
            sqlx::query_as!(
                VariableRow,
                r#"
                INSERT INTO variables (workflow_id, name, value, kind, description, folder, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (workflow_id, name) WHERE workflow_id IS NOT NULL DO UPDATE
                SET value = EXCLUDED.value,
                    kind = EXCLUDED.kind,
                    description = COALESCE(EXCLUDED.description, variables.description),
                    folder = COALESCE(EXCLUDED.folder, variables.folder),
                    updated_at = EXCLUDED.updated_at
                RETURNING workflow_id, name, value, kind, description, folder, updated_at
                "#,
                workflow_id,
                name,
                value,
                kind,
                description,
                folder,
                now,
            )
            .fetch_one(pool)
            .await?
        }
    };

    Ok(row)
}

/// List every global variable (`workflow_id IS NULL`).
pub async fn list_globals(pool: &PgPool) -> Result<Vec<VariableRow>, DbError> {
    let rows = sqlx::query_as!(
        VariableRow,
        r#"
        SELECT workflow_id, name, value, kind, description, folder, updated_at
        FROM variables
        WHERE workflow_id IS NULL
        ORDER BY name ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// List every variable scoped to one workflow run.
pub async fn list_for_workflow(pool: &PgPool, workflow_id: Uuid) -> Result<Vec<VariableRow>, DbError> {
    let rows = sqlx::query_as!(
        VariableRow,
        r#"
        SELECT workflow_id, name, value, kind, description, folder, updated_at
        FROM variables
        WHERE workflow_id = $1
        ORDER BY name ASC
        "#,
        workflow_id,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Delete a global variable by name. `DbError::NotFound` if absent.
pub async fn delete_global(pool: &PgPool, name: &str) -> Result<(), DbError> {
    let result = sqlx::query!(
        "DELETE FROM variables WHERE workflow_id IS NULL AND name = $1",
        name,
    )
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Purge every variable scoped to one workflow run (spec §3 "workflow
/// variables are considered ephemeral and may be purged as a set").
pub async fn clear_workflow_namespace(pool: &PgPool, workflow_id: Uuid) -> Result<(), DbError> {
    sqlx::query!("DELETE FROM variables WHERE workflow_id = $1", workflow_id)
        .execute(pool)
        .await?;
    Ok(())
}
