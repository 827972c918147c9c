//! `queue_snapshots` repository — the last-known `QueueItem` list for an
//! execution, refreshed while the API drives a workflow in-process
//! (spec §4.5 "Progress contract"; §9 External interfaces).

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{models::QueueSnapshotRow, DbError};

/// Upsert the snapshot for `execution_id`, replacing whatever was there.
pub async fn upsert_snapshot(
    pool: &PgPool,
    execution_id: Uuid,
    items: serde_json::Value,
) -> Result<(), DbError> {
    sqlx::query!(
        r#"
        INSERT INTO queue_snapshots (execution_id, items, updated_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (execution_id) DO UPDATE
        SET items = EXCLUDED.items, updated_at = EXCLUDED.updated_at
        "#,
        execution_id,
        items,
        Utc::now(),
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch the last snapshot recorded for `execution_id`, if any.
pub async fn get_snapshot(
    pool: &PgPool,
    execution_id: Uuid,
) -> Result<Option<QueueSnapshotRow>, DbError> {
    let row = sqlx::query_as!(
        QueueSnapshotRow,
        r#"SELECT execution_id, items, updated_at FROM queue_snapshots WHERE execution_id = $1"#,
        execution_id,
    )
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
