//! Workflow CRUD operations, plus the schedule lookups the scheduler needs.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{models::WorkflowRow, DbError};

/// Insert a new workflow into the database in `active` status.
///
/// `definition` must be a valid JSON DAG document (the caller validates it
/// against `engine::validate_dag` before calling this).
pub async fn create_workflow(
    pool: &PgPool,
    name: &str,
    definition: serde_json::Value,
    schedule: Option<&str>,
) -> Result<WorkflowRow, DbError> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    let row = sqlx::query_as!(
        WorkflowRow,
        r#"
        INSERT INTO workflows (id, name, definition, schedule, status, created_at)
        VALUES ($1, $2, $3, $4, 'active', $5)
        RETURNING id, name, definition, schedule, status, created_at
        "#,
        id,
        name,
        definition,
        schedule,
        now,
    )
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetch a single workflow by its primary key.
pub async fn get_workflow(pool: &PgPool, id: Uuid) -> Result<WorkflowRow, DbError> {
    let row = sqlx::query_as!(
        WorkflowRow,
        r#"SELECT id, name, definition, schedule, status, created_at FROM workflows WHERE id = $1"#,
        id,
    )
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Return all workflows ordered by creation time (newest first).
pub async fn list_workflows(pool: &PgPool) -> Result<Vec<WorkflowRow>, DbError> {
    let rows = sqlx::query_as!(
        WorkflowRow,
        r#"SELECT id, name, definition, schedule, status, created_at FROM workflows ORDER BY created_at DESC"#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Return every `active` workflow carrying a non-null `schedule` — the set
/// the scheduler registers as periodic triggers on startup.
pub async fn list_scheduled_workflows(pool: &PgPool) -> Result<Vec<WorkflowRow>, DbError> {
    let rows = sqlx::query_as!(
        WorkflowRow,
        r#"
        SELECT id, name, definition, schedule, status, created_at
        FROM workflows
        WHERE status = 'active' AND schedule IS NOT NULL
        ORDER BY created_at ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Update a workflow's schedule (`POST /workflows/{id}/schedule`).
pub async fn set_schedule(pool: &PgPool, id: Uuid, schedule: Option<&str>) -> Result<(), DbError> {
    let result = sqlx::query!(
        "UPDATE workflows SET schedule = $1 WHERE id = $2",
        schedule,
        id,
    )
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Permanently delete a workflow by its primary key.
///
/// Returns `DbError::NotFound` if no row was deleted.
pub async fn delete_workflow(pool: &PgPool, id: Uuid) -> Result<(), DbError> {
    let result = sqlx::query!("DELETE FROM workflows WHERE id = $1", id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}
