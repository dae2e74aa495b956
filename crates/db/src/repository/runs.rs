//! Workflow-run and task-run repository functions.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    models::{TaskRunRow, WorkflowRunRow},
    DbError,
};

// ---------------------------------------------------------------------------
// workflow_runs
// ---------------------------------------------------------------------------

/// Create a new workflow run record in `pending` status.
pub async fn create_run(pool: &PgPool, workflow_id: Uuid) -> Result<WorkflowRunRow, DbError> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    let row = sqlx::query_as!(
        WorkflowRunRow,
        r#"
        INSERT INTO workflow_runs (id, workflow_id, status, started_at)
        VALUES ($1, $2, 'pending', $3)
        RETURNING id, workflow_id, status, started_at, finished_at
        "#,
        id,
        workflow_id,
        now,
    )
    .fetch_one(pool)
    .await?;

    Ok(row)
}

pub async fn get_run(pool: &PgPool, id: Uuid) -> Result<WorkflowRunRow, DbError> {
    sqlx::query_as!(
        WorkflowRunRow,
        r#"SELECT id, workflow_id, status, started_at, finished_at FROM workflow_runs WHERE id = $1"#,
        id,
    )
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Update the `status` (and optionally `finished_at`) of a workflow run.
///
/// Once a run is in a terminal status (`success`/`failed`) further updates
/// are no-ops — transitions are monotonic.
pub async fn update_run_status(
    pool: &PgPool,
    run_id: Uuid,
    status: &str,
    finished: bool,
) -> Result<(), DbError> {
    if finished {
        sqlx::query!(
            r#"
            UPDATE workflow_runs
            SET status = $1, finished_at = $2
            WHERE id = $3 AND status NOT IN ('success', 'failed')
            "#,
            status,
            Utc::now(),
            run_id,
        )
        .execute(pool)
        .await?;
    } else {
        sqlx::query!(
            r#"UPDATE workflow_runs SET status = $1 WHERE id = $2 AND status NOT IN ('success', 'failed')"#,
            status,
            run_id,
        )
        .execute(pool)
        .await?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// task_runs
// ---------------------------------------------------------------------------

/// Create a new task-run row (attempt 0, `pending`) for a DAG node.
pub async fn create_task_run(
    pool: &PgPool,
    workflow_run_id: Uuid,
    task_id: &str,
) -> Result<TaskRunRow, DbError> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    let row = sqlx::query_as!(
        TaskRunRow,
        r#"
        INSERT INTO task_runs
            (id, workflow_run_id, task_id, attempt, status, result, log, started_at, finished_at)
        VALUES ($1, $2, $3, 0, 'pending', NULL, '', $4, NULL)
        RETURNING id, workflow_run_id, task_id, attempt, status, result, log, started_at, finished_at
        "#,
        id,
        workflow_run_id,
        task_id,
        now,
    )
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Create the next attempt row for a task being retried, carrying over the
/// accumulated log.
pub async fn create_retry_attempt(
    pool: &PgPool,
    previous: &TaskRunRow,
) -> Result<TaskRunRow, DbError> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    let attempt = previous.attempt + 1;

    let row = sqlx::query_as!(
        TaskRunRow,
        r#"
        INSERT INTO task_runs
            (id, workflow_run_id, task_id, attempt, status, result, log, started_at, finished_at)
        VALUES ($1, $2, $3, $4, 'pending', NULL, $5, $6, NULL)
        RETURNING id, workflow_run_id, task_id, attempt, status, result, log, started_at, finished_at
        "#,
        id,
        previous.workflow_run_id,
        previous.task_id,
        attempt,
        previous.log,
        now,
    )
    .fetch_one(pool)
    .await?;

    Ok(row)
}

pub async fn set_task_run_running(pool: &PgPool, id: Uuid, log: &str) -> Result<(), DbError> {
    sqlx::query!(
        r#"UPDATE task_runs SET status = 'running', log = $1 WHERE id = $2"#,
        log,
        id,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Finish a task run with a terminal status, persisting its result and log.
pub async fn finish_task_run(
    pool: &PgPool,
    id: Uuid,
    status: &str,
    result: Option<serde_json::Value>,
    log: &str,
    finished_at: DateTime<Utc>,
) -> Result<(), DbError> {
    sqlx::query!(
        r#"
        UPDATE task_runs
        SET status = $1, result = $2, log = $3, finished_at = $4
        WHERE id = $5 AND status NOT IN ('success', 'failed', 'skipped')
        "#,
        status,
        result,
        log,
        finished_at,
        id,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// All task-run rows (every attempt) for a workflow run, oldest first.
pub async fn list_task_runs(pool: &PgPool, workflow_run_id: Uuid) -> Result<Vec<TaskRunRow>, DbError> {
    let rows = sqlx::query_as!(
        TaskRunRow,
        r#"
        SELECT id, workflow_run_id, task_id, attempt, status, result, log, started_at, finished_at
        FROM task_runs
        WHERE workflow_run_id = $1
        ORDER BY started_at ASC
        "#,
        workflow_run_id,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

pub async fn get_task_run(pool: &PgPool, id: Uuid) -> Result<TaskRunRow, DbError> {
    sqlx::query_as!(
        TaskRunRow,
        r#"
        SELECT id, workflow_run_id, task_id, attempt, status, result, log, started_at, finished_at
        FROM task_runs
        WHERE id = $1
        "#,
        id,
    )
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}
