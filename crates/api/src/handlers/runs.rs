//! Workflow-run triggering and monitoring handlers.
//!
//! Per the Open Question decision in DESIGN.md, triggering is
//! fire-and-forget: `trigger` persists a `workflow_runs` row and a
//! `job_queue` row, then returns `202 Accepted` immediately. The `worker`
//! CLI subcommand polls `job_queue` and drives the orchestrator; callers
//! poll `GET /workflow_runs/{id}` for the terminal status.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;
use uuid::Uuid;

use super::AppState;
use db::repository::{jobs as job_repo, runs as run_repo, workflows as wf_repo};

#[derive(serde::Deserialize, Default)]
pub struct TriggerRunDto {
    #[serde(default)]
    pub input: Value,
}

/// `POST /workflows/{id}/run`.
pub async fn trigger(
    Path(workflow_id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<TriggerRunDto>,
) -> Result<(StatusCode, Json<db::models::WorkflowRunRow>), StatusCode> {
    wf_repo::get_workflow(&state.pool, workflow_id).await.map_err(|e| match e {
        db::DbError::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    })?;

    let run = run_repo::create_run(&state.pool, workflow_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    job_repo::enqueue_job(&state.pool, run.id, workflow_id, payload.input)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((StatusCode::ACCEPTED, Json(run)))
}

/// `GET /workflow_runs/{id}`.
pub async fn get_run(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<db::models::WorkflowRunRow>, StatusCode> {
    match run_repo::get_run(&state.pool, id).await {
        Ok(run) => Ok(Json(run)),
        Err(db::DbError::NotFound) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// `GET /task_runs/{id}`.
pub async fn get_task_run(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<db::models::TaskRunRow>, StatusCode> {
    match run_repo::get_task_run(&state.pool, id).await {
        Ok(row) => Ok(Json(row)),
        Err(db::DbError::NotFound) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}
