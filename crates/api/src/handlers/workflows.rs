//! Workflow CRUD handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;
use uuid::Uuid;

use super::AppState;
use db::repository::workflows as wf_repo;
use engine::{validate_dag, DagDocument};

#[derive(serde::Deserialize)]
pub struct CreateWorkflowDto {
    pub name: String,
    pub definition: Value,
    #[serde(default)]
    pub schedule: Option<String>,
}

#[derive(serde::Deserialize)]
pub struct SetScheduleDto {
    pub cron: String,
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<db::models::WorkflowRow>>, StatusCode> {
    match wf_repo::list_workflows(&state.pool).await {
        Ok(workflows) => Ok(Json(workflows)),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<db::models::WorkflowRow>, StatusCode> {
    match wf_repo::get_workflow(&state.pool, id).await {
        Ok(wf) => Ok(Json(wf)),
        Err(db::DbError::NotFound) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// `definition` must be a valid `DagDocument`; the validator runs before
/// anything is persisted — a malformed DAG never reaches the database.
pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<CreateWorkflowDto>,
) -> Result<(StatusCode, Json<db::models::WorkflowRow>), StatusCode> {
    let dag: DagDocument =
        serde_json::from_value(payload.definition.clone()).map_err(|_| StatusCode::BAD_REQUEST)?;
    validate_dag(&dag).map_err(|_| StatusCode::BAD_REQUEST)?;

    match wf_repo::create_workflow(&state.pool, &payload.name, payload.definition, payload.schedule.as_deref()).await
    {
        Ok(wf) => Ok((StatusCode::CREATED, Json(wf))),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

pub async fn delete(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<StatusCode, StatusCode> {
    match wf_repo::delete_workflow(&state.pool, id).await {
        Ok(_) => Ok(StatusCode::NO_CONTENT),
        Err(db::DbError::NotFound) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// `POST /workflows/{id}/schedule`. Persists the cron expression;
/// picked up by the `scheduler` process's next `register_all` pass — this
/// API process does not hold a live `Scheduler` handle (see DESIGN.md).
pub async fn set_schedule(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<SetScheduleDto>,
) -> Result<StatusCode, StatusCode> {
    if engine::scheduler::normalize_cron(&payload.cron).is_err() {
        return Err(StatusCode::BAD_REQUEST);
    }

    match wf_repo::set_schedule(&state.pool, id, Some(payload.cron.as_str())).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(db::DbError::NotFound) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}
