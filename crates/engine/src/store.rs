//! The state store contract: the abstract persistence interface the
//! orchestrator and task runner use.
//!
//! `PgRunStore` is the production implementation, a thin wrapper over
//! `db::repository`. `InMemoryRunStore` is a test double so the orchestrator
//! can be exercised end-to-end without a live Postgres instance, the same
//! way `executor_tests.rs` already tests the task-execution path with
//! `MockNode` instead of a real executor.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use db::models::{TaskRunRow, WorkflowRow, WorkflowRunRow};
use db::DbPool;
use serde_json::Value;
use uuid::Uuid;

use crate::EngineError;

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn get_workflow(&self, workflow_id: Uuid) -> Result<WorkflowRow, EngineError>;
    /// Active workflows with a non-null `schedule`, for the scheduler to
    /// register at startup.
    async fn list_scheduled_workflows(&self) -> Result<Vec<WorkflowRow>, EngineError>;

    async fn create_run(&self, workflow_id: Uuid) -> Result<WorkflowRunRow, EngineError>;
    async fn update_run_status(&self, run_id: Uuid, status: &str, finished: bool) -> Result<(), EngineError>;

    async fn create_task_run(&self, run_id: Uuid, task_id: &str) -> Result<TaskRunRow, EngineError>;
    async fn create_retry_attempt(&self, previous: &TaskRunRow) -> Result<TaskRunRow, EngineError>;
    async fn set_task_run_running(&self, id: Uuid, log: &str) -> Result<(), EngineError>;
    async fn finish_task_run(
        &self,
        id: Uuid,
        status: &str,
        result: Option<Value>,
        log: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<(), EngineError>;
    async fn list_task_runs(&self, run_id: Uuid) -> Result<Vec<TaskRunRow>, EngineError>;
}

// ---------------------------------------------------------------------------
// PgRunStore — production implementation backed by `db`.
// ---------------------------------------------------------------------------

pub struct PgRunStore {
    pool: DbPool,
}

impl PgRunStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn get_workflow(&self, workflow_id: Uuid) -> Result<WorkflowRow, EngineError> {
        Ok(db::repository::workflows::get_workflow(&self.pool, workflow_id).await?)
    }

    async fn list_scheduled_workflows(&self) -> Result<Vec<WorkflowRow>, EngineError> {
        Ok(db::repository::workflows::list_scheduled_workflows(&self.pool).await?)
    }

    async fn create_run(&self, workflow_id: Uuid) -> Result<WorkflowRunRow, EngineError> {
        Ok(db::repository::runs::create_run(&self.pool, workflow_id).await?)
    }

    async fn update_run_status(&self, run_id: Uuid, status: &str, finished: bool) -> Result<(), EngineError> {
        Ok(db::repository::runs::update_run_status(&self.pool, run_id, status, finished).await?)
    }

    async fn create_task_run(&self, run_id: Uuid, task_id: &str) -> Result<TaskRunRow, EngineError> {
        Ok(db::repository::runs::create_task_run(&self.pool, run_id, task_id).await?)
    }

    async fn create_retry_attempt(&self, previous: &TaskRunRow) -> Result<TaskRunRow, EngineError> {
        Ok(db::repository::runs::create_retry_attempt(&self.pool, previous).await?)
    }

    async fn set_task_run_running(&self, id: Uuid, log: &str) -> Result<(), EngineError> {
        Ok(db::repository::runs::set_task_run_running(&self.pool, id, log).await?)
    }

    async fn finish_task_run(
        &self,
        id: Uuid,
        status: &str,
        result: Option<Value>,
        log: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        Ok(db::repository::runs::finish_task_run(&self.pool, id, status, result, log, finished_at).await?)
    }

    async fn list_task_runs(&self, run_id: Uuid) -> Result<Vec<TaskRunRow>, EngineError> {
        Ok(db::repository::runs::list_task_runs(&self.pool, run_id).await?)
    }
}

// ---------------------------------------------------------------------------
// InMemoryRunStore — test double.
// ---------------------------------------------------------------------------

#[derive(Default)]
struct InMemoryState {
    workflows: HashMap<Uuid, WorkflowRow>,
    runs: HashMap<Uuid, WorkflowRunRow>,
    task_runs: HashMap<Uuid, TaskRunRow>,
}

/// In-process, Mutex-guarded store for engine-level tests.
pub struct InMemoryRunStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self { state: Mutex::new(InMemoryState::default()) }
    }

    /// Seed a workflow definition so `get_workflow`/`create_run` can find it.
    pub fn insert_workflow(&self, row: WorkflowRow) {
        self.state.lock().unwrap().workflows.insert(row.id, row);
    }
}

impl Default for InMemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn get_workflow(&self, workflow_id: Uuid) -> Result<WorkflowRow, EngineError> {
        self.state
            .lock()
            .unwrap()
            .workflows
            .get(&workflow_id)
            .cloned()
            .ok_or_else(|| EngineError::Database(db::DbError::NotFound))
    }

    async fn list_scheduled_workflows(&self) -> Result<Vec<WorkflowRow>, EngineError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .workflows
            .values()
            .filter(|w| w.schedule.is_some() && w.status == "active")
            .cloned()
            .collect())
    }

    async fn create_run(&self, workflow_id: Uuid) -> Result<WorkflowRunRow, EngineError> {
        let row = WorkflowRunRow {
            id: Uuid::new_v4(),
            workflow_id,
            status: "pending".to_string(),
            started_at: Utc::now(),
            finished_at: None,
        };
        self.state.lock().unwrap().runs.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_run_status(&self, run_id: Uuid, status: &str, finished: bool) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if let Some(run) = state.runs.get_mut(&run_id) {
            if !matches!(run.status.as_str(), "success" | "failed") {
                run.status = status.to_string();
                if finished {
                    run.finished_at = Some(Utc::now());
                }
            }
        }
        Ok(())
    }

    async fn create_task_run(&self, run_id: Uuid, task_id: &str) -> Result<TaskRunRow, EngineError> {
        let row = TaskRunRow {
            id: Uuid::new_v4(),
            workflow_run_id: run_id,
            task_id: task_id.to_string(),
            attempt: 0,
            status: "pending".to_string(),
            result: None,
            log: String::new(),
            started_at: Utc::now(),
            finished_at: None,
        };
        self.state.lock().unwrap().task_runs.insert(row.id, row.clone());
        Ok(row)
    }

    async fn create_retry_attempt(&self, previous: &TaskRunRow) -> Result<TaskRunRow, EngineError> {
        let row = TaskRunRow {
            id: Uuid::new_v4(),
            workflow_run_id: previous.workflow_run_id,
            task_id: previous.task_id.clone(),
            attempt: previous.attempt + 1,
            status: "pending".to_string(),
            result: None,
            log: previous.log.clone(),
            started_at: Utc::now(),
            finished_at: None,
        };
        self.state.lock().unwrap().task_runs.insert(row.id, row.clone());
        Ok(row)
    }

    async fn set_task_run_running(&self, id: Uuid, log: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if let Some(row) = state.task_runs.get_mut(&id) {
            row.status = "running".to_string();
            row.log = log.to_string();
        }
        Ok(())
    }

    async fn finish_task_run(
        &self,
        id: Uuid,
        status: &str,
        result: Option<Value>,
        log: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if let Some(row) = state.task_runs.get_mut(&id) {
            if !matches!(row.status.as_str(), "success" | "failed" | "skipped") {
                row.status = status.to_string();
                row.result = result;
                row.log = log.to_string();
                row.finished_at = Some(finished_at);
            }
        }
        Ok(())
    }

    async fn list_task_runs(&self, run_id: Uuid) -> Result<Vec<TaskRunRow>, EngineError> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<TaskRunRow> = state
            .task_runs
            .values()
            .filter(|r| r.workflow_run_id == run_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.started_at);
        Ok(rows)
    }
}
