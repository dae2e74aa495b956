//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

/// Errors produced by the workflow engine (validation, orchestration, and
/// task execution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation errors ------
    #[error("DAG has no tasks")]
    EmptyDag,

    #[error("duplicate task_id: '{0}'")]
    DuplicateTaskId(String),

    #[error("dependency references unknown task '{task_id}' ({side} side)")]
    UnknownTaskReference { task_id: String, side: &'static str },

    #[error("DAG graph contains a cycle")]
    CycleDetected,

    #[error("task '{task_id}' declares branch target '{target}' not present in tasks")]
    UnknownBranchTarget { task_id: String, target: String },

    #[error("task '{task_id}' declares branch target '{target}' with no dependency edge")]
    BranchTargetMissingDependency { task_id: String, target: String },

    #[error("task '{task_id}' loop.foreach must be non-empty")]
    EmptyLoopForeach { task_id: String },

    // ------ Runtime/orchestration errors ------
    #[error("unknown executor type '{0}'")]
    UnknownExecutor(String),

    #[error("condition evaluation error: {0}")]
    ConditionError(String),

    #[error("task '{task_id}' failed fatally: {message}")]
    TaskFatal { task_id: String, message: String },

    #[error("task '{task_id}' exceeded retry limit: {message}")]
    TaskRetryExhausted { task_id: String, message: String },

    #[error("circuit breaker open for executor '{0}'")]
    CircuitOpen(String),

    #[error("workflow run {0} was cancelled")]
    Cancelled(Uuid),

    #[error("orchestration error: {0}")]
    OrchestrationError(String),

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}
