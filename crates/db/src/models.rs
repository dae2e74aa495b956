//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models — they carry no domain behaviour.
//! Domain types live in the `engine` crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// workflows
// ---------------------------------------------------------------------------

/// Lifecycle status of a persisted [`WorkflowRow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    Active,
    Disabled,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "disabled" => Ok(Self::Disabled),
            other => Err(format!("unknown workflow status: {other}")),
        }
    }
}

/// A persisted workflow definition row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRow {
    pub id: Uuid,
    pub name: String,
    /// Full JSON DAG document (tasks, dependencies, …).
    pub definition: serde_json::Value,
    /// Cron expression, or `None` for workflows with no periodic trigger.
    pub schedule: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// workflow_runs
// ---------------------------------------------------------------------------

/// Possible statuses for a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowRunStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl std::fmt::Display for WorkflowRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for WorkflowRunStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown workflow run status: {other}")),
        }
    }
}

/// A persisted workflow run row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRunRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// task_runs
// ---------------------------------------------------------------------------

/// Possible statuses for a single task-run attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskRunStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl std::fmt::Display for TaskRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl std::str::FromStr for TaskRunStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(format!("unknown task run status: {other}")),
        }
    }
}

impl TaskRunStatus {
    /// Terminal statuses can't transition further — monotonic state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }
}

/// A persisted task-run row: one attempt at one DAG node within one
/// workflow run. Retries create additional rows sharing
/// `(workflow_run_id, task_id)` distinguished by `attempt`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskRunRow {
    pub id: Uuid,
    pub workflow_run_id: Uuid,
    pub task_id: String,
    pub attempt: i32,
    pub status: String,
    pub result: Option<serde_json::Value>,
    pub log: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// secrets
// ---------------------------------------------------------------------------

/// A persisted secret row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SecretRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub key: String,
    /// AES-256 encrypted value (base64-encoded ciphertext). Decryption is a
    /// `db`-layer concern outside this core; the engine only ever sees the
    /// already-decrypted map threaded through `ExecutionContext::secrets`.
    pub encrypted_value: String,
}

// ---------------------------------------------------------------------------
// job_queue
// ---------------------------------------------------------------------------

/// Possible statuses for a queued workflow-run job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    DeadLettered,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::DeadLettered => write!(f, "dead_lettered"),
        }
    }
}

/// A job row fetched from the queue table: "run this workflow_run through
/// the orchestrator". Distinct from the `engine`/`queue` crates' in-process
/// per-task-attempt broker.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub workflow_run_id: Uuid,
    pub workflow_id: Uuid,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// circuit_breaker_state
// ---------------------------------------------------------------------------

/// A persisted circuit breaker counter for one executor type, for a
/// multi-process deployment where breaker state must be shared across
/// workers rather than per-process. The in-process `engine::circuit` map is
/// the default; this row shape is what a shared-backend
/// `CircuitBreakerStore` implementation would read and write.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CircuitBreakerStateRow {
    pub executor_name: String,
    pub failure_count: i32,
    pub opened_at: Option<DateTime<Utc>>,
}
