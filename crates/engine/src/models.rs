//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a DAG document looks like
//! in memory. They serialize to/from the JSONB `definition` column of the
//! `workflows` table exactly as shown in the external interface contract.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use db::models::WorkflowStatus;

// ---------------------------------------------------------------------------
// TriggerRule
// ---------------------------------------------------------------------------

/// Predicate over upstream terminal states deciding whether a downstream
/// task becomes eligible to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerRule {
    /// Every upstream task is `SUCCESS`.
    AllSuccess,
    /// Every upstream task is `SUCCESS`, `FAILED`, or `SKIPPED`.
    AllDone,
    /// At least one upstream task is `SUCCESS`; the rest are settled.
    AnySuccess,
    /// At least one upstream task is `FAILED`; the rest are settled.
    AnyFailed,
}

impl Default for TriggerRule {
    fn default() -> Self {
        Self::AllSuccess
    }
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

/// `loop.foreach` fans a single DAG node out into one `TaskRun` per item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSpec {
    pub foreach: Vec<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// TaskNode
// ---------------------------------------------------------------------------

fn default_retry_delay() -> u64 {
    1
}

/// A single node in the DAG — the unit of work, typed by executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    /// Unique identifier within this DAG (referenced by dependencies).
    pub task_id: String,
    /// Name of the registered executor that carries out this task.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Executor-specific option mapping, possibly augmented with
    /// `loop_item` by the orchestrator's foreach fan-out.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Number of retries on a retryable failure, beyond the first attempt.
    #[serde(default)]
    pub retries: u32,
    /// Base delay (seconds) for this task's exponential backoff; the
    /// engine-wide schedule is `min(60, retry_delay * 2^attempt)`.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
    /// Optional per-attempt timeout in seconds.
    pub timeout: Option<u64>,
    /// Predicate over upstream terminal states. Defaults to `all_success`.
    #[serde(default)]
    pub trigger_rule: TriggerRule,
    /// Optional boolean expression evaluated against prior task outputs.
    pub condition: Option<String>,
    /// Branch-value to downstream task_ids mapping.
    pub branches: Option<HashMap<String, Vec<String>>>,
    /// Fan-out specification.
    #[serde(rename = "loop")]
    pub loop_spec: Option<LoopSpec>,
}

// ---------------------------------------------------------------------------
// Dependency
// ---------------------------------------------------------------------------

/// Directed edge from one task to another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    pub upstream: String,
    pub downstream: String,
}

// ---------------------------------------------------------------------------
// DagDocument
// ---------------------------------------------------------------------------

/// `{ tasks: [...], dependencies: [...] }` — the JSON shape persisted in
/// `workflows.definition` and validated before a workflow is stored or run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DagDocument {
    #[serde(default)]
    pub tasks: Vec<TaskNode>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// An assembled, in-memory view of a persisted workflow: identity and
/// lifecycle metadata plus its DAG document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub schedule: Option<String>,
    pub status: WorkflowStatus,
    pub dag: DagDocument,
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    /// Convenience constructor for testing.
    pub fn new(name: impl Into<String>, dag: DagDocument) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            schedule: None,
            status: WorkflowStatus::Active,
            dag,
            created_at: Utc::now(),
        }
    }
}
