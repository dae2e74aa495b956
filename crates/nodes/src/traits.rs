//! The `Executor` trait — the contract every executor must fulfil.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::NodeError;

/// Shared context passed to every executor during a task attempt.
///
/// Defined here (in the nodes crate) so both the engine and individual
/// executor implementations can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// ID of the parent workflow.
    pub workflow_id: Uuid,
    /// ID of the current workflow run.
    pub run_id: Uuid,
    /// Read-only map of prior task outputs, keyed by upstream `task_id`.
    pub outputs: HashMap<String, Value>,
    /// Decrypted secrets scoped to this workflow.
    pub secrets: HashMap<String, String>,
}

impl ExecutionContext {
    pub fn new(workflow_id: Uuid, run_id: Uuid) -> Self {
        Self {
            workflow_id,
            run_id,
            outputs: HashMap::new(),
            secrets: HashMap::new(),
        }
    }
}

/// The core executor trait.
///
/// All built-in executors — and any user-registered one — implement this.
/// `params` is the DAG node's `params` mapping (possibly augmented with a
/// `loop_item` key by the orchestrator's foreach fan-out); `ctx` exposes
/// prior task outputs and workflow-scoped secrets.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute one task attempt and return its structured JSON result.
    async fn execute(
        &self,
        params: Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError>;
}
