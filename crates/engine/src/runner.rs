//! Task Runner — executes a single `TaskRun` attempt end-to-end.
//!
//! `run_task_attempt` is the pure decision core: circuit breaker gate,
//! condition evaluation, timeout-bounded executor invocation, and the
//! retry/backoff decision. It takes no database handle so it can be
//! exercised with `MockNode` and `InMemoryBreakerStore` alone; persistence
//! of the resulting outcome is the orchestrator's job.

use std::cmp::min;

use nodes::{ExecutionContext, ExecutorRegistry, NodeError};
use serde_json::{json, Value};
use tokio::time::Duration;
use tracing::{instrument, warn};

use crate::circuit::CircuitBreakerStore;
use crate::condition;
use crate::models::TaskNode;
use crate::EngineError;

/// Outcome of a single task attempt, ready to be persisted by the caller.
#[derive(Debug, Clone)]
pub enum TaskAttemptOutcome {
    /// The executor ran and returned a result.
    Success {
        result: Value,
        log: String,
        /// Extracted from `result.branch` when the task declares `branches`.
        branch_taken: Option<String>,
    },
    /// `condition` evaluated falsy; the executor was never invoked.
    Skipped { result: Value, log: String },
    /// A retryable failure with attempts remaining; the caller should
    /// create the next attempt row after `delay`.
    Retry { delay: Duration, log: String, message: String },
    /// A fatal failure, or a retryable failure with no attempts remaining.
    Failed { result: Value, log: String },
}

/// Execute one attempt of `task` with the given (already loop-augmented)
/// `params`. `attempt` is zero-based: 0 is the first try.
///
/// Returns `Err` only for engine misconfiguration (no executor registered
/// for the task's type) — every runtime failure is represented as
/// `Ok(TaskAttemptOutcome::Failed { .. })` or `Retry`.
#[instrument(skip(params, ctx, registry, breaker), fields(task_id = %task.task_id, task_type = %task.task_type, attempt))]
pub async fn run_task_attempt(
    task: &TaskNode,
    params: Value,
    ctx: &ExecutionContext,
    attempt: u32,
    registry: &ExecutorRegistry,
    breaker: &dyn CircuitBreakerStore,
) -> Result<TaskAttemptOutcome, EngineError> {
    let mut log = format!("INPUT: {params}");

    // Step 2: circuit breaker gate. Does NOT increment the failure counter.
    if breaker.is_open(&task.task_type).await {
        log.push_str("\nCircuit breaker open — attempt rejected without invoking the executor");
        return Ok(TaskAttemptOutcome::Failed {
            result: json!({ "error": "Circuit breaker open" }),
            log,
        });
    }

    // Step 3: condition evaluation.
    if let Some(expr) = &task.condition {
        match condition::evaluate(expr, &ctx.outputs) {
            Ok(true) => {}
            Ok(false) => {
                log.push_str(&format!("\nSKIPPED: condition '{expr}' evaluated false"));
                return Ok(TaskAttemptOutcome::Skipped {
                    result: json!({ "skipped": true, "reason": expr }),
                    log,
                });
            }
            Err(e) => {
                log.push_str(&format!("\nERROR: condition evaluation failed: {e}"));
                return Ok(TaskAttemptOutcome::Failed {
                    result: json!({ "error": format!("condition error: {e}") }),
                    log,
                });
            }
        }
    }

    let executor = registry
        .get(&task.task_type)
        .map_err(|_| EngineError::UnknownExecutor(task.task_type.clone()))?;

    // Step 4 + 6: timeout-bounded invocation.
    let exec_result = if let Some(timeout_secs) = task.timeout {
        match tokio::time::timeout(Duration::from_secs(timeout_secs), executor.execute(params.clone(), ctx)).await {
            Ok(result) => result,
            Err(_) => Err(NodeError::Retryable(format!(
                "task timed out after {timeout_secs}s"
            ))),
        }
    } else {
        executor.execute(params.clone(), ctx).await
    };

    match exec_result {
        // Step 7: success.
        Ok(mut result) => {
            breaker.record_success(&task.task_type).await;

            let branch_taken = if task.branches.is_some() {
                let branch_taken = result.get("branch").and_then(|v| v.as_str()).map(String::from);
                if let Some(obj) = result.as_object_mut() {
                    obj.insert(
                        "branch_taken".to_string(),
                        branch_taken.clone().map(Value::String).unwrap_or(Value::Null),
                    );
                }
                branch_taken
            } else {
                None
            };

            log.push_str(&format!("\nOUTPUT: {result}"));
            Ok(TaskAttemptOutcome::Success { result, log, branch_taken })
        }

        // Step 8: failure — circuit breaker accounting plus retry decision.
        Err(NodeError::Fatal(msg)) => {
            breaker.record_failure(&task.task_type).await;
            log.push_str(&format!("\nERROR: {msg}"));
            Ok(TaskAttemptOutcome::Failed {
                result: json!({ "error": msg }),
                log,
            })
        }
        Err(NodeError::Retryable(msg)) => {
            breaker.record_failure(&task.task_type).await;
            log.push_str(&format!("\nERROR: {msg}"));

            if attempt < task.retries {
                let base = Duration::from_secs(task.retry_delay.max(1));
                let delay = min(base * 2u32.pow(attempt), Duration::from_secs(60));
                log.push_str(&format!(
                    "\nscheduling retry attempt {} after {:?}",
                    attempt + 1,
                    delay
                ));
                warn!(task_id = %task.task_id, attempt, ?delay, "retryable failure, scheduling retry");
                Ok(TaskAttemptOutcome::Retry { delay, log, message: msg })
            } else {
                Ok(TaskAttemptOutcome::Failed {
                    result: json!({ "error": msg }),
                    log,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::InMemoryBreakerStore;
    use crate::models::{LoopSpec, TriggerRule};
    use nodes::mock::MockNode;
    use nodes::{ExecutorRegistry, RegistryError};
    use std::collections::HashMap;
    use std::sync::Arc;
    use uuid::Uuid;

    fn make_task(task_id: &str, task_type: &str) -> TaskNode {
        TaskNode {
            task_id: task_id.into(),
            task_type: task_type.into(),
            params: json!({}),
            retries: 0,
            retry_delay: 1,
            timeout: None,
            trigger_rule: TriggerRule::default(),
            condition: None,
            branches: None,
            loop_spec: None,
        }
    }

    fn registry_with(name: &str, node: MockNode) -> Result<ExecutorRegistry, RegistryError> {
        let mut registry = ExecutorRegistry::new();
        registry.register(name, Arc::new(node))?;
        Ok(registry)
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(Uuid::new_v4(), Uuid::new_v4())
    }

    #[tokio::test]
    async fn successful_attempt_persists_output_and_resets_breaker() {
        let registry = registry_with("shell", MockNode::returning("t1", json!({"ok": true}))).unwrap();
        let breaker = InMemoryBreakerStore::default();
        let task = make_task("t1", "shell");

        let outcome = run_task_attempt(&task, json!({}), &ctx(), 0, &registry, &breaker)
            .await
            .unwrap();

        assert!(matches!(outcome, TaskAttemptOutcome::Success { .. }));
    }

    #[tokio::test]
    async fn fatal_failure_never_retries_even_with_budget() {
        let registry = registry_with("shell", MockNode::failing_fatal("boom", "bad")).unwrap();
        let breaker = InMemoryBreakerStore::default();
        let mut task = make_task("t1", "shell");
        task.retries = 5;

        let outcome = run_task_attempt(&task, json!({}), &ctx(), 0, &registry, &breaker)
            .await
            .unwrap();

        assert!(matches!(outcome, TaskAttemptOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn retryable_failure_schedules_retry_when_budget_remains() {
        let registry = registry_with("http", MockNode::failing_retryable("flaky", "transient")).unwrap();
        let breaker = InMemoryBreakerStore::default();
        let mut task = make_task("t1", "http");
        task.retries = 2;
        task.retry_delay = 1;

        let outcome = run_task_attempt(&task, json!({}), &ctx(), 0, &registry, &breaker)
            .await
            .unwrap();

        match outcome {
            TaskAttemptOutcome::Retry { delay, .. } => assert_eq!(delay, Duration::from_secs(1)),
            other => panic!("expected Retry, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retry_delay_grows_exponentially_and_caps_at_60s() {
        let registry = registry_with("http", MockNode::failing_retryable("flaky", "transient")).unwrap();
        let breaker = InMemoryBreakerStore::default();
        let mut task = make_task("t1", "http");
        task.retries = 10;
        task.retry_delay = 1;

        let outcome_1 = run_task_attempt(&task, json!({}), &ctx(), 1, &registry, &breaker).await.unwrap();
        let outcome_6 = run_task_attempt(&task, json!({}), &ctx(), 6, &registry, &breaker).await.unwrap();

        match outcome_1 {
            TaskAttemptOutcome::Retry { delay, .. } => assert_eq!(delay, Duration::from_secs(2)),
            other => panic!("expected Retry, got {other:?}"),
        }
        match outcome_6 {
            TaskAttemptOutcome::Retry { delay, .. } => assert_eq!(delay, Duration::from_secs(60)),
            other => panic!("expected Retry, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retries_exhausted_marks_failed() {
        let registry = registry_with("http", MockNode::failing_retryable("flaky", "transient")).unwrap();
        let breaker = InMemoryBreakerStore::default();
        let mut task = make_task("t1", "http");
        task.retries = 0;

        let outcome = run_task_attempt(&task, json!({}), &ctx(), 0, &registry, &breaker)
            .await
            .unwrap();
        assert!(matches!(outcome, TaskAttemptOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn open_circuit_breaker_rejects_without_invoking_executor() {
        let node = MockNode::failing_retryable("flaky", "transient");
        let registry = registry_with("http", node).unwrap();
        let breaker = InMemoryBreakerStore::new(1, Duration::from_secs(300));
        let task = make_task("t1", "http");

        // First attempt trips the breaker (threshold=1).
        let _ = run_task_attempt(&task, json!({}), &ctx(), 0, &registry, &breaker).await.unwrap();
        let outcome = run_task_attempt(&task, json!({}), &ctx(), 0, &registry, &breaker).await.unwrap();

        match outcome {
            TaskAttemptOutcome::Failed { result, .. } => {
                assert_eq!(result["error"], "Circuit breaker open");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn falsy_condition_skips_without_invoking_executor() {
        let node = MockNode::returning("t1", json!({}));
        let registry = registry_with("echo", node).unwrap();
        let breaker = InMemoryBreakerStore::default();
        let mut task = make_task("t1", "echo");
        task.condition = Some("context.t0.returncode == 1".into());

        let mut ctx = ctx();
        ctx.outputs.insert("t0".into(), json!({"returncode": 0}));

        let outcome = run_task_attempt(&task, json!({}), &ctx, 0, &registry, &breaker)
            .await
            .unwrap();
        assert!(matches!(outcome, TaskAttemptOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn truthy_condition_runs_the_executor() {
        let node = MockNode::returning("t1", json!({"ran": true}));
        let registry = registry_with("echo", node).unwrap();
        let breaker = InMemoryBreakerStore::default();
        let mut task = make_task("t1", "echo");
        task.condition = Some("context.t0.returncode == 0".into());

        let mut ctx = ctx();
        ctx.outputs.insert("t0".into(), json!({"returncode": 0}));

        let outcome = run_task_attempt(&task, json!({}), &ctx, 0, &registry, &breaker)
            .await
            .unwrap();
        assert!(matches!(outcome, TaskAttemptOutcome::Success { .. }));
    }

    #[tokio::test]
    async fn unknown_executor_type_is_an_engine_error() {
        let registry = ExecutorRegistry::new();
        let breaker = InMemoryBreakerStore::default();
        let task = make_task("t1", "nonexistent");

        let result = run_task_attempt(&task, json!({}), &ctx(), 0, &registry, &breaker).await;
        assert!(matches!(result, Err(EngineError::UnknownExecutor(_))));
    }

    #[tokio::test]
    async fn branch_result_is_copied_into_branch_taken() {
        let node = MockNode::returning("t1", json!({"branch": "ok"}));
        let registry = registry_with("shell", node).unwrap();
        let breaker = InMemoryBreakerStore::default();
        let mut task = make_task("t1", "shell");
        let mut branches = HashMap::new();
        branches.insert("ok".to_string(), vec!["t2".to_string()]);
        task.branches = Some(branches);

        let outcome = run_task_attempt(&task, json!({}), &ctx(), 0, &registry, &breaker)
            .await
            .unwrap();

        match outcome {
            TaskAttemptOutcome::Success { branch_taken, result, .. } => {
                assert_eq!(branch_taken.as_deref(), Some("ok"));
                assert_eq!(result["branch_taken"], "ok");
            }
            other => panic!("expected Success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn loop_item_passes_through_params_unchanged() {
        let node = MockNode::returning("t1", json!({}));
        let registry = registry_with("echo", node).unwrap();
        let breaker = InMemoryBreakerStore::default();
        let mut task = make_task("t1", "echo");
        task.loop_spec = Some(LoopSpec { foreach: vec![json!(1), json!(2)] });

        let params = json!({"loop_item": 2});
        let outcome = run_task_attempt(&task, params, &ctx(), 0, &registry, &breaker)
            .await
            .unwrap();
        assert!(matches!(outcome, TaskAttemptOutcome::Success { .. }));
    }
}
