//! Orchestrator — walks a `DagDocument` to completion for one workflow run.
//!
//! `run_task_attempt` (runner.rs) decides what should happen to a single
//! attempt; the orchestrator is the reactor loop that decides *which* tasks
//! are eligible to run next, dispatches them concurrently, and persists
//! their outcomes through a [`RunStore`]. Retries are resolved entirely
//! inside the spawned task (looping internally with `tokio::time::sleep`
//! between attempts) so the reactor loop only ever sees terminal outcomes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use db::models::{TaskRunRow, TaskRunStatus};
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::circuit::CircuitBreakerStore;
use crate::dag::validate_dag;
use crate::models::{DagDocument, TaskNode, TriggerRule};
use crate::runner::{run_task_attempt, TaskAttemptOutcome};
use crate::store::RunStore;
use crate::EngineError;

use nodes::{ExecutionContext, ExecutorRegistry};

pub struct Orchestrator {
    store: Arc<dyn RunStore>,
    registry: Arc<ExecutorRegistry>,
    breaker: Arc<dyn CircuitBreakerStore>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn RunStore>, registry: Arc<ExecutorRegistry>, breaker: Arc<dyn CircuitBreakerStore>) -> Self {
        Self { store, registry, breaker }
    }

    /// The backing state store, exposed so callers like the scheduler can
    /// query workflow metadata without duplicating a `RunStore` handle.
    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Create a fresh run for `workflow_id`, validate its DAG, and drive it
    /// to completion. Returns the new run's id.
    #[instrument(skip(self))]
    pub async fn run_workflow(&self, workflow_id: Uuid) -> Result<Uuid, EngineError> {
        let workflow_row = self.store.get_workflow(workflow_id).await?;
        let dag: DagDocument = serde_json::from_value(workflow_row.definition.clone())
            .map_err(|e| EngineError::OrchestrationError(format!("malformed DAG document: {e}")))?;
        validate_dag(&dag)?;

        let run = self.store.create_run(workflow_id).await?;
        self.store.update_run_status(run.id, "running", false).await?;

        self.drive(run.id, workflow_id, &dag).await?;
        Ok(run.id)
    }

    /// Walk `dag` to completion for an already-created run. Each task is
    /// dispatched once its entire upstream set has settled into a terminal
    /// status; branching forces the losing arms' direct children to skip
    /// without waiting on their own `trigger_rule`.
    ///
    /// Idempotent: re-invoking `drive` on a run that already has persisted
    /// `task_runs` (a crash mid-run, or a job requeued back to `pending`)
    /// replays every already-terminal task from its stored row instead of
    /// dispatching it again, and only picks up where the previous attempt
    /// left off.
    #[instrument(skip(self, dag))]
    pub async fn drive(&self, run_id: Uuid, workflow_id: Uuid, dag: &DagDocument) -> Result<(), EngineError> {
        let task_by_id: HashMap<&str, &TaskNode> = dag.tasks.iter().map(|t| (t.task_id.as_str(), t)).collect();

        let mut upstream: HashMap<&str, Vec<&str>> = task_by_id.keys().map(|id| (*id, Vec::new())).collect();
        for dep in &dag.dependencies {
            upstream.entry(dep.downstream.as_str()).or_default().push(dep.upstream.as_str());
        }

        if task_by_id.keys().all(|id| !upstream[id].is_empty()) && !task_by_id.is_empty() {
            // validate_dag already rejects cycles; this only guards a DAG
            // with tasks but no root, which validate_dag's Kahn pass would
            // also have caught as a cycle. Kept as a defensive check.
            return Err(EngineError::OrchestrationError("DAG has no root task".into()));
        }

        let existing = Arc::new(self.latest_attempts(run_id).await?);

        let mut settled: HashMap<String, TaskRunStatus> = HashMap::new();
        let mut forced_skip: HashSet<String> = HashSet::new();
        let mut dispatched: HashSet<String> = HashSet::new();
        let mut ctx = ExecutionContext::new(workflow_id, run_id);

        for task in &dag.tasks {
            let task_id = task.task_id.as_str();
            let Some((status, result)) = resumed_status(task, &existing) else { continue };

            settled.insert(task_id.to_string(), status);
            ctx.outputs.insert(task_id.to_string(), result.clone());
            dispatched.insert(task_id.to_string());

            if status == TaskRunStatus::Success {
                if let Some(branches) = task.branches.as_ref() {
                    let branch_taken = result.get("branch_taken").and_then(|v| v.as_str()).map(String::from);
                    for (value, children) in branches {
                        if Some(value) != branch_taken.as_ref() {
                            for child in children {
                                forced_skip.insert(child.clone());
                            }
                        }
                    }
                }
            }
        }

        let mut join_set: JoinSet<(String, Result<TaskAttemptOutcome, EngineError>)> = JoinSet::new();

        loop {
            let mut progressed = false;

            for task in &dag.tasks {
                let task_id = task.task_id.as_str();
                if dispatched.contains(task_id) {
                    continue;
                }
                if !upstream[task_id].iter().all(|u| settled.contains_key(*u)) {
                    continue;
                }

                dispatched.insert(task_id.to_string());
                progressed = true;

                if forced_skip.contains(task_id) {
                    self.persist_forced_skip(run_id, task_id, "branch not taken").await?;
                    settled.insert(task_id.to_string(), TaskRunStatus::Skipped);
                    continue;
                }

                let upstream_statuses: Vec<TaskRunStatus> =
                    upstream[task_id].iter().map(|u| settled[*u]).collect();
                if !trigger_satisfied(task.trigger_rule, &upstream_statuses) {
                    self.persist_forced_skip(run_id, task_id, "trigger_rule not satisfied").await?;
                    settled.insert(task_id.to_string(), TaskRunStatus::Skipped);
                    continue;
                }

                self.spawn_task(&mut join_set, task, &ctx, run_id, &existing);
            }

            if join_set.is_empty() {
                if progressed {
                    continue;
                }
                break;
            }

            let Some(joined) = join_set.join_next().await else { break };
            let (task_id, outcome_result) =
                joined.map_err(|e| EngineError::OrchestrationError(format!("task join error: {e}")))?;

            match outcome_result {
                Ok(outcome) => {
                    let (status, branch_taken, ctx_value) = match outcome {
                        TaskAttemptOutcome::Success { result, branch_taken, .. } => {
                            (TaskRunStatus::Success, branch_taken, Some(result))
                        }
                        TaskAttemptOutcome::Skipped { result, .. } => (TaskRunStatus::Skipped, None, Some(result)),
                        TaskAttemptOutcome::Failed { result, .. } => (TaskRunStatus::Failed, None, Some(result)),
                        TaskAttemptOutcome::Retry { .. } => {
                            unreachable!("run_single_task resolves retries before returning")
                        }
                    };

                    settled.insert(task_id.clone(), status);
                    if let Some(value) = ctx_value {
                        ctx.outputs.insert(task_id.clone(), value);
                    }

                    if status == TaskRunStatus::Success {
                        if let Some(branches) = task_by_id[task_id.as_str()].branches.as_ref() {
                            for (value, children) in branches {
                                if Some(value) != branch_taken.as_ref() {
                                    for child in children {
                                        forced_skip.insert(child.clone());
                                    }
                                }
                            }
                        }
                    }
                }
                Err(engine_err) => {
                    error!(%task_id, error = %engine_err, "task attempt aborted with an engine error");
                    settled.insert(task_id, TaskRunStatus::Failed);
                }
            }
        }

        self.settle_workflow_run(run_id, dag, &settled).await
    }

    /// Mark every non-terminal task run belonging to `run_id` as cancelled
    /// and fail the run itself.
    #[instrument(skip(self))]
    pub async fn cancel_run(&self, run_id: Uuid) -> Result<(), EngineError> {
        let rows = self.store.list_task_runs(run_id).await?;
        let mut latest: HashMap<&str, &TaskRunRow> = HashMap::new();
        for row in &rows {
            latest
                .entry(row.task_id.as_str())
                .and_modify(|cur| {
                    if row.attempt > cur.attempt {
                        *cur = row;
                    }
                })
                .or_insert(row);
        }

        for row in latest.values() {
            match row.status.parse::<TaskRunStatus>() {
                Ok(TaskRunStatus::Running) => {
                    self.store
                        .finish_task_run(
                            row.id,
                            "failed",
                            Some(json!({ "error": "cancelled" })),
                            "ERROR: workflow run cancelled",
                            Utc::now(),
                        )
                        .await?;
                }
                Ok(TaskRunStatus::Pending) => {
                    self.store
                        .finish_task_run(
                            row.id,
                            "skipped",
                            Some(json!({ "skipped": true, "reason": "workflow run cancelled" })),
                            "SKIPPED: workflow run cancelled",
                            Utc::now(),
                        )
                        .await?;
                }
                _ => {}
            }
        }

        self.store.update_run_status(run_id, "failed", true).await?;
        warn!(%run_id, "workflow run cancelled");
        Err(EngineError::Cancelled(run_id))
    }

    fn spawn_task(
        &self,
        join_set: &mut JoinSet<(String, Result<TaskAttemptOutcome, EngineError>)>,
        task: &TaskNode,
        ctx: &ExecutionContext,
        run_id: Uuid,
        existing: &Arc<HashMap<String, TaskRunRow>>,
    ) {
        let store = self.store.clone();
        let registry = self.registry.clone();
        let breaker = self.breaker.clone();
        let task = task.clone();
        let ctx = ctx.clone();
        let task_id = task.task_id.clone();
        let existing = existing.clone();

        join_set.spawn(async move {
            let outcome = if task.loop_spec.is_some() {
                run_loop_task(store, task, ctx, run_id, registry, breaker, existing).await
            } else {
                let params = task.params.clone();
                let persisted_id = task.task_id.clone();
                let existing_row = existing.get(&persisted_id).cloned();
                run_single_task(store, task, persisted_id, params, ctx, run_id, registry, breaker, existing_row).await
            };
            (task_id, outcome)
        });
    }

    /// Load every persisted `task_runs` row for `run_id` and keep only the
    /// highest-`attempt` row per `task_id` — the row that reflects each
    /// task's (or loop iteration's) current state.
    async fn latest_attempts(&self, run_id: Uuid) -> Result<HashMap<String, TaskRunRow>, EngineError> {
        let mut latest: HashMap<String, TaskRunRow> = HashMap::new();
        for row in self.store.list_task_runs(run_id).await? {
            latest
                .entry(row.task_id.clone())
                .and_modify(|cur| {
                    if row.attempt > cur.attempt {
                        *cur = row.clone();
                    }
                })
                .or_insert(row);
        }
        Ok(latest)
    }

    async fn persist_forced_skip(&self, run_id: Uuid, task_id: &str, reason: &str) -> Result<(), EngineError> {
        let row = self.store.create_task_run(run_id, task_id).await?;
        self.store
            .finish_task_run(
                row.id,
                "skipped",
                Some(json!({ "skipped": true, "reason": reason })),
                &format!("SKIPPED: {reason}"),
                Utc::now(),
            )
            .await
    }

    async fn settle_workflow_run(
        &self,
        run_id: Uuid,
        dag: &DagDocument,
        settled: &HashMap<String, TaskRunStatus>,
    ) -> Result<(), EngineError> {
        // Success iff every task settled SUCCESS or was deliberately SKIPPED.
        let all_required_succeeded = dag.tasks.iter().all(|t| {
            matches!(settled.get(&t.task_id), Some(TaskRunStatus::Success) | Some(TaskRunStatus::Skipped))
        });
        let status = if all_required_succeeded { "success" } else { "failed" };
        self.store.update_run_status(run_id, status, true).await?;
        info!(%run_id, status, "workflow run settled");
        Ok(())
    }
}

/// `AllDone` is vacuously satisfied; the others require at least one
/// matching upstream status. A task with no upstream (a root) is always
/// eligible — `.all()`/`.any()` over an empty slice resolve accordingly.
fn trigger_satisfied(rule: TriggerRule, upstream_statuses: &[TaskRunStatus]) -> bool {
    match rule {
        TriggerRule::AllSuccess => upstream_statuses.iter().all(|s| *s == TaskRunStatus::Success),
        TriggerRule::AllDone => true,
        TriggerRule::AnySuccess => {
            upstream_statuses.is_empty() || upstream_statuses.iter().any(|s| *s == TaskRunStatus::Success)
        }
        TriggerRule::AnyFailed => upstream_statuses.iter().any(|s| *s == TaskRunStatus::Failed),
    }
}

/// If `task` already reached a terminal state in a previous `drive` call,
/// return the status and output it settled with, so the reactor loop can
/// skip straight past it. A loop task only resumes once every one of its
/// iterations has a terminal row; a partially-finished loop is picked back
/// up iteration by iteration inside `run_loop_task` instead.
fn resumed_status(task: &TaskNode, existing: &HashMap<String, TaskRunRow>) -> Option<(TaskRunStatus, Value)> {
    if let Some(loop_spec) = &task.loop_spec {
        if loop_spec.foreach.is_empty() {
            return None;
        }
        let mut statuses = Vec::with_capacity(loop_spec.foreach.len());
        let mut results = Vec::with_capacity(loop_spec.foreach.len());
        for idx in 0..loop_spec.foreach.len() {
            let row = existing.get(&format!("{}[{idx}]", task.task_id))?;
            let status: TaskRunStatus = row.status.parse().ok()?;
            if !status.is_terminal() {
                return None;
            }
            statuses.push(status);
            results.push(row.result.clone().unwrap_or(json!({})));
        }
        let ok = trigger_satisfied(task.trigger_rule, &statuses);
        let status = if ok { TaskRunStatus::Success } else { TaskRunStatus::Failed };
        return Some((status, json!({ "iterations": results })));
    }

    let row = existing.get(task.task_id.as_str())?;
    let status: TaskRunStatus = row.status.parse().ok()?;
    status.is_terminal().then(|| (status, row.result.clone().unwrap_or(json!({}))))
}

/// Reconstruct the `TaskAttemptOutcome` a previous `drive` call persisted
/// for `row`, so a resumed run never re-invokes the executor for work
/// that's already terminal.
fn replay_terminal_outcome(row: &TaskRunRow, status: TaskRunStatus) -> TaskAttemptOutcome {
    let result = row.result.clone().unwrap_or(json!({}));
    let log = row.log.clone();
    match status {
        TaskRunStatus::Success => {
            let branch_taken = result.get("branch_taken").and_then(|v| v.as_str()).map(String::from);
            TaskAttemptOutcome::Success { result, log, branch_taken }
        }
        TaskRunStatus::Skipped => TaskAttemptOutcome::Skipped { result, log },
        _ => TaskAttemptOutcome::Failed { result, log },
    }
}

fn with_loop_item(params: &Value, item: &Value) -> Value {
    let mut merged = params.clone();
    if let Some(obj) = merged.as_object_mut() {
        obj.insert("loop_item".to_string(), item.clone());
        merged
    } else {
        json!({ "loop_item": item })
    }
}

/// Run one (non-loop) task to a terminal outcome, looping internally over
/// retry attempts. Each attempt gets its own persisted `task_runs` row; a
/// `Retry` outcome finishes the current row `failed` and opens the next
/// attempt's row before sleeping out the backoff delay.
///
/// `existing` is this task's latest persisted row from a previous `drive`
/// call, if any. A terminal row is replayed without touching the store or
/// the executor; a non-terminal one (the process crashed between
/// `set_task_run_running` and the attempt finishing) is treated as a failed
/// attempt and a fresh attempt row is opened after it, rather than reusing
/// `attempt = 0` and colliding with the existing row's unique index entry.
async fn run_single_task(
    store: Arc<dyn RunStore>,
    task: TaskNode,
    persisted_task_id: String,
    params: Value,
    ctx: ExecutionContext,
    run_id: Uuid,
    registry: Arc<ExecutorRegistry>,
    breaker: Arc<dyn CircuitBreakerStore>,
    existing: Option<TaskRunRow>,
) -> Result<TaskAttemptOutcome, EngineError> {
    if let Some(stale) = &existing {
        if let Ok(status) = stale.status.parse::<TaskRunStatus>() {
            if status.is_terminal() {
                return Ok(replay_terminal_outcome(stale, status));
            }
        }
    }

    let (mut row, mut attempt) = match existing {
        Some(stale) => {
            let next_attempt = stale.attempt as u32 + 1;
            let log = stale.log.clone();
            let row = store.create_retry_attempt(&stale).await?;
            store.set_task_run_running(row.id, &log).await?;
            (row, next_attempt)
        }
        None => {
            let row = store.create_task_run(run_id, &persisted_task_id).await?;
            let initial_log = row.log.clone();
            store.set_task_run_running(row.id, &initial_log).await?;
            (row, 0)
        }
    };

    loop {
        let outcome = run_task_attempt(&task, params.clone(), &ctx, attempt, &registry, &*breaker).await?;

        match outcome {
            TaskAttemptOutcome::Retry { delay, log, .. } => {
                store.finish_task_run(row.id, "failed", None, &log, Utc::now()).await?;
                tokio::time::sleep(delay).await;
                row = store.create_retry_attempt(&row).await?;
                store.set_task_run_running(row.id, &log).await?;
                attempt += 1;
            }
            TaskAttemptOutcome::Success { result, log, branch_taken } => {
                store.finish_task_run(row.id, "success", Some(result.clone()), &log, Utc::now()).await?;
                return Ok(TaskAttemptOutcome::Success { result, log, branch_taken });
            }
            TaskAttemptOutcome::Skipped { result, log } => {
                store.finish_task_run(row.id, "skipped", Some(result.clone()), &log, Utc::now()).await?;
                return Ok(TaskAttemptOutcome::Skipped { result, log });
            }
            TaskAttemptOutcome::Failed { result, log } => {
                store.finish_task_run(row.id, "failed", Some(result.clone()), &log, Utc::now()).await?;
                return Ok(TaskAttemptOutcome::Failed { result, log });
            }
        }
    }
}

/// Fan a `loop.foreach` task out into one `run_single_task` per item, each
/// persisted under a synthesized `"{task_id}[{idx}]"` row, then aggregate
/// the per-iteration terminal statuses using the loop task's own
/// `trigger_rule` (an open question in the source material — there is no
/// separate "loop aggregation rule" concept, so the task's existing field
/// does double duty).
async fn run_loop_task(
    store: Arc<dyn RunStore>,
    task: TaskNode,
    ctx: ExecutionContext,
    run_id: Uuid,
    registry: Arc<ExecutorRegistry>,
    breaker: Arc<dyn CircuitBreakerStore>,
    existing: Arc<HashMap<String, TaskRunRow>>,
) -> Result<TaskAttemptOutcome, EngineError> {
    let loop_spec = task
        .loop_spec
        .clone()
        .expect("run_loop_task called on a task with no loop_spec");

    let mut set: JoinSet<Result<TaskAttemptOutcome, EngineError>> = JoinSet::new();
    for (idx, item) in loop_spec.foreach.iter().enumerate() {
        let store = store.clone();
        let mut iter_task = task.clone();
        iter_task.loop_spec = None;
        let persisted_id = format!("{}[{idx}]", task.task_id);
        let existing_row = existing.get(&persisted_id).cloned();
        let params = with_loop_item(&task.params, item);
        let ctx = ctx.clone();
        let registry = registry.clone();
        let breaker = breaker.clone();

        set.spawn(async move {
            run_single_task(store, iter_task, persisted_id, params, ctx, run_id, registry, breaker, existing_row)
                .await
        });
    }

    let mut statuses = Vec::with_capacity(loop_spec.foreach.len());
    let mut results = Vec::with_capacity(loop_spec.foreach.len());
    while let Some(joined) = set.join_next().await {
        let outcome =
            joined.map_err(|e| EngineError::OrchestrationError(format!("loop iteration join error: {e}")))??;
        let (status, result) = match outcome {
            TaskAttemptOutcome::Success { result, .. } => (TaskRunStatus::Success, result),
            TaskAttemptOutcome::Skipped { result, .. } => (TaskRunStatus::Skipped, result),
            TaskAttemptOutcome::Failed { result, .. } => (TaskRunStatus::Failed, result),
            TaskAttemptOutcome::Retry { .. } => unreachable!("run_single_task resolves retries before returning"),
        };
        statuses.push(status);
        results.push(result);
    }

    let ok = trigger_satisfied(task.trigger_rule, &statuses);
    let aggregate = json!({ "iterations": results });
    let log = format!(
        "loop '{}' ran {} iteration(s), aggregate {}",
        task.task_id,
        statuses.len(),
        if ok { "success" } else { "failed" }
    );

    if ok {
        Ok(TaskAttemptOutcome::Success { result: aggregate, log, branch_taken: None })
    } else {
        Ok(TaskAttemptOutcome::Failed { result: aggregate, log })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::InMemoryBreakerStore;
    use crate::models::{Dependency, LoopSpec};
    use crate::store::InMemoryRunStore;
    use db::models::{WorkflowRow, WorkflowStatus};
    use nodes::mock::MockNode;
    use std::sync::Arc;

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

    fn setup(dag: DagDocument, registry: ExecutorRegistry) -> (Arc<InMemoryRunStore>, Orchestrator, Uuid) {
        let store = Arc::new(InMemoryRunStore::new());
        let workflow_id = Uuid::new_v4();
        store.insert_workflow(WorkflowRow {
            id: workflow_id,
            name: "test".into(),
            definition: serde_json::to_value(&dag).unwrap(),
            schedule: None,
            status: WorkflowStatus::Active.to_string(),
            created_at: Utc::now(),
        });
        let orchestrator = Orchestrator::new(
            store.clone(),
            Arc::new(registry),
            Arc::new(InMemoryBreakerStore::default()),
        );
        (store, orchestrator, workflow_id)
    }

    #[tokio::test]
    async fn linear_chain_runs_every_task_to_success() {
        let mut registry = ExecutorRegistry::new();
        registry.register("echo", Arc::new(MockNode::returning("any", json!({"ok": true})))).unwrap();

        let dag = DagDocument {
            tasks: vec![make_task("a", "echo"), make_task("b", "echo")],
            dependencies: vec![Dependency { upstream: "a".into(), downstream: "b".into() }],
        };
        let (store, orchestrator, workflow_id) = setup(dag, registry);

        let run_id = orchestrator.run_workflow(workflow_id).await.unwrap();
        let rows = store.list_task_runs(run_id).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.status == "success"));
    }

    #[tokio::test]
    async fn failure_fails_downstream_all_success_task() {
        let mut registry = ExecutorRegistry::new();
        registry.register("shell", Arc::new(MockNode::failing_fatal("boom", "nope"))).unwrap();

        let dag = DagDocument {
            tasks: vec![make_task("a", "shell"), make_task("b", "shell")],
            dependencies: vec![Dependency { upstream: "a".into(), downstream: "b".into() }],
        };
        let (store, orchestrator, workflow_id) = setup(dag, registry);

        let run_id = orchestrator.run_workflow(workflow_id).await.unwrap();
        let rows = store.list_task_runs(run_id).await.unwrap();

        let b = rows.iter().find(|r| r.task_id == "b").unwrap();
        assert_eq!(b.status, "skipped");
    }

    #[tokio::test]
    async fn all_done_trigger_rule_runs_despite_upstream_failure() {
        let mut registry = ExecutorRegistry::new();
        registry.register("shell", Arc::new(MockNode::failing_fatal("boom", "nope"))).unwrap();
        registry.register("echo", Arc::new(MockNode::returning("any", json!({"ran": true})))).unwrap();

        let mut cleanup = make_task("cleanup", "echo");
        cleanup.trigger_rule = TriggerRule::AllDone;

        let dag = DagDocument {
            tasks: vec![make_task("a", "shell"), cleanup],
            dependencies: vec![Dependency { upstream: "a".into(), downstream: "cleanup".into() }],
        };
        let (store, orchestrator, workflow_id) = setup(dag, registry);

        let run_id = orchestrator.run_workflow(workflow_id).await.unwrap();
        let rows = store.list_task_runs(run_id).await.unwrap();

        let cleanup_row = rows.iter().find(|r| r.task_id == "cleanup").unwrap();
        assert_eq!(cleanup_row.status, "success");
    }

    #[tokio::test]
    async fn branching_skips_the_untaken_arm_only() {
        let mut registry = ExecutorRegistry::new();
        registry.register("decide", Arc::new(MockNode::returning("decide", json!({"branch": "yes"})))).unwrap();
        registry.register("echo", Arc::new(MockNode::returning("any", json!({"ran": true})))).unwrap();

        let mut decide = make_task("decide", "decide");
        let mut branches = HashMap::new();
        branches.insert("yes".to_string(), vec!["on_yes".to_string()]);
        branches.insert("no".to_string(), vec!["on_no".to_string()]);
        decide.branches = Some(branches);

        let dag = DagDocument {
            tasks: vec![decide, make_task("on_yes", "echo"), make_task("on_no", "echo")],
            dependencies: vec![
                Dependency { upstream: "decide".into(), downstream: "on_yes".into() },
                Dependency { upstream: "decide".into(), downstream: "on_no".into() },
            ],
        };
        let (store, orchestrator, workflow_id) = setup(dag, registry);

        let run_id = orchestrator.run_workflow(workflow_id).await.unwrap();
        let rows = store.list_task_runs(run_id).await.unwrap();

        assert_eq!(rows.iter().find(|r| r.task_id == "on_yes").unwrap().status, "success");
        assert_eq!(rows.iter().find(|r| r.task_id == "on_no").unwrap().status, "skipped");
    }

    #[tokio::test]
    async fn foreach_loop_runs_one_attempt_per_item() {
        let mut registry = ExecutorRegistry::new();
        registry.register("echo", Arc::new(MockNode::returning("any", json!({"ran": true})))).unwrap();

        let mut looped = make_task("fan", "echo");
        looped.loop_spec = Some(LoopSpec { foreach: vec![json!("a"), json!("b"), json!("c")] });

        let dag = DagDocument { tasks: vec![looped], dependencies: vec![] };
        let (store, orchestrator, workflow_id) = setup(dag, registry);

        let run_id = orchestrator.run_workflow(workflow_id).await.unwrap();
        let rows = store.list_task_runs(run_id).await.unwrap();

        let iteration_rows: Vec<_> = rows.iter().filter(|r| r.task_id.starts_with("fan[")).collect();
        assert_eq!(iteration_rows.len(), 3);
        assert!(iteration_rows.iter().all(|r| r.status == "success"));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_then_success_ends_with_a_success_row_and_a_failed_attempt_row() {
        let mut registry = ExecutorRegistry::new();
        registry.register(
            "http",
            Arc::new(MockNode::failing_then_succeeding("flaky", 1, "transient", json!({"ok": true}))),
        ).unwrap();

        let mut task = make_task("a", "http");
        task.retries = 2;
        task.retry_delay = 1;

        let dag = DagDocument { tasks: vec![task], dependencies: vec![] };
        let (store, orchestrator, workflow_id) = setup(dag, registry);

        let run_id = orchestrator.run_workflow(workflow_id).await.unwrap();
        let rows = store.list_task_runs(run_id).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows.iter().filter(|r| r.status == "failed").count(), 1);
        assert_eq!(rows.iter().filter(|r| r.status == "success").count(), 1);
    }

    #[tokio::test]
    async fn cancel_run_skips_pending_tasks_and_fails_the_run() {
        let mut registry = ExecutorRegistry::new();
        registry.register("echo", Arc::new(MockNode::returning("any", json!({"ran": true})))).unwrap();

        let store = Arc::new(InMemoryRunStore::new());
        let orchestrator =
            Orchestrator::new(store.clone(), Arc::new(registry), Arc::new(InMemoryBreakerStore::default()));

        let run = store.create_run(Uuid::new_v4()).await.unwrap();
        let pending = store.create_task_run(run.id, "never_started").await.unwrap();
        assert_eq!(pending.status, "pending");

        let result = orchestrator.cancel_run(run.id).await;
        assert!(matches!(result, Err(EngineError::Cancelled(_))));

        let rows = store.list_task_runs(run.id).await.unwrap();
        assert_eq!(rows[0].status, "skipped");
    }

    #[tokio::test]
    async fn redriving_a_completed_run_does_not_recreate_or_duplicate_task_runs() {
        let mut registry = ExecutorRegistry::new();
        registry.register("echo", Arc::new(MockNode::returning("any", json!({"ok": true})))).unwrap();

        let dag = DagDocument {
            tasks: vec![make_task("a", "echo"), make_task("b", "echo")],
            dependencies: vec![Dependency { upstream: "a".into(), downstream: "b".into() }],
        };
        let (store, orchestrator, workflow_id) = setup(dag.clone(), registry);

        let run_id = orchestrator.run_workflow(workflow_id).await.unwrap();
        let first_pass = store.list_task_runs(run_id).await.unwrap();
        assert_eq!(first_pass.len(), 2);

        // Simulate a worker requeuing the same run (its job_queue row reset
        // to 'pending' after a crash) and driving it again.
        orchestrator.drive(run_id, workflow_id, &dag).await.unwrap();

        let second_pass = store.list_task_runs(run_id).await.unwrap();
        assert_eq!(second_pass.len(), 2, "no duplicate task_runs rows should be created");
        assert!(second_pass.iter().all(|r| r.status == "success"));
    }

    #[tokio::test]
    async fn redriving_after_a_crash_mid_attempt_opens_a_fresh_attempt_row() {
        let mut registry = ExecutorRegistry::new();
        registry.register("echo", Arc::new(MockNode::returning("any", json!({"ok": true})))).unwrap();

        let dag = DagDocument { tasks: vec![make_task("a", "echo")], dependencies: vec![] };
        let (store, orchestrator, workflow_id) = setup(dag.clone(), registry);

        let run = store.create_run(workflow_id).await.unwrap();
        // A previous drive() opened attempt 0 and left it 'running' when the
        // process crashed before the executor returned.
        let stale = store.create_task_run(run.id, "a").await.unwrap();
        store.set_task_run_running(stale.id, "INPUT: {}").await.unwrap();

        orchestrator.drive(run.id, workflow_id, &dag).await.unwrap();

        let rows = store.list_task_runs(run.id).await.unwrap();
        assert_eq!(rows.len(), 2, "resume should open attempt 1 rather than reuse attempt 0");
        assert_eq!(
            rows.iter().filter(|r| r.task_id == "a" && r.attempt == 1 && r.status == "success").count(),
            1
        );
    }

    #[tokio::test]
    async fn redriving_a_completed_foreach_loop_does_not_rerun_iterations() {
        let mut registry = ExecutorRegistry::new();
        registry.register("echo", Arc::new(MockNode::returning("any", json!({"ran": true})))).unwrap();

        let mut looped = make_task("fan", "echo");
        looped.loop_spec = Some(LoopSpec { foreach: vec![json!("a"), json!("b")] });

        let dag = DagDocument { tasks: vec![looped], dependencies: vec![] };
        let (store, orchestrator, workflow_id) = setup(dag.clone(), registry);

        let run_id = orchestrator.run_workflow(workflow_id).await.unwrap();
        let first_pass = store.list_task_runs(run_id).await.unwrap();
        assert_eq!(first_pass.len(), 2);

        orchestrator.drive(run_id, workflow_id, &dag).await.unwrap();

        let second_pass = store.list_task_runs(run_id).await.unwrap();
        assert_eq!(second_pass.len(), 2, "no duplicate iteration rows should be created");
    }
}
