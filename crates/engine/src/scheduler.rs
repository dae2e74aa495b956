//! Cron scheduler — enqueues a new workflow run whenever a workflow's
//! `schedule` cron expression matches, wrapping `tokio-cron-scheduler`'s
//! `JobScheduler`.
//!
//! Each firing only creates a `workflow_runs` row and a `job_queue` row
//! (mirroring `POST /workflows/:id/run`, see `api::handlers::runs::trigger`)
//! — it never drives the run itself. Driving happens on a `worker` process,
//! the same one that drives on-demand runs, so a scheduled run shares
//! `WORKER_CONCURRENCY` and circuit-breaker state with every other run
//! instead of blocking the scheduler process for its full duration.
//!
//! Standard 5-field cron (no seconds) is normalized to the 6-field form
//! `tokio-cron-scheduler`/`croner` expect by prefixing a literal `"0"`
//! seconds field; a 6-field expression passes through unchanged. This
//! doesn't accept human-readable strings like "every 5 minutes" — workflow
//! schedules are always cron expressions.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use db::DbPool;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::store::RunStore;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler error: {0}")]
    JobError(String),

    #[error("invalid cron expression '{0}'")]
    InvalidSchedule(String),

    #[error("workflow {0} is not registered with the scheduler")]
    WorkflowNotFound(Uuid),
}

/// Normalize a schedule string to the 6-field (with-seconds) cron syntax
/// `tokio-cron-scheduler` parses. 5 fields get a leading `"0"` seconds field
/// prepended; 6 fields pass through; anything else is rejected. The
/// resulting expression is parsed with `croner` as a syntax check — the
/// same crate `tokio-cron-scheduler` uses internally — so a malformed
/// expression is rejected here rather than surfacing later as a silently
/// never-firing job.
pub fn normalize_cron(schedule: &str) -> Result<String, SchedulerError> {
    let trimmed = schedule.trim();
    let fields = trimmed.split_whitespace().count();
    let normalized = match fields {
        5 => format!("0 {trimmed}"),
        6 => trimmed.to_string(),
        _ => return Err(SchedulerError::InvalidSchedule(trimmed.to_string())),
    };

    normalized
        .parse::<croner::Cron>()
        .map_err(|e| SchedulerError::InvalidSchedule(format!("{trimmed}: {e}")))?;

    Ok(normalized)
}

struct RegisteredJob {
    job_id: Uuid,
}

/// Owns the `tokio-cron-scheduler` runtime and the set of registered
/// workflow cron jobs. Each fire enqueues a job for the matching workflow id
/// on the scheduler's own task; it holds a `RunStore` and a raw `DbPool` for
/// that, not a full `Orchestrator` — the scheduler process never drives a
/// run itself.
pub struct Scheduler {
    inner: RwLock<Option<JobScheduler>>,
    jobs: RwLock<HashMap<Uuid, RegisteredJob>>,
    store: Arc<dyn RunStore>,
    pool: DbPool,
}

impl Scheduler {
    pub fn new(store: Arc<dyn RunStore>, pool: DbPool) -> Self {
        Self {
            inner: RwLock::new(None),
            jobs: RwLock::new(HashMap::new()),
            store,
            pool,
        }
    }

    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let js = JobScheduler::new().await.map_err(|e| SchedulerError::JobError(e.to_string()))?;
        js.start().await.map_err(|e| SchedulerError::JobError(e.to_string()))?;
        *self.inner.write().await = Some(js);
        info!("cron scheduler started");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        if let Some(mut js) = self.inner.write().await.take() {
            js.shutdown().await.map_err(|e| SchedulerError::JobError(e.to_string()))?;
        }
        self.jobs.write().await.clear();
        info!("cron scheduler stopped");
        Ok(())
    }

    /// Register every active, scheduled workflow known to the store. Called
    /// once at worker startup.
    #[instrument(skip(self))]
    pub async fn register_all(&self) -> Result<usize, SchedulerError> {
        let workflows = self
            .store
            .list_scheduled_workflows()
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;

        let mut registered = 0;
        for workflow in workflows {
            let Some(schedule) = workflow.schedule.clone() else { continue };
            if let Err(e) = self.register_workflow(workflow.id, &schedule).await {
                warn!(workflow_id = %workflow.id, error = %e, "failed to register scheduled workflow, skipping");
                continue;
            }
            registered += 1;
        }
        Ok(registered)
    }

    /// Register a single workflow's cron trigger. Replaces any existing
    /// registration for the same workflow id.
    #[instrument(skip(self))]
    pub async fn register_workflow(&self, workflow_id: Uuid, schedule: &str) -> Result<(), SchedulerError> {
        if self.jobs.read().await.contains_key(&workflow_id) {
            self.unregister_workflow(workflow_id).await?;
        }

        let cron_expr = normalize_cron(schedule)?;
        let inner = self.inner.read().await;
        let js = inner.as_ref().ok_or_else(|| SchedulerError::JobError("scheduler not started".into()))?;

        let store = self.store.clone();
        let pool = self.pool.clone();
        let job = Job::new_async(cron_expr.as_str(), move |_job_id, _lock| {
            let store = store.clone();
            let pool = pool.clone();
            fire(store, pool, workflow_id)
        })
        .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;

        let job_id = job.guid();
        js.add(job).await.map_err(|e| SchedulerError::JobError(e.to_string()))?;
        drop(inner);

        self.jobs.write().await.insert(workflow_id, RegisteredJob { job_id });
        info!(%workflow_id, %cron_expr, "workflow registered with scheduler");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn unregister_workflow(&self, workflow_id: Uuid) -> Result<(), SchedulerError> {
        let entry = self
            .jobs
            .write()
            .await
            .remove(&workflow_id)
            .ok_or(SchedulerError::WorkflowNotFound(workflow_id))?;

        let inner = self.inner.read().await;
        if let Some(js) = inner.as_ref() {
            js.remove(&entry.job_id).await.map_err(|e| SchedulerError::JobError(e.to_string()))?;
        }
        info!(%workflow_id, "workflow unregistered from scheduler");
        Ok(())
    }

    pub async fn registered_count(&self) -> usize {
        self.jobs.read().await.len()
    }
}

/// Boxed future type `Job::new_async`'s closure must return. Creates the
/// `workflow_runs` row and enqueues a `job_queue` row for it — the same two
/// steps `api::handlers::runs::trigger` performs for an on-demand run — and
/// leaves driving it to whichever `worker` process picks the job up next.
fn fire(store: Arc<dyn RunStore>, pool: DbPool, workflow_id: Uuid) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        match enqueue_scheduled_run(&store, &pool, workflow_id).await {
            Ok(run_id) => info!(%workflow_id, %run_id, "scheduled run enqueued"),
            Err(e) => error!(%workflow_id, error = %e, "failed to enqueue scheduled run"),
        }
    })
}

async fn enqueue_scheduled_run(
    store: &Arc<dyn RunStore>,
    pool: &DbPool,
    workflow_id: Uuid,
) -> Result<Uuid, crate::EngineError> {
    let run = store.create_run(workflow_id).await?;
    db::repository::jobs::enqueue_job(pool, run.id, workflow_id, serde_json::Value::Null).await?;
    Ok(run.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_field_cron_gets_seconds_prefix() {
        assert_eq!(normalize_cron("*/5 * * * *").unwrap(), "0 */5 * * * *");
    }

    #[test]
    fn six_field_cron_passes_through() {
        assert_eq!(normalize_cron("30 */5 * * * *").unwrap(), "30 */5 * * * *");
    }

    #[test]
    fn malformed_schedule_is_rejected() {
        assert!(normalize_cron("not a schedule").is_err());
        assert!(normalize_cron("* * *").is_err());
    }

    #[test]
    fn right_field_count_but_invalid_values_is_rejected() {
        assert!(normalize_cron("99 * * * *").is_err());
    }
}
