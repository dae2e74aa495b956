//! `workflow-engine` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`     — start the REST API server.
//! - `worker`    — poll `job_queue` and drive the orchestrator for each job.
//! - `scheduler` — register every scheduled workflow and fire cron-triggered runs.
//! - `migrate`   — run pending database migrations.
//! - `validate`  — validate a DAG document JSON file.

mod config;

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use config::AppConfig;
use db::models::JobRow;
use db::DbPool;
use engine::{DagDocument, EngineError, InMemoryBreakerStore, Orchestrator, PgRunStore, RunStore, Scheduler};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "workflow-engine",
    about = "Distributed workflow orchestration engine",
    version
)]
struct Cli {
    #[command(flatten)]
    config: AppConfig,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the REST API server.
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: String,
    },
    /// Poll the job queue and drive the orchestrator for each workflow run.
    Worker,
    /// Register every scheduled workflow as a cron trigger and keep firing them.
    Scheduler,
    /// Run pending database migrations.
    Migrate,
    /// Validate a DAG document JSON file without persisting it.
    Validate {
        /// Path to the DAG document JSON file.
        path: std::path::PathBuf,
    },
}

#[tokio::main]
async fn main() {
    AppConfig::load_dotenv();

    let cli = Cli::parse();

    // `RUST_LOG`, if set, still wins — `EnvFilter::new` only supplies the
    // default directive when the env var is absent.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.config.log_level)))
        .init();

    match cli.command {
        Command::Serve { bind } => {
            info!("starting API server on {bind}");
            let pool = connect(&cli.config).await;
            api::serve(&bind, pool).await.expect("API server crashed");
        }
        Command::Worker => run_worker(&cli.config).await,
        Command::Scheduler => run_scheduler(&cli.config).await,
        Command::Migrate => {
            let pool = connect(&cli.config).await;
            info!("running migrations");
            db::pool::run_migrations(&pool).await.expect("migration failed");
            info!("migrations applied successfully");
        }
        Command::Validate { path } => validate_file(&path),
    }
}

async fn connect(config: &AppConfig) -> DbPool {
    db::pool::create_pool(&config.db_url, config.db_max_connections)
        .await
        .expect("failed to connect to database")
}

fn build_orchestrator(config: &AppConfig, pool: DbPool) -> Orchestrator {
    let mut registry = nodes::builtins(pool.clone()).expect("duplicate built-in executor name");
    registry.freeze();

    let breaker = InMemoryBreakerStore::new(
        config.circuit_breaker_threshold,
        Duration::from_secs(config.circuit_breaker_reset_secs),
    );
    let store = PgRunStore::new(pool);

    Orchestrator::new(Arc::new(store), Arc::new(registry), Arc::new(breaker))
}

/// Dequeue jobs ("drive this workflow_run") and hand each to the
/// already-re-entrant `Orchestrator::drive` (safe to call even if a
/// previous worker crashed mid-run, since every status transition the store
/// applies is monotonic). Up to `WORKER_CONCURRENCY` jobs are driven
/// concurrently, each on its own spawned task, so one slow workflow run
/// doesn't stall the rest of the queue behind it.
async fn run_worker(config: &AppConfig) {
    let pool = connect(config).await;
    let orchestrator = Arc::new(build_orchestrator(config, pool.clone()));
    let concurrency = config.worker_concurrency.max(1) as usize;

    info!(concurrency, "worker started, polling job_queue");

    let mut in_flight: JoinSet<()> = JoinSet::new();

    loop {
        while in_flight.len() < concurrency {
            match db::repository::jobs::fetch_next_job(&pool).await {
                Ok(Some(job)) => {
                    let orchestrator = orchestrator.clone();
                    let pool = pool.clone();
                    in_flight.spawn(async move {
                        let job_id = job.id;
                        match process_job(&orchestrator, &job).await {
                            Ok(()) => {
                                if let Err(e) = db::repository::jobs::complete_job(&pool, job_id).await {
                                    error!(%job_id, error = %e, "failed to mark job completed");
                                }
                            }
                            Err(e) => {
                                warn!(%job_id, error = %e, "job failed");
                                if let Err(e) =
                                    db::repository::jobs::fail_job(&pool, job_id, job.max_attempts).await
                                {
                                    error!(%job_id, error = %e, "failed to mark job failed");
                                }
                            }
                        }
                    });
                }
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "failed to poll job_queue, backing off");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    break;
                }
            }
        }

        if in_flight.is_empty() {
            tokio::time::sleep(Duration::from_secs(1)).await;
        } else {
            in_flight.join_next().await;
        }
    }
}

async fn process_job(orchestrator: &Orchestrator, job: &JobRow) -> Result<(), EngineError> {
    let store = orchestrator.store();
    let workflow = store.get_workflow(job.workflow_id).await?;
    let dag: DagDocument = serde_json::from_value(workflow.definition.clone())
        .map_err(|e| EngineError::OrchestrationError(format!("malformed DAG document: {e}")))?;
    engine::validate_dag(&dag)?;

    store.update_run_status(job.workflow_run_id, "running", false).await?;
    orchestrator.drive(job.workflow_run_id, job.workflow_id, &dag).await
}

/// Register every active scheduled workflow, then stay alive until
/// interrupted so `tokio-cron-scheduler`'s background task keeps firing.
///
/// Only needs a `RunStore` and a pool, not a full `Orchestrator` — firing a
/// schedule enqueues a `job_queue` row for the `worker` subcommand to drive,
/// it never drives the run itself.
async fn run_scheduler(config: &AppConfig) {
    let pool = connect(config).await;
    let store: Arc<dyn RunStore> = Arc::new(PgRunStore::new(pool.clone()));

    let scheduler = Scheduler::new(store, pool);
    scheduler.start().await.expect("failed to start cron scheduler");

    let registered = scheduler.register_all().await.expect("failed to register scheduled workflows");
    info!(registered, "scheduled workflows registered");

    tokio::signal::ctrl_c().await.ok();
    info!("shutting down scheduler");
    scheduler.stop().await.ok();
}

fn validate_file(path: &std::path::Path) {
    let content =
        std::fs::read_to_string(path).unwrap_or_else(|e| panic!("cannot read file {}: {e}", path.display()));

    let dag: DagDocument = serde_json::from_str(&content).unwrap_or_else(|e| panic!("invalid JSON: {e}"));

    match engine::validate_dag(&dag) {
        Ok(order) => println!("DAG is valid. Execution order: {order:?}"),
        Err(e) => {
            eprintln!("validation failed: {e}");
            std::process::exit(1);
        }
    }
}
