//! `engine` crate — DAG document model, validation, condition evaluation,
//! the circuit breaker, the task runner, and the orchestrator/scheduler that
//! drive a workflow run to completion.

pub mod circuit;
pub mod condition;
pub mod dag;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod runner;
pub mod scheduler;
pub mod store;

pub use circuit::{CircuitBreakerStore, InMemoryBreakerStore};
pub use dag::validate_dag;
pub use error::EngineError;
pub use models::{DagDocument, Dependency, LoopSpec, TaskNode, TriggerRule, Workflow};
pub use orchestrator::Orchestrator;
pub use runner::{run_task_attempt, TaskAttemptOutcome};
pub use scheduler::{Scheduler, SchedulerError};
pub use store::{InMemoryRunStore, PgRunStore, RunStore};
