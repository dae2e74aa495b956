//! Executor-level error type.

use thiserror::Error;

/// Errors returned by an executor's `execute` method.
///
/// The task runner uses the variant to decide retry behaviour:
/// - `Retryable` — counts against the task's `retries` budget and the
///   executor's circuit breaker, then the runner re-attempts with backoff.
/// - `Fatal`     — short-circuits retries even if the budget isn't
///   exhausted (bad params, a contract violation); still counts against
///   the circuit breaker since the executor itself was invoked.
#[derive(Debug, Error, Clone)]
pub enum NodeError {
    /// Transient failure; the runner should re-try the attempt.
    #[error("retryable executor error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted regardless of
    /// the task's remaining retry budget.
    #[error("fatal executor error: {0}")]
    Fatal(String),
}

impl NodeError {
    /// The message carried by either variant, for persisting into a
    /// `TaskRun`'s result.
    pub fn message(&self) -> &str {
        match self {
            NodeError::Retryable(m) | NodeError::Fatal(m) => m,
        }
    }
}
