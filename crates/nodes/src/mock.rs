//! `MockNode` — a test double for [`Executor`].
//!
//! Useful in unit and integration tests where a real executor implementation
//! is either unavailable or irrelevant.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::{traits::ExecutionContext, Executor, NodeError};

/// Behaviour injected into `MockNode` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
    /// Fail with a `Retryable` error on the first `failures` calls, then
    /// succeed with `value` — models a flaky executor that recovers after
    /// retrying.
    FailTimesThenSucceed {
        failures: usize,
        message: String,
        value: Value,
    },
}

/// A mock executor that records every call it receives and returns a
/// programmer-specified result.
pub struct MockNode {
    /// Label used in test assertions.
    pub name: String,
    /// What the node will do when `execute` is called.
    pub behaviour: MockBehaviour,
    /// All params seen by this node (in call order).
    pub calls: Arc<Mutex<Vec<Value>>>,
    attempt: AtomicUsize,
}

impl MockNode {
    /// Create a mock that always succeeds with the given value.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::ReturnValue(value),
            calls: Arc::new(Mutex::new(Vec::new())),
            attempt: AtomicUsize::new(0),
        }
    }

    /// Create a mock that always fails with a `Fatal` error.
    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::FailFatal(msg.into()),
            calls: Arc::new(Mutex::new(Vec::new())),
            attempt: AtomicUsize::new(0),
        }
    }

    /// Create a mock that always fails with a `Retryable` error.
    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::FailRetryable(msg.into()),
            calls: Arc::new(Mutex::new(Vec::new())),
            attempt: AtomicUsize::new(0),
        }
    }

    /// Create a mock that fails retryably `failures` times, then succeeds.
    pub fn failing_then_succeeding(
        name: impl Into<String>,
        failures: usize,
        msg: impl Into<String>,
        value: Value,
    ) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::FailTimesThenSucceed {
                failures,
                message: msg.into(),
                value,
            },
            calls: Arc::new(Mutex::new(Vec::new())),
            attempt: AtomicUsize::new(0),
        }
    }

    /// Number of times this node has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

fn label(name: &str, v: &Value) -> Value {
    let mut out = json!({ "node": name });
    if let (Some(out_obj), Some(v_obj)) = (out.as_object_mut(), v.as_object()) {
        for (k, val) in v_obj {
            out_obj.insert(k.clone(), val.clone());
        }
    }
    out
}

#[async_trait]
impl Executor for MockNode {
    async fn execute(&self, params: Value, _ctx: &ExecutionContext) -> Result<Value, NodeError> {
        self.calls.lock().unwrap().push(params.clone());
        let call_index = self.attempt.fetch_add(1, Ordering::SeqCst);

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(label(&self.name, v)),
            MockBehaviour::FailRetryable(msg) => Err(NodeError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(NodeError::Fatal(msg.clone())),
            MockBehaviour::FailTimesThenSucceed {
                failures,
                message,
                value,
            } => {
                if call_index < *failures {
                    Err(NodeError::Retryable(message.clone()))
                } else {
                    Ok(label(&self.name, value))
                }
            }
        }
    }
}
