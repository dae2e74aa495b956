//! `queue` crate — the task-attempt broker abstraction.
//!
//! Driving the DAG from the orchestrator process means task dispatch no
//! longer strictly needs a broker hop — `engine::orchestrator` dispatches
//! eligible tasks directly via `tokio::spawn` and resolves retries with an
//! in-process `tokio::time::sleep`, which is enough for a single-process
//! worker.
//!
//! This crate is the extension point for a distributed deployment: a pool of
//! worker processes competing for task-attempt messages off one logical
//! queue, with delayed redelivery (`visible_at = now + delay`) standing in
//! for retry scheduling. `Broker` is the trait that hop would be built
//! against; `InProcessBroker` is a Mutex-guarded, `visible_at`-ordered
//! implementation usable within a single process today and replaceable by a
//! Redis-backed one without touching callers.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("no message available to lease")]
    Empty,
    #[error("message {0} is not currently leased")]
    NotLeased(Uuid),
}

/// One task-attempt dispatch message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: Uuid,
    pub workflow_run_id: Uuid,
    pub task_id: String,
    pub attempt: u32,
    pub payload: serde_json::Value,
    /// The message is not eligible for lease before this instant — how
    /// retry backoff is expressed on the wire.
    pub visible_at: DateTime<Utc>,
}

impl TaskMessage {
    pub fn new(workflow_run_id: Uuid, task_id: impl Into<String>, attempt: u32, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_run_id,
            task_id: task_id.into(),
            attempt,
            payload,
            visible_at: Utc::now(),
        }
    }

    pub fn delayed_until(mut self, visible_at: DateTime<Utc>) -> Self {
        self.visible_at = visible_at;
        self
    }
}

/// The broker contract: workers lease messages, do the work, then ack (on
/// success/terminal failure) or nack (schedule redelivery after a delay).
#[async_trait]
pub trait Broker: Send + Sync {
    async fn enqueue(&self, message: TaskMessage);

    /// Lease the oldest message whose `visible_at` has passed, if any.
    /// Leased messages are hidden from further `lease` calls until
    /// `ack`/`nack`.
    async fn lease(&self) -> Option<TaskMessage>;

    /// Acknowledge successful (or terminally failed) processing, removing
    /// the message for good.
    async fn ack(&self, id: Uuid) -> Result<(), QueueError>;

    /// Return a leased message to the queue with an updated `visible_at`,
    /// implementing the retry-by-redelivery model.
    async fn nack(&self, id: Uuid, redeliver_at: DateTime<Utc>) -> Result<(), QueueError>;

    async fn len(&self) -> usize;
    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Min-heap entry ordered by `visible_at` (earliest first).
struct QueuedEntry(TaskMessage);

impl PartialEq for QueuedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.visible_at == other.0.visible_at
    }
}
impl Eq for QueuedEntry {}
impl PartialOrd for QueuedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueuedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest visible_at sorts first.
        other.0.visible_at.cmp(&self.0.visible_at)
    }
}

#[derive(Default)]
struct State {
    pending: BinaryHeap<QueuedEntry>,
    leased: std::collections::HashMap<Uuid, TaskMessage>,
}

/// Single-process broker. Workers within the same process compete for
/// leases by calling `lease()` concurrently; a Redis-backed `Broker`
/// implementation would expose the same interface across processes.
pub struct InProcessBroker {
    state: Arc<Mutex<State>>,
}

impl InProcessBroker {
    pub fn new() -> Self {
        Self { state: Arc::new(Mutex::new(State::default())) }
    }
}

impl Default for InProcessBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InProcessBroker {
    async fn enqueue(&self, message: TaskMessage) {
        self.state.lock().await.pending.push(QueuedEntry(message));
    }

    async fn lease(&self) -> Option<TaskMessage> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        if state.pending.peek()?.0.visible_at > now {
            return None;
        }
        let message = state.pending.pop()?.0;
        state.leased.insert(message.id, message.clone());
        Some(message)
    }

    async fn ack(&self, id: Uuid) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.leased.remove(&id).map(|_| ()).ok_or(QueueError::NotLeased(id))
    }

    async fn nack(&self, id: Uuid, redeliver_at: DateTime<Utc>) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let mut message = state.leased.remove(&id).ok_or(QueueError::NotLeased(id))?;
        message.visible_at = redeliver_at;
        state.pending.push(QueuedEntry(message));
        Ok(())
    }

    async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.pending.len() + state.leased.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn msg(task_id: &str) -> TaskMessage {
        TaskMessage::new(Uuid::new_v4(), task_id, 0, json!({}))
    }

    #[tokio::test]
    async fn lease_returns_messages_oldest_visible_at_first() {
        let broker = InProcessBroker::new();
        let early = msg("a").delayed_until(Utc::now() - Duration::seconds(10));
        let late = msg("b").delayed_until(Utc::now() - Duration::seconds(1));
        broker.enqueue(late.clone()).await;
        broker.enqueue(early.clone()).await;

        let leased = broker.lease().await.unwrap();
        assert_eq!(leased.task_id, "a");
    }

    #[tokio::test]
    async fn not_yet_visible_messages_are_not_leased() {
        let broker = InProcessBroker::new();
        broker.enqueue(msg("a").delayed_until(Utc::now() + Duration::seconds(60))).await;
        assert!(broker.lease().await.is_none());
    }

    #[tokio::test]
    async fn ack_removes_a_leased_message_permanently() {
        let broker = InProcessBroker::new();
        broker.enqueue(msg("a")).await;
        let leased = broker.lease().await.unwrap();
        broker.ack(leased.id).await.unwrap();
        assert!(broker.is_empty().await);
    }

    #[tokio::test]
    async fn nack_redelivers_after_the_requested_delay() {
        let broker = InProcessBroker::new();
        broker.enqueue(msg("a")).await;
        let leased = broker.lease().await.unwrap();

        assert!(broker.lease().await.is_none(), "message is hidden while leased");

        broker.nack(leased.id, Utc::now() - Duration::seconds(1)).await.unwrap();
        let redelivered = broker.lease().await.unwrap();
        assert_eq!(redelivered.id, leased.id);
    }

    #[tokio::test]
    async fn ack_of_unknown_message_errors() {
        let broker = InProcessBroker::new();
        assert!(matches!(broker.ack(Uuid::new_v4()).await, Err(QueueError::NotLeased(_))));
    }
}
