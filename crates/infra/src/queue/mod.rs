//! Publish/subscribe job queue over two topics.
//!
//! - `call-requests`: job requests consumed by the dispatch worker.
//! - `call-status-updates`: status events for downstream consumers.
//!
//! Delivery is at-least-once; consumers must be idempotent. Requeues with
//! backoff use [`JobQueue::publish_delayed`] (a delayed message, not a
//! fire-and-forget timer inside the worker).

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

mod in_memory;
#[cfg(feature = "redis")]
mod redis_streams;

pub use in_memory::InMemoryQueue;
#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsQueue;

/// Topic carrying job-request messages.
pub const CALL_REQUESTS: &str = "call-requests";

/// Topic carrying status events after finalization.
pub const CALL_STATUS_UPDATES: &str = "call-status-updates";

/// Queue error.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue connection error: {0}")]
    Connection(String),
    #[error("queue command error: {0}")]
    Command(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A subscription to one topic.
///
/// Messages arrive as raw JSON values; payload validation belongs to the
/// consumer (malformed payloads are a consumer-side drop, not a transport
/// error).
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<serde_json::Value>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<serde_json::Value>) -> Self {
        Self { rx }
    }

    /// Receive the next message; `None` once the publisher side is gone.
    pub async fn recv(&mut self) -> Option<serde_json::Value> {
        self.rx.recv().await
    }
}

/// Publish/subscribe transport for job requests and status events.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Publish a message on `topic`.
    async fn publish(&self, topic: &str, payload: &serde_json::Value) -> Result<(), QueueError>;

    /// Publish a message on `topic` after `delay` (backoff requeue).
    async fn publish_delayed(
        &self,
        topic: &str,
        payload: &serde_json::Value,
        delay: Duration,
    ) -> Result<(), QueueError>;

    /// Subscribe to `topic` as `consumer` within `group`.
    ///
    /// Within a group each message is delivered to one consumer (load
    /// balancing); implementations without real consumer groups treat
    /// every subscription as its own consumer.
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Subscription, QueueError>;
}
