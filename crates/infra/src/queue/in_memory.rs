//! In-memory queue for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{JobQueue, QueueError, Subscription};

/// In-memory topic fan-out over tokio channels.
///
/// - No IO; messages published before any subscriber exists are dropped.
/// - Group/consumer names are accepted but not load-balanced: every
///   subscriber of a topic receives every message. Tests run one
///   consumer per topic, which matches consumer-group semantics.
#[derive(Debug, Clone, Default)]
pub struct InMemoryQueue {
    topics: Arc<Mutex<HashMap<String, Vec<mpsc::UnboundedSender<serde_json::Value>>>>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn send(&self, topic: &str, payload: serde_json::Value) {
        let mut topics = self.topics.lock().unwrap();
        if let Some(subs) = topics.get_mut(topic) {
            // Drop any dead subscribers while publishing.
            subs.retain(|tx| tx.send(payload.clone()).is_ok());
        }
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn publish(&self, topic: &str, payload: &serde_json::Value) -> Result<(), QueueError> {
        self.send(topic, payload.clone());
        Ok(())
    }

    async fn publish_delayed(
        &self,
        topic: &str,
        payload: &serde_json::Value,
        delay: Duration,
    ) -> Result<(), QueueError> {
        let queue = self.clone();
        let topic = topic.to_string();
        let payload = payload.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.send(&topic, payload);
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        _group: &str,
        _consumer: &str,
    ) -> Result<Subscription, QueueError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Ok(Subscription::new(rx))
    }
}
