//! Redis Streams-backed queue (durable, at-least-once delivery).
//!
//! Each topic is one stream; consumers read through consumer groups
//! (XREADGROUP), so within a group a message goes to one consumer.
//! Messages are appended with XADD and carry the JSON payload in a
//! single `payload` field.
//!
//! Messages are acknowledged immediately after reading. A worker that
//! crashes mid-dispatch therefore loses its message; the reconciliation
//! sweep recovers the call from the store instead of from the stream's
//! pending list.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{error, instrument};

use super::{JobQueue, QueueError, Subscription};

/// How many entries one XREADGROUP fetches.
const READ_BATCH: usize = 10;

/// Poll interval when the stream is empty.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct RedisStreamsQueue {
    client: Arc<redis::Client>,
}

impl RedisStreamsQueue {
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))
    }

    /// Ensure a consumer group exists on `topic` (idempotent).
    ///
    /// XGROUP CREATE with MKSTREAM creates the stream if missing. A
    /// BUSYGROUP reply means the group already exists and is ignored.
    pub async fn ensure_group(&self, topic: &str, group: &str) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;

        let result: Result<String, redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(topic)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(QueueError::Command(format!("XGROUP CREATE failed: {e}"))),
        }
    }

    async fn xadd(&self, topic: &str, payload: &serde_json::Value) -> Result<(), QueueError> {
        let body = serde_json::to_string(payload)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;

        let mut conn = self.connection().await?;

        let _: String = redis::cmd("XADD")
            .arg(topic)
            .arg("*")
            .arg("payload")
            .arg(&body)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(format!("XADD failed: {e}")))?;

        Ok(())
    }

    async fn read_group(
        conn: &mut redis::aio::MultiplexedConnection,
        topic: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Vec<(String, serde_json::Value)>, QueueError> {
        // No BLOCK: blocking would stall every other command sharing the
        // multiplexed connection. The caller sleeps between empty reads.
        let result: Result<HashMap<String, Vec<redis::Value>>, redis::RedisError> =
            redis::cmd("XREADGROUP")
                .arg("GROUP")
                .arg(group)
                .arg(consumer)
                .arg("COUNT")
                .arg(READ_BATCH)
                .arg("STREAMS")
                .arg(topic)
                .arg(">")
                .query_async(conn)
                .await;

        let stream_data = match result {
            Ok(data) => data,
            // Nil reply when no new entries.
            Err(e) if e.kind() == redis::ErrorKind::TypeError => return Ok(vec![]),
            Err(e) => return Err(QueueError::Command(format!("XREADGROUP failed: {e}"))),
        };

        let entries = stream_data.get(topic).cloned().unwrap_or_default();

        let mut messages = Vec::new();
        for entry in entries {
            if let Some(msg) = parse_stream_entry(entry) {
                messages.push(msg);
            }
        }
        Ok(messages)
    }

    async fn ack(
        conn: &mut redis::aio::MultiplexedConnection,
        topic: &str,
        group: &str,
        ids: &[String],
    ) -> Result<(), QueueError> {
        if ids.is_empty() {
            return Ok(());
        }

        let _: u64 = redis::cmd("XACK")
            .arg(topic)
            .arg(group)
            .arg(ids)
            .query_async(conn)
            .await
            .map_err(|e| QueueError::Command(format!("XACK failed: {e}")))?;

        Ok(())
    }
}

/// Parse one stream entry `[id, [field, value, ...]]` into its id and
/// the JSON under the `payload` field. Entries without a parseable
/// payload are skipped.
fn parse_stream_entry(entry: redis::Value) -> Option<(String, serde_json::Value)> {
    let entry_vec = match entry {
        redis::Value::Bulk(v) => v,
        _ => return None,
    };
    if entry_vec.len() < 2 {
        return None;
    }

    let id = match &entry_vec[0] {
        redis::Value::Data(data) => String::from_utf8_lossy(data).to_string(),
        _ => return None,
    };

    let fields = match &entry_vec[1] {
        redis::Value::Bulk(v) => v,
        _ => return None,
    };

    for chunk in fields.chunks(2) {
        if let [redis::Value::Data(key), redis::Value::Data(value)] = chunk {
            if key.as_slice() == b"payload" {
                let payload = serde_json::from_slice(value).ok()?;
                return Some((id, payload));
            }
        }
    }
    None
}

#[async_trait]
impl JobQueue for RedisStreamsQueue {
    #[instrument(skip(self, payload), fields(topic = %topic), err)]
    async fn publish(&self, topic: &str, payload: &serde_json::Value) -> Result<(), QueueError> {
        self.xadd(topic, payload).await
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
            if let Err(e) = queue.xadd(&topic, &payload).await {
                error!(topic = %topic, error = %e, "delayed publish failed");
            }
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Subscription, QueueError> {
        self.ensure_group(topic, group).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let queue = self.clone();
        let topic = topic.to_string();
        let group = group.to_string();
        let consumer = consumer.to_string();

        tokio::spawn(async move {
            let mut conn = match queue.connection().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!(topic = %topic, error = %e, "subscription connection failed");
                    return;
                }
            };

            loop {
                if tx.is_closed() {
                    return;
                }

                match Self::read_group(&mut conn, &topic, &group, &consumer).await {
                    Ok(messages) if !messages.is_empty() => {
                        let ids: Vec<String> =
                            messages.iter().map(|(id, _)| id.clone()).collect();

                        for (_, payload) in messages {
                            if tx.send(payload).is_err() {
                                return;
                            }
                        }

                        if let Err(e) = Self::ack(&mut conn, &topic, &group, &ids).await {
                            error!(topic = %topic, error = %e, "XACK failed");
                        }
                    }
                    Ok(_) => tokio::time::sleep(POLL_INTERVAL).await,
                    Err(e) => {
                        error!(topic = %topic, error = %e, "stream read failed");
                        tokio::time::sleep(POLL_INTERVAL).await;
                    }
                }
            }
        });

        Ok(Subscription::new(rx))
    }
}
