//! Redis-backed lock service (`SET key holder NX EX ttl` / `DEL`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use callmesh_core::{CallId, Destination};

use super::{DestinationLock, LockError};

/// Distributed destination lock over a shared Redis instance.
///
/// Atomicity comes from `SET ... NX EX`: acquisition and expiry are a
/// single command, so two workers can never both win a key.
#[derive(Debug, Clone)]
pub struct RedisLockService {
    client: Arc<redis::Client>,
}

impl RedisLockService {
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, LockError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| LockError::Connection(e.to_string()))?;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, LockError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| LockError::Connection(e.to_string()))
    }
}

#[async_trait]
impl DestinationLock for RedisLockService {
    async fn acquire(
        &self,
        key: &Destination,
        holder: CallId,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let mut conn = self.connection().await?;

        // SET NX EX returns OK on success, nil when the key is held.
        let result: Option<String> = redis::cmd("SET")
            .arg(key.lock_key())
            .arg(holder.to_string())
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::Command(format!("SET NX failed: {e}")))?;

        Ok(result.is_some())
    }

    async fn release(&self, key: &Destination) -> Result<(), LockError> {
        let mut conn = self.connection().await?;

        let _: u64 = redis::cmd("DEL")
            .arg(key.lock_key())
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::Command(format!("DEL failed: {e}")))?;

        Ok(())
    }

    async fn holder(&self, key: &Destination) -> Result<Option<CallId>, LockError> {
        let mut conn = self.connection().await?;

        let value: Option<String> = redis::cmd("GET")
            .arg(key.lock_key())
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::Command(format!("GET failed: {e}")))?;

        Ok(value.and_then(|v| v.parse().ok()))
    }
}
