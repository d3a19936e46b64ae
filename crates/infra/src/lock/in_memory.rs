//! In-memory lock service for tests/dev.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use callmesh_core::{CallId, Destination};

use super::{DestinationLock, LockError};

/// Single-process lock table honoring TTL expiry.
#[derive(Debug, Default)]
pub struct InMemoryLockService {
    locks: Mutex<HashMap<String, (CallId, Instant)>>,
}

impl InMemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DestinationLock for InMemoryLockService {
    async fn acquire(
        &self,
        key: &Destination,
        holder: CallId,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let mut locks = self.locks.lock().unwrap();
        let now = Instant::now();
        let key = key.lock_key();

        if let Some((_, deadline)) = locks.get(&key) {
            if *deadline > now {
                return Ok(false);
            }
            // Expired entry; the destination is dispatchable again.
            locks.remove(&key);
        }

        locks.insert(key, (holder, now + ttl));
        Ok(true)
    }

    async fn release(&self, key: &Destination) -> Result<(), LockError> {
        self.locks.lock().unwrap().remove(&key.lock_key());
        Ok(())
    }

    async fn holder(&self, key: &Destination) -> Result<Option<CallId>, LockError> {
        let locks = self.locks.lock().unwrap();
        Ok(locks
            .get(&key.lock_key())
            .filter(|(_, deadline)| *deadline > Instant::now())
            .map(|(holder, _)| *holder))
    }
}
