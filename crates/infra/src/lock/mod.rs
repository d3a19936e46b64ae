//! Per-destination mutual exclusion.
//!
//! The lock is advisory: it prevents concurrent dispatch to one
//! destination, but the store's conditional updates remain the authority
//! over call state. Every lock carries a TTL so a crashed worker cannot
//! hold a destination forever.

use std::time::Duration;

use async_trait::async_trait;

use callmesh_core::{CallId, Destination};

mod in_memory;
#[cfg(feature = "redis")]
mod redis;

pub use in_memory::InMemoryLockService;
#[cfg(feature = "redis")]
pub use redis::RedisLockService;

/// Lock service error.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock service connection error: {0}")]
    Connection(String),
    #[error("lock service command error: {0}")]
    Command(String),
}

/// Atomic set-if-absent-with-expiry over destination keys.
#[async_trait]
pub trait DestinationLock: Send + Sync {
    /// Try to take the lock for `key` on behalf of `holder`.
    ///
    /// Returns `true` when the lock was acquired, `false` when another
    /// holder already has it. Acquisition and expiry are atomic.
    async fn acquire(
        &self,
        key: &Destination,
        holder: CallId,
        ttl: Duration,
    ) -> Result<bool, LockError>;

    /// Release the lock for `key`, whoever holds it.
    async fn release(&self, key: &Destination) -> Result<(), LockError>;

    /// Current holder of `key`, if the lock exists and has not expired.
    async fn holder(&self, key: &Destination) -> Result<Option<CallId>, LockError>;
}
