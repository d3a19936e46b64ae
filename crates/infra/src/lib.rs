//! `callmesh-infra` — infrastructure clients and the dispatch worker.
//!
//! Every external collaborator is behind a trait with an in-memory
//! implementation (dev/test) and a persistent one (Postgres for the call
//! store, Redis for the lock service and the queue, behind the `redis`
//! feature). The worker and the finalizer depend only on the traits.

pub mod config;
pub mod finalize;
pub mod lock;
pub mod provider;
pub mod queue;
pub mod store;
pub mod worker;

pub use config::DispatchConfig;
pub use finalize::{FinalizeDisposition, FinalizeError, Finalizer};
pub use lock::{DestinationLock, InMemoryLockService, LockError};
pub use provider::{
    HttpProvider, ProviderAdapter, ProviderError, ProviderResponse, SimulatedProvider,
};
pub use queue::{InMemoryQueue, JobQueue, QueueError, Subscription};
pub use store::{
    CallPatch, CallStore, CallStoreError, InMemoryCallStore, PostgresCallStore, StatusCounts,
};

#[cfg(feature = "redis")]
pub use lock::RedisLockService;
#[cfg(feature = "redis")]
pub use queue::RedisStreamsQueue;
pub use worker::{DispatchWorker, Handled, WorkerError, WorkerStats};
