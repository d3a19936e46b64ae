//! Service wiring: in-memory for dev/test, Postgres + Redis behind the
//! `redis` feature for production.

use std::sync::Arc;

use callmesh_infra::{
    DestinationLock, DispatchConfig, Finalizer, InMemoryCallStore, InMemoryLockService,
    InMemoryQueue, JobQueue, store::CallStore,
};

#[cfg(feature = "redis")]
use callmesh_infra::{
    PostgresCallStore, RedisLockService, RedisStreamsQueue,
    queue::{CALL_REQUESTS, CALL_STATUS_UPDATES},
};
#[cfg(feature = "redis")]
use sqlx::PgPool;

/// Everything the HTTP handlers and the worker binary share.
///
/// All collaborators are trait objects, so the same wiring serves both
/// backends.
#[derive(Clone)]
pub struct AppServices {
    pub store: Arc<dyn CallStore>,
    pub lock: Arc<dyn DestinationLock>,
    pub queue: Arc<dyn JobQueue>,
    pub finalizer: Arc<Finalizer>,
    pub config: DispatchConfig,
}

impl AppServices {
    fn wire(
        store: Arc<dyn CallStore>,
        lock: Arc<dyn DestinationLock>,
        queue: Arc<dyn JobQueue>,
        config: DispatchConfig,
    ) -> Self {
        let finalizer = Arc::new(Finalizer::new(
            store.clone(),
            lock.clone(),
            queue.clone(),
            config.retry.clone(),
        ));
        Self {
            store,
            lock,
            queue,
            finalizer,
            config,
        }
    }

    /// In-memory wiring (dev/test).
    pub fn in_memory(config: DispatchConfig) -> Self {
        Self::wire(
            Arc::new(InMemoryCallStore::new()),
            Arc::new(InMemoryLockService::new()),
            Arc::new(InMemoryQueue::new()),
            config,
        )
    }
}

pub async fn build_services() -> AppServices {
    let use_persistent = std::env::var("USE_PERSISTENT_STORES")
        .unwrap_or_else(|_| "false".to_string())
        .parse::<bool>()
        .unwrap_or(false);

    if use_persistent {
        #[cfg(feature = "redis")]
        {
            return build_persistent_services().await;
        }
        #[cfg(not(feature = "redis"))]
        {
            tracing::warn!(
                "USE_PERSISTENT_STORES=true but redis feature not enabled, falling back to in-memory"
            );
        }
    }

    AppServices::in_memory(DispatchConfig::from_env())
}

#[cfg(feature = "redis")]
async fn build_persistent_services() -> AppServices {
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set when USE_PERSISTENT_STORES=true");
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());

    let pool = PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to Postgres");

    let store = PostgresCallStore::new(pool);
    store.ensure_schema().await.expect("Failed to ensure schema");

    let lock = RedisLockService::new(&redis_url).expect("Failed to create Redis lock service");

    let queue = RedisStreamsQueue::new(&redis_url).expect("Failed to create Redis Streams queue");
    queue
        .ensure_group(CALL_REQUESTS, "call-workers")
        .await
        .expect("Failed to create call-requests consumer group");
    queue
        .ensure_group(CALL_STATUS_UPDATES, "status-consumers")
        .await
        .expect("Failed to create call-status-updates consumer group");

    AppServices::wire(
        Arc::new(store),
        Arc::new(lock),
        Arc::new(queue),
        DispatchConfig::from_env(),
    )
}
