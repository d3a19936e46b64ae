//! Dispatch worker binary: consumes `call-requests`, runs the periodic
//! reconciliation sweep, and shuts down gracefully on ctrl-c.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use callmesh_api::app::services;
use callmesh_infra::{DispatchWorker, HttpProvider, SimulatedProvider, provider::ProviderAdapter};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    callmesh_observability::init();

    let services = services::build_services().await;
    let config = services.config.clone();

    let persistent = cfg!(feature = "redis")
        && std::env::var("USE_PERSISTENT_STORES")
            .is_ok_and(|v| v.parse::<bool>().unwrap_or(false));
    if !persistent {
        tracing::warn!(
            "in-memory wiring is process-local: calls created by a separate API process will \
             never reach this worker; set USE_PERSISTENT_STORES=true and enable the redis \
             feature for multi-process runs"
        );
    }

    // A real provider only when PROVIDER_URL is set; otherwise calls run
    // against the in-process simulation.
    let provider: Arc<dyn ProviderAdapter> = if std::env::var("PROVIDER_URL").is_ok() {
        tracing::info!(endpoint = %config.provider_url, "using HTTP provider");
        Arc::new(HttpProvider::new(config.provider_url.clone()))
    } else {
        tracing::info!("PROVIDER_URL not set; using simulated provider");
        Arc::new(SimulatedProvider::new(
            callmesh_core::OutcomeScript::new(config.retry.max_attempts),
        ))
    };

    let worker = Arc::new(DispatchWorker::new(
        services.store.clone(),
        services.lock.clone(),
        services.queue.clone(),
        provider,
        config,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper = worker.clone();
    let mut sweep_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match sweeper.sweep_stale().await {
                        Ok(0) => {}
                        Ok(n) => tracing::info!(reconciled = n, "stale calls reconciled"),
                        Err(e) => tracing::error!(error = %e, "reconciliation sweep failed"),
                    }
                }
                _ = sweep_shutdown.changed() => break,
            }
        }
    });

    let run = tokio::spawn(worker.clone().run(shutdown_rx));

    tokio::signal::ctrl_c().await.expect("ctrl-c handler");
    tracing::info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    match run.await {
        Ok(Ok(())) => tracing::info!("worker exited cleanly"),
        Ok(Err(e)) => tracing::error!(error = %e, "worker exited with error"),
        Err(e) => tracing::error!(error = %e, "worker task panicked"),
    }
}
