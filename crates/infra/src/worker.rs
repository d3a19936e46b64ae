//! Call dispatch worker.
//!
//! Consumes job requests, enforces per-destination mutual exclusion and
//! the global in-flight cap, dispatches to the provider, and finalizes
//! synchronous outcomes through the shared [`Finalizer`].
//!
//! The worker keeps no in-process mutual-exclusion state: the lock
//! service and the store's conditional updates carry all coordination,
//! so any number of worker processes can run against the same backends.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::{Semaphore, watch};
use tracing::{debug, error, info, instrument, warn};

use callmesh_core::{CallId, CallStatus, Destination, JobRequest};

use crate::config::DispatchConfig;
use crate::finalize::{FinalizeDisposition, FinalizeError, Finalizer};
use crate::lock::{DestinationLock, LockError};
use crate::provider::{ProviderAdapter, ProviderResponse};
use crate::queue::{CALL_REQUESTS, JobQueue, QueueError};
use crate::store::{CallPatch, CallStore, CallStoreError};

/// Consumer group shared by all worker processes.
const CONSUMER_GROUP: &str = "call-workers";

/// Error recorded for calls reconciled by the staleness sweep.
const STALE_ERROR: &str = "dispatch timed out";

/// Worker error.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] CallStoreError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Finalize(#[from] FinalizeError),
}

/// How one job-request message was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// Global cap reached; message republished with a short delay.
    Deferred,
    /// Destination lock held by another call; message dropped, the
    /// holder's finalization requeues or the sweep recovers the call.
    SkippedLocked,
    /// Conditional PENDING -> IN_PROGRESS transition did not apply
    /// (duplicate delivery or a concurrent worker won); dropped.
    Dropped,
    /// Provider accepted; the callback webhook will finalize.
    Accepted,
    /// Synchronous provider outcome, finalized inline.
    Finalized(FinalizeDisposition),
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WorkerStats {
    pub processed: u64,
    pub completed: u64,
    pub requeued: u64,
    pub failed: u64,
    pub accepted: u64,
    pub skipped_locked: u64,
    pub deferred_capacity: u64,
    pub dropped: u64,
    pub swept_expired: u64,
    pub swept_requeued: u64,
}

pub struct DispatchWorker {
    store: Arc<dyn CallStore>,
    lock: Arc<dyn DestinationLock>,
    queue: Arc<dyn JobQueue>,
    provider: Arc<dyn ProviderAdapter>,
    finalizer: Arc<Finalizer>,
    config: DispatchConfig,
    stats: Mutex<WorkerStats>,
}

impl DispatchWorker {
    pub fn new(
        store: Arc<dyn CallStore>,
        lock: Arc<dyn DestinationLock>,
        queue: Arc<dyn JobQueue>,
        provider: Arc<dyn ProviderAdapter>,
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
            provider,
            finalizer,
            config,
            stats: Mutex::new(WorkerStats::default()),
        }
    }

    /// Current worker statistics.
    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().unwrap().clone()
    }

    /// Consume `call-requests` until `shutdown` flips to `true`.
    ///
    /// Each message runs on its own task; a semaphore sized to the
    /// global cap bounds local concurrency (the store-count admission
    /// check bounds it across processes).
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        let consumer = format!("worker-{}", uuid::Uuid::now_v7());
        let mut subscription = self
            .queue
            .subscribe(CALL_REQUESTS, CONSUMER_GROUP, &consumer)
            .await?;
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_calls));

        info!(consumer = %consumer, cap = self.config.max_concurrent_calls, "dispatch worker started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                message = subscription.recv() => {
                    let Some(payload) = message else { break };
                    let permit = permits.clone().acquire_owned().await.expect("semaphore closed");
                    let worker = self.clone();
                    tokio::spawn(async move {
                        worker.handle_message(payload).await;
                        drop(permit);
                    });
                }
            }
        }

        info!(consumer = %consumer, "dispatch worker stopped");
        Ok(())
    }

    /// Handle one raw message. Malformed payloads are dropped; handling
    /// errors are logged and the message is not retried here (delayed
    /// redelivery or the sweep owns recovery).
    async fn handle_message(&self, payload: serde_json::Value) {
        let request: JobRequest = match serde_json::from_value(payload) {
            Ok(request) => request,
            Err(e) => {
                error!(error = %e, "malformed job request dropped");
                self.stats.lock().unwrap().dropped += 1;
                return;
            }
        };

        match self.handle_one(request).await {
            Ok(handled) => self.record(handled),
            Err(e) => error!(error = %e, "dispatch attempt errored"),
        }
    }

    /// Process one parsed job request. Public for tests.
    #[instrument(skip(self, request), fields(call_id = %request.id, to = %request.to))]
    pub async fn handle_one(&self, mut request: JobRequest) -> Result<Handled, WorkerError> {
        // Soft admission check against the store, not a local counter:
        // the count is shared across worker processes. Stale reads can
        // briefly overshoot the cap.
        let in_flight = self.store.count_by_status(CallStatus::InProgress).await?;
        if in_flight >= self.config.max_concurrent_calls as u64 {
            debug!(in_flight, "at capacity, deferring");
            let payload = serde_json::to_value(&request)
                .map_err(|e| QueueError::Serialization(e.to_string()))?;
            self.queue
                .publish_delayed(CALL_REQUESTS, &payload, self.config.admission_retry_delay)
                .await?;
            return Ok(Handled::Deferred);
        }

        if !self
            .lock
            .acquire(&request.to, request.id, self.config.lock_ttl)
            .await?
        {
            debug!("destination locked, skipping");
            return Ok(Handled::SkippedLocked);
        }

        // The store owns the attempt counter: the claim increments it
        // in-store and reads the result back, so a redelivered message
        // carrying a stale count cannot rewind it.
        let updated = self
            .store
            .update_if_status(
                request.id,
                Some(CallStatus::Pending),
                CallPatch::new()
                    .status(CallStatus::InProgress)
                    .increment_attempts()
                    .started_at(Utc::now()),
            )
            .await?;
        if updated == 0 {
            // Duplicate delivery, or the record is already terminal.
            self.release_lock(&request.to, request.id).await;
            return Ok(Handled::Dropped);
        }
        let attempt = match self.store.find_by_id(request.id).await? {
            Some(call) => call.attempts,
            None => {
                self.release_lock(&request.to, request.id).await;
                return Ok(Handled::Dropped);
            }
        };
        request.attempts = attempt;

        info!(attempt, "dispatching call");
        let callback_url = self.config.callback_url();
        match self.provider.dispatch(&request, &callback_url).await {
            Ok(ProviderResponse::Outcome(outcome)) => {
                let disposition = self
                    .finalizer
                    .finalize(request.id, outcome, Utc::now(), None, None)
                    .await?;
                Ok(Handled::Finalized(disposition))
            }
            Ok(ProviderResponse::Accepted) => {
                debug!("provider accepted, awaiting callback");
                Ok(Handled::Accepted)
            }
            Err(e) => {
                warn!(error = %e, "provider dispatch failed");
                let disposition = self
                    .finalizer
                    .finalize(
                        request.id,
                        callmesh_core::CallOutcome::Failed,
                        Utc::now(),
                        None,
                        Some(e.to_string()),
                    )
                    .await?;
                Ok(Handled::Finalized(disposition))
            }
        }
    }

    /// Reconcile calls stuck IN_PROGRESS past the staleness threshold.
    ///
    /// Covers the lost-callback and crashed-worker cases: attempts
    /// remaining means the call goes back to PENDING and is republished;
    /// otherwise it is EXPIRED. This is the only writer of EXPIRED.
    #[instrument(skip(self))]
    pub async fn sweep_stale(&self) -> Result<usize, WorkerError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.stale_in_progress).unwrap_or_default();
        let stale = self.store.find_stale_in_progress(cutoff).await?;
        let mut reconciled = 0;

        for call in stale {
            if self.config.retry.should_retry(call.attempts) {
                let updated = self
                    .store
                    .update_if_status(
                        call.id,
                        Some(CallStatus::InProgress),
                        CallPatch::new()
                            .status(CallStatus::Pending)
                            .last_error(STALE_ERROR),
                    )
                    .await?;
                if updated == 0 {
                    continue;
                }
                self.release_lock(&call.to, call.id).await;

                let payload = serde_json::to_value(call.to_job_request())
                    .map_err(|e| QueueError::Serialization(e.to_string()))?;
                self.queue.publish(CALL_REQUESTS, &payload).await?;

                warn!(call_id = %call.id, attempts = call.attempts, "stale call requeued");
                self.stats.lock().unwrap().swept_requeued += 1;
            } else {
                let updated = self
                    .store
                    .update_if_status(
                        call.id,
                        Some(CallStatus::InProgress),
                        CallPatch::new()
                            .status(CallStatus::Expired)
                            .ended_at(Utc::now())
                            .last_error(STALE_ERROR),
                    )
                    .await?;
                if updated == 0 {
                    continue;
                }
                self.release_lock(&call.to, call.id).await;

                warn!(call_id = %call.id, attempts = call.attempts, "stale call expired");
                self.stats.lock().unwrap().swept_expired += 1;
            }
            reconciled += 1;
        }

        Ok(reconciled)
    }

    async fn release_lock(&self, to: &Destination, call_id: CallId) {
        // Only release if this call holds the key; the lock may belong to
        // another in-flight call for the same destination.
        match self.lock.holder(to).await {
            Ok(Some(holder)) if holder == call_id => {
                if let Err(e) = self.lock.release(to).await {
                    warn!(call_id = %call_id, error = %e, "lock release failed");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(call_id = %call_id, error = %e, "lock holder check failed"),
        }
    }

    fn record(&self, handled: Handled) {
        let mut stats = self.stats.lock().unwrap();
        stats.processed += 1;
        match handled {
            Handled::Deferred => stats.deferred_capacity += 1,
            Handled::SkippedLocked => stats.skipped_locked += 1,
            Handled::Dropped => stats.dropped += 1,
            Handled::Accepted => stats.accepted += 1,
            Handled::Finalized(FinalizeDisposition::Completed) => stats.completed += 1,
            Handled::Finalized(FinalizeDisposition::Requeued) => stats.requeued += 1,
            Handled::Finalized(FinalizeDisposition::Failed) => stats.failed += 1,
            Handled::Finalized(_) => stats.dropped += 1,
        }
    }
}
