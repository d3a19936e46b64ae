//! Attempt finalization: the single path every outcome goes through.
//!
//! Both the worker's synchronous provider path and the callback webhook
//! finalize through [`Finalizer::finalize`], so the retry/terminal
//! decision, the status event, and the lock release live in one place.
//!
//! Ordering matters: the conditional store write happens first, the lock
//! is released only after the write is confirmed, and under at-least-once
//! delivery a second finalization of the same attempt sees the guard
//! fail and becomes a no-op.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use callmesh_core::{CallId, CallOutcome, CallStatus, RetryPolicy, StatusEvent};

use crate::lock::DestinationLock;
use crate::queue::{CALL_REQUESTS, CALL_STATUS_UPDATES, JobQueue, QueueError};
use crate::store::{CallPatch, CallStore, CallStoreError};

/// Finalization error.
#[derive(Debug, thiserror::Error)]
pub enum FinalizeError {
    #[error(transparent)]
    Store(#[from] CallStoreError),
    #[error("requeue failed: {0}")]
    Requeue(#[from] QueueError),
}

/// What finalization did with the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeDisposition {
    /// Recorded COMPLETED.
    Completed,
    /// Attempt failed with retries remaining; call is PENDING again and a
    /// delayed job request is on the queue.
    Requeued,
    /// Recorded FAILED (retries exhausted or hard failure on the last
    /// attempt).
    Failed,
    /// The call was already finalized; nothing changed (idempotent replay).
    AlreadyFinal,
    /// No such call.
    NotFound,
}

pub struct Finalizer {
    store: Arc<dyn CallStore>,
    lock: Arc<dyn DestinationLock>,
    queue: Arc<dyn JobQueue>,
    retry: RetryPolicy,
}

impl Finalizer {
    pub fn new(
        store: Arc<dyn CallStore>,
        lock: Arc<dyn DestinationLock>,
        queue: Arc<dyn JobQueue>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            lock,
            queue,
            retry,
        }
    }

    /// Finalize one dispatch attempt.
    ///
    /// `error_detail` overrides the outcome's default failure description
    /// in `last_error` (used for provider transport errors).
    #[instrument(skip(self, error_detail), fields(call_id = %call_id, ?outcome))]
    pub async fn finalize(
        &self,
        call_id: CallId,
        outcome: CallOutcome,
        completed_at: DateTime<Utc>,
        duration_sec: Option<f64>,
        error_detail: Option<String>,
    ) -> Result<FinalizeDisposition, FinalizeError> {
        let Some(call) = self.store.find_by_id(call_id).await? else {
            return Ok(FinalizeDisposition::NotFound);
        };
        if call.status.is_terminal() {
            return Ok(FinalizeDisposition::AlreadyFinal);
        }

        if outcome.is_success() {
            let updated = self
                .store
                .update_if_status(
                    call_id,
                    Some(CallStatus::InProgress),
                    CallPatch::new()
                        .status(CallStatus::Completed)
                        .ended_at(completed_at),
                )
                .await?;
            if updated == 0 {
                // Lost the race with another finalizer or the sweep.
                return Ok(FinalizeDisposition::AlreadyFinal);
            }

            let duration = duration_sec.or_else(|| {
                call.started_at
                    .map(|s| (completed_at - s).num_milliseconds() as f64 / 1000.0)
            });
            self.publish_status(call_id, CallStatus::Completed, duration, completed_at)
                .await;
            self.release_lock(&call).await;

            info!(call_id = %call_id, "call completed");
            return Ok(FinalizeDisposition::Completed);
        }

        let last_error = error_detail.unwrap_or_else(|| outcome.error_description().to_string());

        if self.retry.should_retry(call.attempts) {
            let updated = self
                .store
                .update_if_status(
                    call_id,
                    Some(CallStatus::InProgress),
                    CallPatch::new()
                        .status(CallStatus::Pending)
                        .last_error(last_error.clone()),
                )
                .await?;
            if updated == 0 {
                return Ok(FinalizeDisposition::AlreadyFinal);
            }

            // Release before the delayed redelivery fires so the next
            // attempt can take the destination.
            self.release_lock(&call).await;

            let delay = self.retry.delay_for_attempt(call.attempts);
            let request = serde_json::to_value(call.to_job_request())
                .map_err(|e| QueueError::Serialization(e.to_string()))?;
            self.queue
                .publish_delayed(CALL_REQUESTS, &request, delay)
                .await?;

            info!(
                call_id = %call_id,
                attempt = call.attempts,
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "attempt failed, requeued"
            );
            return Ok(FinalizeDisposition::Requeued);
        }

        let updated = self
            .store
            .update_if_status(
                call_id,
                Some(CallStatus::InProgress),
                CallPatch::new()
                    .status(CallStatus::Failed)
                    .ended_at(completed_at)
                    .last_error(last_error.clone()),
            )
            .await?;
        if updated == 0 {
            return Ok(FinalizeDisposition::AlreadyFinal);
        }

        self.publish_status(call_id, CallStatus::Failed, duration_sec, completed_at)
            .await;
        self.release_lock(&call).await;

        info!(call_id = %call_id, attempts = call.attempts, error = %last_error, "call failed, retries exhausted");
        Ok(FinalizeDisposition::Failed)
    }

    /// Publish a terminal status event. Best effort: the store is already
    /// consistent, so a publish failure is logged rather than propagated.
    async fn publish_status(
        &self,
        call_id: CallId,
        status: CallStatus,
        duration_sec: Option<f64>,
        completed_at: DateTime<Utc>,
    ) {
        let event = StatusEvent {
            call_id,
            status,
            duration_sec,
            completed_at,
        };
        match serde_json::to_value(&event) {
            Ok(payload) => {
                if let Err(e) = self.queue.publish(CALL_STATUS_UPDATES, &payload).await {
                    warn!(call_id = %call_id, error = %e, "status event publish failed");
                }
            }
            Err(e) => warn!(call_id = %call_id, error = %e, "status event serialization failed"),
        }
    }

    /// Release the destination lock, but only if this call still holds
    /// it. After a TTL expiry the key may belong to a later call for the
    /// same destination; a late finalization must not free that lock.
    /// Best effort either way: the TTL reclaims the key if this fails.
    async fn release_lock(&self, call: &callmesh_core::Call) {
        match self.lock.holder(&call.to).await {
            Ok(Some(holder)) if holder == call.id => {
                if let Err(e) = self.lock.release(&call.to).await {
                    warn!(call_id = %call.id, destination = %call.to, error = %e, "lock release failed");
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(call_id = %call.id, destination = %call.to, error = %e, "lock holder check failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use callmesh_core::{Call, Destination};

    use crate::lock::InMemoryLockService;
    use crate::queue::InMemoryQueue;
    use crate::store::InMemoryCallStore;

    struct Fixture {
        store: Arc<InMemoryCallStore>,
        lock: Arc<InMemoryLockService>,
        queue: InMemoryQueue,
        finalizer: Finalizer,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryCallStore::new());
        let lock = Arc::new(InMemoryLockService::new());
        let queue = InMemoryQueue::new();
        let finalizer = Finalizer::new(
            store.clone(),
            lock.clone(),
            Arc::new(queue.clone()),
            RetryPolicy::linear(3, Duration::from_millis(1)),
        );
        Fixture {
            store,
            lock,
            queue,
            finalizer,
        }
    }

    async fn in_progress_call(fx: &Fixture, to: &str, attempts: u32) -> Call {
        let call = fx
            .store
            .create(Call::new(
                Destination::new(to),
                "script-1",
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        fx.store
            .update_if_status(
                call.id,
                Some(CallStatus::Pending),
                CallPatch::new()
                    .status(CallStatus::InProgress)
                    .attempts(attempts)
                    .started_at(Utc::now()),
            )
            .await
            .unwrap();
        fx.lock
            .acquire(&call.to, call.id, Duration::from_secs(60))
            .await
            .unwrap();
        fx.store.find_by_id(call.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn success_records_completed_and_releases_lock() {
        let fx = fixture();
        let call = in_progress_call(&fx, "+15550001111", 1).await;
        let mut events = fx
            .queue
            .subscribe(CALL_STATUS_UPDATES, "g", "c")
            .await
            .unwrap();

        let disposition = fx
            .finalizer
            .finalize(call.id, CallOutcome::Completed, Utc::now(), Some(12.5), None)
            .await
            .unwrap();

        assert_eq!(disposition, FinalizeDisposition::Completed);
        let stored = fx.store.find_by_id(call.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CallStatus::Completed);
        assert!(stored.ended_at.is_some());
        assert_eq!(fx.lock.holder(&call.to).await.unwrap(), None);

        let event = events.recv().await.unwrap();
        assert_eq!(event["status"], "COMPLETED");
        assert_eq!(event["durationSec"], 12.5);
    }

    #[tokio::test]
    async fn failure_with_retries_left_requeues_delayed() {
        let fx = fixture();
        let call = in_progress_call(&fx, "+15550001111", 1).await;
        let mut requests = fx.queue.subscribe(CALL_REQUESTS, "g", "c").await.unwrap();

        let disposition = fx
            .finalizer
            .finalize(call.id, CallOutcome::Busy, Utc::now(), None, None)
            .await
            .unwrap();

        assert_eq!(disposition, FinalizeDisposition::Requeued);
        let stored = fx.store.find_by_id(call.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CallStatus::Pending);
        assert_eq!(stored.last_error.as_deref(), Some("destination busy"));
        assert!(stored.ended_at.is_none());
        assert_eq!(fx.lock.holder(&call.to).await.unwrap(), None);

        let msg = tokio::time::timeout(Duration::from_millis(500), requests.recv())
            .await
            .expect("requeued request")
            .unwrap();
        assert_eq!(msg["id"], call.id.to_string());
        assert_eq!(msg["attempts"], 1);
    }

    #[tokio::test]
    async fn failure_on_last_attempt_records_failed() {
        let fx = fixture();
        let call = in_progress_call(&fx, "+15550001111", 3).await;
        let mut events = fx
            .queue
            .subscribe(CALL_STATUS_UPDATES, "g", "c")
            .await
            .unwrap();

        let disposition = fx
            .finalizer
            .finalize(call.id, CallOutcome::NoAnswer, Utc::now(), None, None)
            .await
            .unwrap();

        assert_eq!(disposition, FinalizeDisposition::Failed);
        let stored = fx.store.find_by_id(call.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CallStatus::Failed);
        assert_eq!(
            stored.last_error.as_deref(),
            Some("destination did not answer")
        );
        assert!(stored.ended_at.is_some());

        let event = events.recv().await.unwrap();
        assert_eq!(event["status"], "FAILED");
    }

    #[tokio::test]
    async fn replayed_finalization_is_a_no_op() {
        let fx = fixture();
        let call = in_progress_call(&fx, "+15550001111", 1).await;
        let at = Utc::now();

        let first = fx
            .finalizer
            .finalize(call.id, CallOutcome::Completed, at, Some(10.0), None)
            .await
            .unwrap();
        assert_eq!(first, FinalizeDisposition::Completed);
        let after_first = fx.store.find_by_id(call.id).await.unwrap().unwrap();

        // Same notification delivered again, and a conflicting one.
        let replay = fx
            .finalizer
            .finalize(call.id, CallOutcome::Completed, at, Some(10.0), None)
            .await
            .unwrap();
        assert_eq!(replay, FinalizeDisposition::AlreadyFinal);

        let conflicting = fx
            .finalizer
            .finalize(call.id, CallOutcome::Failed, Utc::now(), None, None)
            .await
            .unwrap();
        assert_eq!(conflicting, FinalizeDisposition::AlreadyFinal);

        let after = fx.store.find_by_id(call.id).await.unwrap().unwrap();
        assert_eq!(after.status, CallStatus::Completed);
        assert_eq!(after.ended_at, after_first.ended_at);
    }

    #[tokio::test]
    async fn late_finalization_leaves_another_calls_lock_alone() {
        let fx = fixture();
        let call = in_progress_call(&fx, "+15550001111", 1).await;

        // The lock TTL expired and a later call for the same destination
        // took the key.
        fx.lock.release(&call.to).await.unwrap();
        let other = CallId::new();
        fx.lock
            .acquire(&call.to, other, Duration::from_secs(60))
            .await
            .unwrap();

        let disposition = fx
            .finalizer
            .finalize(call.id, CallOutcome::Completed, Utc::now(), None, None)
            .await
            .unwrap();
        assert_eq!(disposition, FinalizeDisposition::Completed);

        // The later call's lock survives the first call's finalization.
        assert_eq!(fx.lock.holder(&call.to).await.unwrap(), Some(other));
    }

    #[tokio::test]
    async fn unknown_call_reports_not_found() {
        let fx = fixture();
        let disposition = fx
            .finalizer
            .finalize(CallId::new(), CallOutcome::Completed, Utc::now(), None, None)
            .await
            .unwrap();
        assert_eq!(disposition, FinalizeDisposition::NotFound);
    }

    #[tokio::test]
    async fn error_detail_overrides_default_description() {
        let fx = fixture();
        let call = in_progress_call(&fx, "+15550001111", 3).await;

        fx.finalizer
            .finalize(
                call.id,
                CallOutcome::Failed,
                Utc::now(),
                None,
                Some("provider request failed: connect timeout".to_string()),
            )
            .await
            .unwrap();

        let stored = fx.store.find_by_id(call.id).await.unwrap().unwrap();
        assert_eq!(
            stored.last_error.as_deref(),
            Some("provider request failed: connect timeout")
        );
    }
}
