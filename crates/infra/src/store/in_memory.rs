//! In-memory call store for tests/dev.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use callmesh_core::{Call, CallId, CallStatus};

use super::{CallPatch, CallStore, CallStoreError, StatusCounts};

/// In-memory call store backed by a `RwLock<HashMap>`.
///
/// Enforces the same semantics as the Postgres implementation: conditional
/// updates are atomic under the write lock, and terminal records never
/// change status.
#[derive(Debug, Default)]
pub struct InMemoryCallStore {
    calls: RwLock<HashMap<CallId, Call>>,
}

impl InMemoryCallStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_patch(call: &mut Call, patch: CallPatch) {
    if let Some(status) = patch.status {
        call.status = status;
    }
    if patch.increment_attempts {
        call.attempts += 1;
    } else if let Some(attempts) = patch.attempts {
        call.attempts = attempts;
    }
    if let Some(error) = patch.last_error {
        call.last_error = Some(error);
    }
    if let Some(at) = patch.started_at {
        call.started_at = Some(at);
    }
    if let Some(at) = patch.ended_at {
        call.ended_at = Some(at);
    }
    if let Some(script_id) = patch.script_id {
        call.script_id = script_id;
    }
    if let Some(metadata) = patch.metadata {
        call.metadata = metadata;
    }
}

#[async_trait]
impl CallStore for InMemoryCallStore {
    async fn create(&self, call: Call) -> Result<Call, CallStoreError> {
        let mut calls = self.calls.write().unwrap();
        if calls.contains_key(&call.id) {
            return Err(CallStoreError::AlreadyExists(call.id));
        }
        calls.insert(call.id, call.clone());
        Ok(call)
    }

    async fn find_by_id(&self, id: CallId) -> Result<Option<Call>, CallStoreError> {
        let calls = self.calls.read().unwrap();
        Ok(calls.get(&id).cloned())
    }

    async fn update_if_status(
        &self,
        id: CallId,
        expected: Option<CallStatus>,
        patch: CallPatch,
    ) -> Result<u64, CallStoreError> {
        if patch.is_empty() {
            return Ok(0);
        }

        let mut calls = self.calls.write().unwrap();
        let Some(call) = calls.get_mut(&id) else {
            return Ok(0);
        };

        if let Some(expected) = expected {
            if call.status != expected {
                return Ok(0);
            }
        }

        // Terminal records are write-once regardless of the guard.
        if call.status.is_terminal() && patch.status.is_some_and(|s| s != call.status) {
            return Ok(0);
        }

        apply_patch(call, patch);
        Ok(1)
    }

    async fn count_by_status(&self, status: CallStatus) -> Result<u64, CallStoreError> {
        let calls = self.calls.read().unwrap();
        Ok(calls.values().filter(|c| c.status == status).count() as u64)
    }

    async fn list(
        &self,
        status: Option<CallStatus>,
        limit: usize,
    ) -> Result<Vec<Call>, CallStoreError> {
        let calls = self.calls.read().unwrap();
        let mut result: Vec<_> = calls
            .values()
            .filter(|c| status.is_none_or(|s| c.status == s))
            .cloned()
            .collect();

        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        result.truncate(limit);
        Ok(result)
    }

    async fn find_stale_in_progress(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Call>, CallStoreError> {
        let calls = self.calls.read().unwrap();
        Ok(calls
            .values()
            .filter(|c| {
                c.status == CallStatus::InProgress
                    && c.started_at.is_some_and(|at| at < older_than)
            })
            .cloned()
            .collect())
    }

    async fn status_counts(&self) -> Result<StatusCounts, CallStoreError> {
        let calls = self.calls.read().unwrap();
        let mut counts = StatusCounts::default();
        for call in calls.values() {
            counts.record(call.status, 1);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callmesh_core::Destination;

    fn call(to: &str) -> Call {
        Call::new(Destination::new(to), "script-1", serde_json::json!({}))
    }

    #[tokio::test]
    async fn create_and_find() {
        let store = InMemoryCallStore::new();
        let created = store.create(call("+15550001111")).await.unwrap();

        let found = store.find_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.status, CallStatus::Pending);

        assert!(matches!(
            store.create(created).await,
            Err(CallStoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn conditional_update_respects_guard() {
        let store = InMemoryCallStore::new();
        let created = store.create(call("+15550001111")).await.unwrap();

        // Guard mismatch: record is PENDING, expect IN_PROGRESS.
        let affected = store
            .update_if_status(
                created.id,
                Some(CallStatus::InProgress),
                CallPatch::new().status(CallStatus::Completed),
            )
            .await
            .unwrap();
        assert_eq!(affected, 0);

        // Guard match.
        let affected = store
            .update_if_status(
                created.id,
                Some(CallStatus::Pending),
                CallPatch::new()
                    .status(CallStatus::InProgress)
                    .attempts(1)
                    .started_at(Utc::now()),
            )
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let found = store.find_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(found.status, CallStatus::InProgress);
        assert_eq!(found.attempts, 1);
        assert!(found.started_at.is_some());
    }

    #[tokio::test]
    async fn terminal_records_are_write_once() {
        let store = InMemoryCallStore::new();
        let created = store.create(call("+15550001111")).await.unwrap();

        store
            .update_if_status(
                created.id,
                None,
                CallPatch::new()
                    .status(CallStatus::Completed)
                    .ended_at(Utc::now()),
            )
            .await
            .unwrap();

        // Even an unconditional patch cannot move it out of COMPLETED.
        let affected = store
            .update_if_status(
                created.id,
                None,
                CallPatch::new().status(CallStatus::Pending),
            )
            .await
            .unwrap();
        assert_eq!(affected, 0);
    }

    #[tokio::test]
    async fn increment_bumps_attempts_in_store() {
        let store = InMemoryCallStore::new();
        let created = store.create(call("+15550001111")).await.unwrap();

        for expected in 1..=3u32 {
            let affected = store
                .update_if_status(created.id, None, CallPatch::new().increment_attempts())
                .await
                .unwrap();
            assert_eq!(affected, 1);
            let found = store.find_by_id(created.id).await.unwrap().unwrap();
            assert_eq!(found.attempts, expected);
        }
    }

    #[tokio::test]
    async fn update_of_unknown_id_affects_nothing() {
        let store = InMemoryCallStore::new();
        let affected = store
            .update_if_status(
                CallId::new(),
                None,
                CallPatch::new().status(CallStatus::Failed),
            )
            .await
            .unwrap();
        assert_eq!(affected, 0);
    }

    #[tokio::test]
    async fn count_and_counts_by_status() {
        let store = InMemoryCallStore::new();
        for i in 0..3 {
            store.create(call(&format!("+1555000{i}"))).await.unwrap();
        }
        let c = store.create(call("+15550009999")).await.unwrap();
        store
            .update_if_status(
                c.id,
                Some(CallStatus::Pending),
                CallPatch::new().status(CallStatus::InProgress),
            )
            .await
            .unwrap();

        assert_eq!(store.count_by_status(CallStatus::Pending).await.unwrap(), 3);
        assert_eq!(
            store.count_by_status(CallStatus::InProgress).await.unwrap(),
            1
        );

        let counts = store.status_counts().await.unwrap();
        assert_eq!(counts.pending, 3);
        assert_eq!(counts.in_progress, 1);
        assert_eq!(counts.completed, 0);
    }

    #[tokio::test]
    async fn list_is_newest_first_and_limited() {
        let store = InMemoryCallStore::new();
        let mut last = None;
        for i in 0..5 {
            let mut c = call(&format!("+1555000{i}"));
            c.created_at = Utc::now() + chrono::Duration::milliseconds(i);
            last = Some(store.create(c).await.unwrap().id);
        }

        let listed = store.list(None, 3).await.unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].id, last.unwrap());
    }

    #[tokio::test]
    async fn stale_in_progress_lookup() {
        let store = InMemoryCallStore::new();
        let c = store.create(call("+15550001111")).await.unwrap();
        let long_ago = Utc::now() - chrono::Duration::hours(1);
        store
            .update_if_status(
                c.id,
                Some(CallStatus::Pending),
                CallPatch::new()
                    .status(CallStatus::InProgress)
                    .started_at(long_ago),
            )
            .await
            .unwrap();

        let fresh = store.create(call("+15550002222")).await.unwrap();
        store
            .update_if_status(
                fresh.id,
                Some(CallStatus::Pending),
                CallPatch::new()
                    .status(CallStatus::InProgress)
                    .started_at(Utc::now()),
            )
            .await
            .unwrap();

        let cutoff = Utc::now() - chrono::Duration::minutes(10);
        let stale = store.find_stale_in_progress(cutoff).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, c.id);
    }
}
