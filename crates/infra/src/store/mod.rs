//! Call storage: the single source of truth for call state.
//!
//! Every status transition goes through [`CallStore::update_if_status`],
//! a conditional write that only applies when the record is in the
//! expected status. The destination lock prevents concurrent dispatch;
//! the conditional update is the authority (defense in depth).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use callmesh_core::{Call, CallId, CallStatus};

mod in_memory;
mod postgres;

pub use in_memory::InMemoryCallStore;
pub use postgres::PostgresCallStore;

/// Call store error.
#[derive(Debug, thiserror::Error)]
pub enum CallStoreError {
    #[error("call not found: {0}")]
    NotFound(CallId),
    #[error("call already exists: {0}")]
    AlreadyExists(CallId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Partial update applied by a conditional write.
///
/// Absent fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct CallPatch {
    pub status: Option<CallStatus>,
    pub attempts: Option<u32>,
    /// Bump `attempts` by one inside the conditional write. The store is
    /// the authority for the counter, so a redelivered message carrying a
    /// stale count cannot rewind it. Wins over `attempts` when both are
    /// set.
    pub increment_attempts: bool,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub script_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl CallPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: CallStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn increment_attempts(mut self) -> Self {
        self.increment_attempts = true;
        self
    }

    pub fn last_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }

    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn ended_at(mut self, at: DateTime<Utc>) -> Self {
        self.ended_at = Some(at);
        self
    }

    pub fn script_id(mut self, script_id: impl Into<String>) -> Self {
        self.script_id = Some(script_id.into());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.attempts.is_none()
            && !self.increment_attempts
            && self.last_error.is_none()
            && self.started_at.is_none()
            && self.ended_at.is_none()
            && self.script_id.is_none()
            && self.metadata.is_none()
    }
}

/// Per-status record counts (metrics endpoint).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    #[serde(rename = "PENDING")]
    pub pending: u64,
    #[serde(rename = "IN_PROGRESS")]
    pub in_progress: u64,
    #[serde(rename = "COMPLETED")]
    pub completed: u64,
    #[serde(rename = "FAILED")]
    pub failed: u64,
    #[serde(rename = "BUSY")]
    pub busy: u64,
    #[serde(rename = "NO_ANSWER")]
    pub no_answer: u64,
    #[serde(rename = "EXPIRED")]
    pub expired: u64,
}

impl StatusCounts {
    pub fn record(&mut self, status: CallStatus, count: u64) {
        match status {
            CallStatus::Pending => self.pending += count,
            CallStatus::InProgress => self.in_progress += count,
            CallStatus::Completed => self.completed += count,
            CallStatus::Failed => self.failed += count,
            CallStatus::Busy => self.busy += count,
            CallStatus::NoAnswer => self.no_answer += count,
            CallStatus::Expired => self.expired += count,
        }
    }
}

/// Durable call records with conditional status transitions.
#[async_trait]
pub trait CallStore: Send + Sync {
    /// Persist a new call record.
    async fn create(&self, call: Call) -> Result<Call, CallStoreError>;

    /// Fetch a call by id.
    async fn find_by_id(&self, id: CallId) -> Result<Option<Call>, CallStoreError>;

    /// Conditionally apply `patch` to the call.
    ///
    /// When `expected` is `Some`, the patch only applies if the record is
    /// currently in that status. Returns the number of affected records
    /// (0 or 1); 0 means the guard did not match and nothing changed.
    async fn update_if_status(
        &self,
        id: CallId,
        expected: Option<CallStatus>,
        patch: CallPatch,
    ) -> Result<u64, CallStoreError>;

    /// Count calls currently in `status` (admission check input).
    async fn count_by_status(&self, status: CallStatus) -> Result<u64, CallStoreError>;

    /// List calls, newest first, optionally filtered by status.
    async fn list(
        &self,
        status: Option<CallStatus>,
        limit: usize,
    ) -> Result<Vec<Call>, CallStoreError>;

    /// IN_PROGRESS calls whose `started_at` is older than the cutoff
    /// (reconciliation sweep input).
    async fn find_stale_in_progress(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Call>, CallStoreError>;

    /// Record counts per status.
    async fn status_counts(&self) -> Result<StatusCounts, CallStoreError>;
}
