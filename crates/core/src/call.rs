//! The call record and its status machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{CallId, Destination};
use crate::message::JobRequest;

/// Lifecycle status of a call.
///
/// Serialized in SCREAMING_SNAKE_CASE to match the wire format used by
/// job-request messages, status events and the callback webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    /// Created, waiting to be dispatched (or requeued for another attempt).
    Pending,
    /// Dispatched; the destination's lock is held by this call.
    InProgress,
    /// Terminal: the provider completed the call.
    Completed,
    /// Terminal: retries exhausted (or provider reported a hard failure
    /// on the final attempt).
    Failed,
    /// Destination was busy (non-terminal provider outcome).
    Busy,
    /// Destination did not answer (non-terminal provider outcome).
    NoAnswer,
    /// Terminal: stuck in progress past the staleness threshold with no
    /// attempts remaining; set only by the reconciliation sweep.
    Expired,
}

impl CallStatus {
    /// Terminal statuses are write-once: no further transition is permitted.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Completed | CallStatus::Failed | CallStatus::Expired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Pending => "PENDING",
            CallStatus::InProgress => "IN_PROGRESS",
            CallStatus::Completed => "COMPLETED",
            CallStatus::Failed => "FAILED",
            CallStatus::Busy => "BUSY",
            CallStatus::NoAnswer => "NO_ANSWER",
            CallStatus::Expired => "EXPIRED",
        }
    }
}

impl core::str::FromStr for CallStatus {
    type Err = crate::error::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(CallStatus::Pending),
            "IN_PROGRESS" => Ok(CallStatus::InProgress),
            "COMPLETED" => Ok(CallStatus::Completed),
            "FAILED" => Ok(CallStatus::Failed),
            "BUSY" => Ok(CallStatus::Busy),
            "NO_ANSWER" => Ok(CallStatus::NoAnswer),
            "EXPIRED" => Ok(CallStatus::Expired),
            other => Err(crate::error::DomainError::validation(format!(
                "unknown call status: {other}"
            ))),
        }
    }
}

impl core::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A call — the unit of work dispatched to the execution provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    /// Unique id, assigned at creation, immutable.
    pub id: CallId,
    /// Destination identifier; the mutual-exclusion key.
    pub to: Destination,
    /// Opaque reference to execution instructions.
    pub script_id: String,
    /// Open key-value bag; may carry test-only override directives.
    pub metadata: serde_json::Value,
    pub status: CallStatus,
    /// Count of dispatch attempts; incremented each time the worker
    /// picks the call up.
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Call {
    /// Create a new PENDING call.
    pub fn new(to: Destination, script_id: impl Into<String>, metadata: serde_json::Value) -> Self {
        Self {
            id: CallId::new(),
            to,
            script_id: script_id.into(),
            metadata,
            status: CallStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Only PENDING calls may have `script_id`/`metadata` edited.
    pub fn editable(&self) -> bool {
        self.status == CallStatus::Pending
    }

    /// Job-request message for (re)dispatching this call.
    pub fn to_job_request(&self) -> JobRequest {
        JobRequest {
            id: self.id,
            to: self.to.clone(),
            script_id: self.script_id.clone(),
            metadata: self.metadata.clone(),
            attempts: self.attempts,
        }
    }
}
