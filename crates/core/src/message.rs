//! Wire payloads exchanged over the queue and the callback webhook.
//!
//! Field names follow the external camelCase wire format; the broker and
//! provider are shared with non-Rust consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::call::CallStatus;
use crate::error::{DomainError, DomainResult};
use crate::id::{CallId, Destination};

/// Job-request message consumed by the dispatch worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub id: CallId,
    pub to: Destination,
    pub script_id: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub attempts: u32,
}

/// Status event published for downstream consumers after finalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub call_id: CallId,
    pub status: CallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<f64>,
    pub completed_at: DateTime<Utc>,
}

/// Completion notification received from the provider (or the simulated
/// delayed path) on `POST /call-status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    pub call_id: CallId,
    pub status: CallStatus,
    pub completed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<f64>,
}

impl CallbackPayload {
    /// Validate that `status` is a terminal-candidate value.
    ///
    /// Only `COMPLETED`, `FAILED`, `BUSY` and `NO_ANSWER` may arrive via
    /// the callback; anything else is rejected without mutating state.
    pub fn terminal_status(&self) -> DomainResult<CallStatus> {
        match self.status {
            CallStatus::Completed
            | CallStatus::Failed
            | CallStatus::Busy
            | CallStatus::NoAnswer => Ok(self.status),
            other => Err(DomainError::validation(format!(
                "status {other} is not a valid callback status"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_request_uses_camel_case_wire_names() {
        let req = JobRequest {
            id: CallId::new(),
            to: Destination::new("+15550001111"),
            script_id: "script-7".to_string(),
            metadata: serde_json::json!({"k": "v"}),
            attempts: 1,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("scriptId").is_some());
        assert!(json.get("script_id").is_none());
    }

    #[test]
    fn job_request_defaults_missing_fields() {
        let id = CallId::new();
        let raw = format!(r#"{{"id":"{id}","to":"+15550001111","scriptId":"s"}}"#);
        let req: JobRequest = serde_json::from_str(&raw).unwrap();
        assert_eq!(req.attempts, 0);
        assert!(req.metadata.is_null());
    }

    #[test]
    fn callback_accepts_terminal_candidates_only() {
        let mut payload = CallbackPayload {
            call_id: CallId::new(),
            status: CallStatus::Completed,
            completed_at: Utc::now(),
            duration_sec: Some(20.0),
        };
        assert!(payload.terminal_status().is_ok());

        payload.status = CallStatus::NoAnswer;
        assert!(payload.terminal_status().is_ok());

        payload.status = CallStatus::Pending;
        assert!(payload.terminal_status().is_err());

        payload.status = CallStatus::InProgress;
        assert!(payload.terminal_status().is_err());
    }

    #[test]
    fn status_event_omits_absent_duration() {
        let ev = StatusEvent {
            call_id: CallId::new(),
            status: CallStatus::Busy,
            duration_sec: None,
            completed_at: Utc::now(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert!(json.get("durationSec").is_none());
        assert_eq!(json["status"], "BUSY");
    }
}
