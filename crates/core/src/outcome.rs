//! Provider outcomes and deterministic test-only outcome scripting.

use serde::{Deserialize, Serialize};

use crate::call::CallStatus;
use crate::error::{DomainError, DomainResult};
use crate::id::Destination;

/// Outcome of a single dispatch attempt, as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallOutcome {
    Completed,
    Failed,
    Busy,
    NoAnswer,
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Completed)
    }

    /// Failure description recorded in `last_error` for non-success outcomes.
    pub fn error_description(&self) -> &'static str {
        match self {
            CallOutcome::Completed => "completed",
            CallOutcome::Failed => "provider reported failure",
            CallOutcome::Busy => "destination busy",
            CallOutcome::NoAnswer => "destination did not answer",
        }
    }

    /// Map a callback status to an outcome.
    ///
    /// Rejects statuses that are not terminal candidates (the webhook
    /// validates these before mutating anything).
    pub fn from_status(status: CallStatus) -> DomainResult<Self> {
        match status {
            CallStatus::Completed => Ok(CallOutcome::Completed),
            CallStatus::Failed => Ok(CallOutcome::Failed),
            CallStatus::Busy => Ok(CallOutcome::Busy),
            CallStatus::NoAnswer => Ok(CallOutcome::NoAnswer),
            other => Err(DomainError::validation(format!(
                "status {other} does not map to a call outcome"
            ))),
        }
    }
}

/// Metadata key carrying a test-only override directive.
const OVERRIDE_KEY: &str = "override";

/// Deterministic outcome selection for test destinations.
///
/// A pure function of `(destination, metadata, attempt)`: the same inputs
/// always yield the same outcome, so the script is safe under any number
/// of concurrent worker instances. No shared mutable sequence state.
#[derive(Debug, Clone)]
pub struct OutcomeScript {
    /// Destinations containing this pattern fail on every attempt but the
    /// last permitted one.
    pub fail_then_succeed_pattern: String,
    /// Destinations containing this pattern fail on every attempt.
    pub perm_fail_pattern: String,
    /// Retry budget; the fail-then-succeed script succeeds on this attempt.
    pub max_attempts: u32,
}

impl Default for OutcomeScript {
    fn default() -> Self {
        Self {
            fail_then_succeed_pattern: "fail-then-succeed".to_string(),
            perm_fail_pattern: "perm-fail".to_string(),
            max_attempts: 3,
        }
    }
}

impl OutcomeScript {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Scripted outcome for the given attempt (1-indexed), or `None` when
    /// no override applies and the caller should choose an outcome itself.
    pub fn outcome_for(
        &self,
        to: &Destination,
        metadata: &serde_json::Value,
        attempt: u32,
    ) -> Option<CallOutcome> {
        if let Some(directive) = metadata.get(OVERRIDE_KEY).and_then(|v| v.as_str()) {
            match directive {
                "FORCE_SUCCESS" => return Some(CallOutcome::Completed),
                "FAIL_THEN_SUCCESS" => return Some(self.fail_then_succeed(attempt)),
                "PERM_FAIL" => return Some(CallOutcome::Failed),
                other => {
                    tracing::warn!(directive = other, "unknown override directive ignored");
                }
            }
        }

        if to.matches_pattern(&self.fail_then_succeed_pattern) {
            return Some(self.fail_then_succeed(attempt));
        }
        if to.matches_pattern(&self.perm_fail_pattern) {
            return Some(CallOutcome::Failed);
        }

        None
    }

    fn fail_then_succeed(&self, attempt: u32) -> CallOutcome {
        if attempt >= self.max_attempts {
            CallOutcome::Completed
        } else {
            CallOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script() -> OutcomeScript {
        OutcomeScript::new(3)
    }

    #[test]
    fn fail_then_succeed_sequence_by_destination() {
        let to = Destination::new("+1-555-fail-then-succeed");
        let meta = serde_json::json!({});

        assert_eq!(
            script().outcome_for(&to, &meta, 1),
            Some(CallOutcome::Failed)
        );
        assert_eq!(
            script().outcome_for(&to, &meta, 2),
            Some(CallOutcome::Failed)
        );
        assert_eq!(
            script().outcome_for(&to, &meta, 3),
            Some(CallOutcome::Completed)
        );
    }

    #[test]
    fn perm_fail_never_succeeds() {
        let to = Destination::new("+1-555-perm-fail");
        let meta = serde_json::json!({});

        for attempt in 1..=5 {
            assert_eq!(
                script().outcome_for(&to, &meta, attempt),
                Some(CallOutcome::Failed)
            );
        }
    }

    #[test]
    fn metadata_override_takes_precedence_over_destination() {
        let to = Destination::new("+1-555-perm-fail");
        let meta = serde_json::json!({"override": "FORCE_SUCCESS"});

        assert_eq!(
            script().outcome_for(&to, &meta, 1),
            Some(CallOutcome::Completed)
        );
    }

    #[test]
    fn fail_then_success_override_on_plain_destination() {
        let to = Destination::new("+15550001111");
        let meta = serde_json::json!({"override": "FAIL_THEN_SUCCESS"});

        assert_eq!(
            script().outcome_for(&to, &meta, 1),
            Some(CallOutcome::Failed)
        );
        assert_eq!(
            script().outcome_for(&to, &meta, 3),
            Some(CallOutcome::Completed)
        );
    }

    #[test]
    fn plain_destination_is_unscripted() {
        let to = Destination::new("+15550001111");
        let meta = serde_json::json!({});

        assert_eq!(script().outcome_for(&to, &meta, 1), None);
    }

    #[test]
    fn same_inputs_same_outcome() {
        // Determinism: no hidden per-call state between invocations.
        let to = Destination::new("+1-555-fail-then-succeed");
        let meta = serde_json::json!({});
        let a = script().outcome_for(&to, &meta, 2);
        let b = script().outcome_for(&to, &meta, 2);
        assert_eq!(a, b);
    }

    #[test]
    fn outcome_maps_from_callback_statuses_only() {
        assert_eq!(
            CallOutcome::from_status(CallStatus::Busy).unwrap(),
            CallOutcome::Busy
        );
        assert!(CallOutcome::from_status(CallStatus::Expired).is_err());
        assert!(CallOutcome::from_status(CallStatus::Pending).is_err());
    }
}
