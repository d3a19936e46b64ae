//! Simulated provider with scripted and random outcomes.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use callmesh_core::{CallOutcome, JobRequest, OutcomeScript};

use super::{ProviderAdapter, ProviderError, ProviderResponse};

/// In-process provider that resolves every attempt synchronously.
///
/// Scripted destinations and metadata overrides get a deterministic
/// outcome; anything else gets a uniformly random one. The simulated
/// call itself is a short sleep.
#[derive(Debug, Clone)]
pub struct SimulatedProvider {
    script: OutcomeScript,
    call_duration: Duration,
}

impl SimulatedProvider {
    pub fn new(script: OutcomeScript) -> Self {
        Self {
            script,
            call_duration: Duration::from_millis(50),
        }
    }

    pub fn with_call_duration(mut self, duration: Duration) -> Self {
        self.call_duration = duration;
        self
    }

    fn random_outcome() -> CallOutcome {
        let outcomes = [
            CallOutcome::Completed,
            CallOutcome::Failed,
            CallOutcome::Busy,
            CallOutcome::NoAnswer,
        ];
        outcomes[rand::thread_rng().gen_range(0..outcomes.len())]
    }
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new(OutcomeScript::default())
    }
}

#[async_trait]
impl ProviderAdapter for SimulatedProvider {
    async fn dispatch(
        &self,
        request: &JobRequest,
        _callback_url: &str,
    ) -> Result<ProviderResponse, ProviderError> {
        tokio::time::sleep(self.call_duration).await;

        let outcome = self
            .script
            .outcome_for(&request.to, &request.metadata, request.attempts)
            .unwrap_or_else(Self::random_outcome);

        debug!(call_id = %request.id, attempt = request.attempts, ?outcome, "simulated call resolved");
        Ok(ProviderResponse::Outcome(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callmesh_core::{CallId, Destination};

    fn request(to: &str, attempts: u32) -> JobRequest {
        JobRequest {
            id: CallId::new(),
            to: Destination::new(to),
            script_id: "s".to_string(),
            metadata: serde_json::json!({}),
            attempts,
        }
    }

    #[tokio::test]
    async fn scripted_destination_resolves_deterministically() {
        let provider =
            SimulatedProvider::new(OutcomeScript::new(3)).with_call_duration(Duration::ZERO);

        let first = provider
            .dispatch(&request("+1-555-fail-then-succeed", 1), "http://cb")
            .await
            .unwrap();
        assert_eq!(first, ProviderResponse::Outcome(CallOutcome::Failed));

        let third = provider
            .dispatch(&request("+1-555-fail-then-succeed", 3), "http://cb")
            .await
            .unwrap();
        assert_eq!(third, ProviderResponse::Outcome(CallOutcome::Completed));
    }

    #[tokio::test]
    async fn metadata_override_forces_success() {
        let provider = SimulatedProvider::default().with_call_duration(Duration::ZERO);
        let mut req = request("+15550001111", 1);
        req.metadata = serde_json::json!({"override": "FORCE_SUCCESS"});

        let resp = provider.dispatch(&req, "http://cb").await.unwrap();
        assert_eq!(resp, ProviderResponse::Outcome(CallOutcome::Completed));
    }

    #[tokio::test]
    async fn unscripted_destination_resolves_to_some_outcome() {
        let provider = SimulatedProvider::default().with_call_duration(Duration::ZERO);

        let resp = provider
            .dispatch(&request("+15550001111", 1), "http://cb")
            .await
            .unwrap();
        assert!(matches!(resp, ProviderResponse::Outcome(_)));
    }
}
