//! Outbound call provider adapters.
//!
//! The worker hands a job request to a provider and gets back either a
//! synchronous outcome (the simulated path, used in tests and dev) or an
//! acceptance (a real provider that reports completion later via the
//! callback webhook).

use async_trait::async_trait;

use callmesh_core::{CallOutcome, JobRequest};

mod http;
mod simulated;

pub use http::HttpProvider;
pub use simulated::SimulatedProvider;

/// Provider error. A dispatch error counts as a failed attempt and goes
/// through the normal retry path.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider rejected call: {0}")]
    Rejected(String),
}

/// What the provider did with a dispatch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderResponse {
    /// The attempt ran to completion synchronously.
    Outcome(CallOutcome),
    /// The provider accepted the call and will report the outcome via the
    /// callback webhook. The call stays IN_PROGRESS until then.
    Accepted,
}

/// Places a call with the telephony provider.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Dispatch one attempt. `request.attempts` is the attempt number
    /// being executed (1-indexed). `callback_url` is where an async
    /// provider should POST the completion notification.
    async fn dispatch(
        &self,
        request: &JobRequest,
        callback_url: &str,
    ) -> Result<ProviderResponse, ProviderError>;
}
