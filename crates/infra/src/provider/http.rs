//! HTTP provider adapter (accept-then-callback).

use async_trait::async_trait;
use serde::Serialize;
use tracing::instrument;

use callmesh_core::{CallId, Destination, JobRequest};

use super::{ProviderAdapter, ProviderError, ProviderResponse};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DispatchBody<'a> {
    call_id: CallId,
    to: &'a Destination,
    script_id: &'a str,
    callback_url: &'a str,
}

/// Adapter for a provider reached over HTTP.
///
/// The provider accepts the call immediately and POSTs the outcome to
/// `callback_url` once the call ends, so a successful dispatch here
/// leaves the call IN_PROGRESS.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpProvider {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for HttpProvider {
    #[instrument(skip(self, request), fields(call_id = %request.id), err)]
    async fn dispatch(
        &self,
        request: &JobRequest,
        callback_url: &str,
    ) -> Result<ProviderResponse, ProviderError> {
        let body = DispatchBody {
            call_id: request.id,
            to: &request.to,
            script_id: &request.script_id,
            callback_url,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        if response.status().is_success() {
            Ok(ProviderResponse::Accepted)
        } else {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            Err(ProviderError::Rejected(format!("{status}: {detail}")))
        }
    }
}
