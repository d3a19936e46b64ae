use std::sync::Arc;

use axum::{
    Json, Router, extract::Extension, http::StatusCode, response::IntoResponse, routing::post,
};

use callmesh_core::{CallOutcome, CallbackPayload};
use callmesh_infra::{FinalizeDisposition, FinalizeError};

use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/call-status", post(call_status))
}

/// Completion webhook for async providers.
///
/// Finalization is idempotent: replays and late duplicates get a 200
/// without mutating anything.
pub async fn call_status(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<serde_json::Value>,
) -> axum::response::Response {
    let payload: CallbackPayload = match serde_json::from_value(body) {
        Ok(p) => p,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string());
        }
    };

    let status = match payload.terminal_status() {
        Ok(status) => status,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_status", e.to_string());
        }
    };
    let outcome = match CallOutcome::from_status(status) {
        Ok(outcome) => outcome,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_status", e.to_string());
        }
    };

    let disposition = match services
        .finalizer
        .finalize(
            payload.call_id,
            outcome,
            payload.completed_at,
            payload.duration_sec,
            None,
        )
        .await
    {
        Ok(d) => d,
        Err(FinalizeError::Store(e)) => return errors::store_error_to_response(e),
        Err(FinalizeError::Requeue(e)) => {
            return errors::json_error(StatusCode::BAD_GATEWAY, "publish_error", e.to_string());
        }
    };

    match disposition {
        FinalizeDisposition::NotFound => {
            errors::json_error(StatusCode::NOT_FOUND, "not_found", "call not found")
        }
        FinalizeDisposition::Completed
        | FinalizeDisposition::Requeued
        | FinalizeDisposition::Failed => (
            StatusCode::OK,
            Json(serde_json::json!({
                "callId": payload.call_id.to_string(),
                "accepted": true,
            })),
        )
            .into_response(),
        FinalizeDisposition::AlreadyFinal => (
            StatusCode::OK,
            Json(serde_json::json!({
                "callId": payload.call_id.to_string(),
                "accepted": true,
                "note": "already finalized",
            })),
        )
            .into_response(),
    }
}
