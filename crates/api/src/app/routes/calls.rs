use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    routing::post,
};

use callmesh_core::{Call, CallId, CallStatus, Destination};
use callmesh_infra::{CallPatch, CallStore, JobQueue, queue::CALL_REQUESTS};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_call).get(list_calls))
        .route("/:id", get(get_call).patch(update_call))
}

pub async fn create_call(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<serde_json::Value>,
) -> axum::response::Response {
    // Manual parse so missing fields map to 400, not a framework 422.
    let body: dto::CreateCallRequest = match serde_json::from_value(body) {
        Ok(b) => b,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string());
        }
    };
    if body.to.trim().is_empty() || body.script_id.trim().is_empty() {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "to and scriptId are required",
        );
    }

    let call = Call::new(
        Destination::new(body.to),
        body.script_id,
        body.metadata.unwrap_or_else(|| serde_json::json!({})),
    );

    let call = match services.store.create(call).await {
        Ok(call) => call,
        Err(e) => return errors::store_error_to_response(e),
    };

    let request = match serde_json::to_value(call.to_job_request()) {
        Ok(v) => v,
        Err(e) => {
            return errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "serialization_error", e.to_string());
        }
    };
    if let Err(e) = services.queue.publish(CALL_REQUESTS, &request).await {
        // Record exists but was never offered for dispatch; surface it.
        tracing::error!(call_id = %call.id, error = %e, "job request publish failed");
        return errors::json_error(StatusCode::BAD_GATEWAY, "publish_error", e.to_string());
    }

    (StatusCode::CREATED, Json(dto::call_to_json(call))).into_response()
}

pub async fn get_call(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: CallId = match id.parse() {
        Ok(id) => id,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid call id"),
    };

    match services.store.find_by_id(id).await {
        Ok(Some(call)) => (StatusCode::OK, Json(dto::call_to_json(call))).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "call not found"),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn update_call(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateCallRequest>,
) -> axum::response::Response {
    let id: CallId = match id.parse() {
        Ok(id) => id,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid call id"),
    };

    let call = match services.store.find_by_id(id).await {
        Ok(Some(call)) => call,
        Ok(None) => return errors::json_error(StatusCode::NOT_FOUND, "not_found", "call not found"),
        Err(e) => return errors::store_error_to_response(e),
    };
    if !call.editable() {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "not_editable",
            format!("call is {} and can no longer be edited", call.status),
        );
    }

    let mut patch = CallPatch::new();
    if let Some(script_id) = body.script_id {
        patch = patch.script_id(script_id);
    }
    if let Some(metadata) = body.metadata {
        patch = patch.metadata(metadata);
    }
    if patch.is_empty() {
        return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "nothing to update");
    }

    // PENDING guard: an edit racing the dispatch worker loses.
    match services
        .store
        .update_if_status(id, Some(CallStatus::Pending), patch)
        .await
    {
        Ok(0) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "not_editable",
                "call left PENDING before the edit applied",
            );
        }
        Ok(_) => {}
        Err(e) => return errors::store_error_to_response(e),
    }

    match services.store.find_by_id(id).await {
        Ok(Some(call)) => (StatusCode::OK, Json(dto::call_to_json(call))).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "call not found"),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn list_calls(
    Extension(services): Extension<Arc<AppServices>>,
    Query(params): Query<dto::ListCallsParams>,
) -> axum::response::Response {
    let status = match params.status.as_deref() {
        Some(raw) => match raw.parse::<CallStatus>() {
            Ok(status) => Some(status),
            Err(_) => {
                return errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_status",
                    format!("unknown status: {raw}"),
                );
            }
        },
        None => None,
    };
    let limit = params.limit.unwrap_or(100);

    match services.store.list(status, limit).await {
        Ok(calls) => {
            let items = calls.into_iter().map(dto::call_to_json).collect::<Vec<_>>();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}
