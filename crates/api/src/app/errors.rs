use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use callmesh_infra::CallStoreError;

pub fn store_error_to_response(err: CallStoreError) -> axum::response::Response {
    match err {
        CallStoreError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("call {id} not found"))
        }
        CallStoreError::AlreadyExists(id) => json_error(
            StatusCode::CONFLICT,
            "conflict",
            format!("call {id} already exists"),
        ),
        CallStoreError::Storage(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
