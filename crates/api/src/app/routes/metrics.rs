use std::sync::Arc;

use axum::{
    Json, Router, extract::Extension, http::StatusCode, response::IntoResponse, routing::get,
};

use callmesh_infra::CallStore;

use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/", get(status_counts))
}

pub async fn status_counts(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.store.status_counts().await {
        Ok(counts) => (StatusCode::OK, Json(counts)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
