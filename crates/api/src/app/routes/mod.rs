use axum::Router;

pub mod callbacks;
pub mod calls;
pub mod metrics;
pub mod system;

/// Router for all versioned API endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/api/v1/calls", calls::router())
        .nest("/api/v1/callbacks", callbacks::router())
        .nest("/api/v1/metrics", metrics::router())
}
