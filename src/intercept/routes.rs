use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers::{greeting, health_check, not_found};
use super::middleware::{intercept, InterceptorState};

/// Application router with the interceptor in front of every route,
/// the fallback included.
pub fn create_router(state: Arc<InterceptorState>) -> Router {
    Router::new()
        .route("/", get(greeting))
        .route("/health", get(health_check))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state, intercept))
        .layer(TraceLayer::new_for_http())
}
