use axum::{http::StatusCode, response::Html, response::IntoResponse, Json};
use serde::Serialize;

/// Landing page
pub async fn greeting() -> Html<&'static str> {
    Html("<h1>hihi</h1>")
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    #[derive(Serialize)]
    struct HealthResponse {
        status: String,
    }

    Json(HealthResponse {
        status: "OK".to_string(),
    })
}

/// Anything without a route
pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not found")
}
