//! Liveness handlers

use axum::{http::StatusCode, response::IntoResponse};

/// GET /
pub async fn root() -> impl IntoResponse {
    (StatusCode::OK, "Hello unknown")
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
