//! Webhook API Handlers
//!
//! The webhook caller always gets a 200 with a plain-text acknowledgment;
//! run results travel through commit statuses and mail only.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;

use crate::service::EventDispatcher;

/// Header carrying the webhook event type
pub const EVENT_HEADER: &str = "X-GitHub-Event";

/// GET /payload
pub async fn payload_info() -> impl IntoResponse {
    (
        StatusCode::OK,
        "This URL is intended to be used with POST, not GET",
    )
}

/// POST /payload
/// Classifies the event and queues a test run when it qualifies
pub async fn receive_payload(
    State(dispatcher): State<Arc<EventDispatcher>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let event = headers
        .get(EVENT_HEADER)
        .and_then(|value| value.to_str().ok());

    let dispatch = dispatcher.dispatch(event, &headers, &body);

    (StatusCode::OK, dispatch.ack)
}
