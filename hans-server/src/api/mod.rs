//! API Module
//!
//! HTTP layer of the server: the webhook endpoint plus liveness checks.

pub mod health;
pub mod payload;

use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::service::EventDispatcher;

/// Create the main router with all endpoints
pub fn create_router(dispatcher: Arc<EventDispatcher>) -> Router {
    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health_check))
        .route(
            "/payload",
            get(payload::payload_info).post(payload::receive_payload),
        )
        .with_state(dispatcher)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::dispatch::{IGNORED_ACK, MALFORMED_ACK, PING_ACK, PUSH_QUEUED};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use hans_runner::testing::{RecordingNotifications, RecordingStatusService, ScriptedRunner};
    use hans_runner::{Config, Coordinator, PipelineLauncher};
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_app(dir: &std::path::Path, status: Arc<RecordingStatusService>) -> Router {
        let mut config = Config::new("token".to_string(), "rig-1".to_string());
        config.workspace_root = dir.to_path_buf();
        config.lock_path = dir.join(".lockfile");
        config.lock_poll_interval = Duration::from_millis(5);

        let coordinator = Coordinator::new(
            Arc::new(config),
            Arc::new(ScriptedRunner::new()),
            status,
            Arc::new(RecordingNotifications::new()),
        );
        let launcher = PipelineLauncher::new(Arc::new(coordinator));
        create_router(Arc::new(EventDispatcher::new(launcher)))
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn webhook(event: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/payload")
            .header("X-GitHub-Event", event)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_root_and_health() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path(), Arc::new(RecordingStatusService::new()));

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "Hello unknown");

        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(body_text(response).await, "OK");
    }

    #[tokio::test]
    async fn test_get_payload_explains_usage() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path(), Arc::new(RecordingStatusService::new()));

        let request = Request::builder()
            .uri("/payload")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_text(response).await,
            "This URL is intended to be used with POST, not GET"
        );
    }

    #[tokio::test]
    async fn test_ping() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path(), Arc::new(RecordingStatusService::new()));

        let response = app.oneshot(webhook("ping", "{}")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, PING_ACK);
    }

    #[tokio::test]
    async fn test_push_is_acknowledged_before_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let status = Arc::new(RecordingStatusService::new());
        let app = test_app(dir.path(), status.clone());

        let body = r#"{
            "ref": "refs/heads/feature/x",
            "head_commit": { "id": "abc123" },
            "repository": { "full_name": "org/repo", "html_url": "https://example/repo" },
            "pusher": { "name": "jane", "email": null }
        }"#;
        let response = app.oneshot(webhook("push", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, PUSH_QUEUED);

        // The detached run eventually reports pending and success
        for _ in 0..200 {
            if status.reports().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let reports = status.reports();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.sha == "abc123"));
    }

    #[tokio::test]
    async fn test_bad_deliveries_still_get_200() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path(), Arc::new(RecordingStatusService::new()));

        let response = app.clone().oneshot(webhook("push", "{oops")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, MALFORMED_ACK);

        let response = app.oneshot(webhook("issues", "{}")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, IGNORED_ACK);
    }
}
