//! Event dispatcher
//!
//! Classifies webhook deliveries, derives pipeline requests from the ones
//! that qualify and hands them to the launcher. Nothing here waits for a
//! run to finish.

use axum::http::HeaderMap;
use hans_core::domain::pipeline::PipelineRequest;
use hans_core::dto::webhook::{PullRequestEvent, PushEvent};
use hans_runner::{PipelineLauncher, PipelineOutcome};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub const PULL_REQUEST_QUEUED: &str = "Pull request event queued for testing.";
pub const PUSH_QUEUED: &str = "Push event queued for testing.";
pub const PING_ACK: &str = "Hello";
pub const IGNORED_ACK: &str = "Event ignored.";
pub const UNHANDLED_ACK: &str = "Unhandled event.";
pub const MALFORMED_ACK: &str = "Malformed payload.";

/// Webhook event types the dispatcher tells apart
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Ping,
    PullRequest,
    Push,
    /// Known event that never triggers a run
    Ignored(&'static str),
    /// Missing header or an event type nobody asked for
    Unknown(Option<String>),
}

impl EventKind {
    pub fn classify(event: Option<&str>) -> Self {
        match event {
            Some("ping") => EventKind::Ping,
            Some("pull_request") => EventKind::PullRequest,
            Some("push") => EventKind::Push,
            Some("status") => EventKind::Ignored("status"),
            Some("fork") => EventKind::Ignored("fork"),
            Some("delete") => EventKind::Ignored("delete"),
            Some("issue_comment") => EventKind::Ignored("issue_comment"),
            Some("issues") => EventKind::Ignored("issues"),
            Some("pull_request_review_comment") => {
                EventKind::Ignored("pull_request_review_comment")
            }
            other => EventKind::Unknown(other.map(str::to_string)),
        }
    }
}

/// Result of dispatching one delivery
#[derive(Debug)]
pub struct Dispatch {
    /// Body of the HTTP response
    pub ack: &'static str,
    /// Handle of the launched run, if any
    pub run: Option<JoinHandle<PipelineOutcome>>,
}

impl Dispatch {
    fn ack(ack: &'static str) -> Self {
        Self { ack, run: None }
    }
}

pub struct EventDispatcher {
    launcher: PipelineLauncher,
    pull_request_recipient: Option<String>,
}

impl EventDispatcher {
    pub fn new(launcher: PipelineLauncher) -> Self {
        let pull_request_recipient = launcher
            .config()
            .mail
            .as_ref()
            .and_then(|mail| mail.pull_request_recipient.clone());

        Self {
            launcher,
            pull_request_recipient,
        }
    }

    /// Handles one webhook delivery
    pub fn dispatch(&self, event: Option<&str>, headers: &HeaderMap, body: &[u8]) -> Dispatch {
        let payload: serde_json::Value = match serde_json::from_slice(body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    "Malformed JSON in {} delivery: {}",
                    event.unwrap_or("untyped"),
                    e
                );
                return Dispatch::ack(MALFORMED_ACK);
            }
        };

        match EventKind::classify(event) {
            EventKind::Ping => {
                info!("Received ping");
                Dispatch::ack(PING_ACK)
            }
            EventKind::PullRequest => self.pull_request(payload),
            EventKind::Push => self.push(payload),
            EventKind::Ignored(kind) => {
                info!("Ignoring {} event", kind);
                Dispatch::ack(IGNORED_ACK)
            }
            EventKind::Unknown(kind) => {
                let pretty = serde_json::to_string_pretty(&payload).unwrap_or_default();
                warn!("Unhandled request, headers: {:?}", headers);
                warn!("Payload: {}", pretty);
                warn!("Unknown event: {}", kind.as_deref().unwrap_or("<none>"));
                Dispatch::ack(UNHANDLED_ACK)
            }
        }
    }

    fn pull_request(&self, payload: serde_json::Value) -> Dispatch {
        let Some(event) = parse::<PullRequestEvent>("pull_request", payload) else {
            return Dispatch::ack(MALFORMED_ACK);
        };

        let number = event.number;
        let action = event.action.clone();
        match event.into_request(self.pull_request_recipient.clone()) {
            Some(request) => {
                info!(
                    "Adding to queue: pull request #{} {} from {}",
                    number, request.branch, request.clone_url
                );
                self.launch(request, PULL_REQUEST_QUEUED)
            }
            None => {
                info!("Ignoring {} of pull request #{}", action, number);
                Dispatch::ack(IGNORED_ACK)
            }
        }
    }

    fn push(&self, payload: serde_json::Value) -> Dispatch {
        let Some(event) = parse::<PushEvent>("push", payload) else {
            return Dispatch::ack(MALFORMED_ACK);
        };

        match event.into_request() {
            Some(request) => {
                info!(
                    "Adding to queue: branch {} from {}",
                    request.branch, request.clone_url
                );
                self.launch(request, PUSH_QUEUED)
            }
            None => {
                info!("Ignoring push without head commit");
                Dispatch::ack(IGNORED_ACK)
            }
        }
    }

    fn launch(&self, request: PipelineRequest, ack: &'static str) -> Dispatch {
        Dispatch {
            ack,
            run: Some(self.launcher.launch(request)),
        }
    }
}

fn parse<T: DeserializeOwned>(kind: &str, payload: serde_json::Value) -> Option<T> {
    match serde_json::from_value(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("Malformed {} payload: {}", kind, e);
            None
        }
    }
}
