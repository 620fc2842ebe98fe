//! Service layer
//!
//! Outbound side effects of a pipeline run: commit statuses and result
//! notifications. Both are trait-based so the coordinator can be tested
//! with recording doubles, and both are best-effort; the coordinator logs
//! their failures and carries on.

mod notification;
mod status;

// Re-export traits
pub use notification::NotificationService;
pub use status::StatusService;

// Re-export implementations
pub use notification::{DisabledNotifications, SendmailNotificationService, compose_message};
pub use status::GitHubStatusService;
