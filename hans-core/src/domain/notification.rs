//! Notification types

use serde::{Deserialize, Serialize};

/// Result notification sent to the contributor after a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub contributor: String,
    pub contributor_email: String,
    /// Address the message is sent from
    pub sender: String,
    pub detail: String,
    pub success: bool,
    pub branch: String,
    pub repo_full_name: String,
    pub sha: String,
    pub results_link: String,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

impl Notification {
    /// Subject line, e.g. `Success: On-hardware test for main on org/repo (abc123)`
    pub fn subject(&self) -> String {
        let tag = if self.success { "Success" } else { "Fail" };
        format!(
            "{}: On-hardware test for {} on {} ({})",
            tag, self.branch, self.repo_full_name, self.sha
        )
    }
}
