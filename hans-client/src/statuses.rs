//! Commit status endpoint

use crate::StatusClient;
use crate::error::Result;
use hans_core::domain::status::{CommitState, StatusReport};
use serde::{Deserialize, Serialize};

/// Longest description the status API accepts
pub const MAX_DESCRIPTION_LEN: usize = 140;

/// Request body for `POST /repos/{owner}/{repo}/statuses/{sha}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateStatus {
    pub state: CommitState,
    pub target_url: String,
    pub description: String,
    pub context: String,
}

impl CreateStatus {
    /// Builds the request body, truncating the description to the API limit
    pub fn from_report(report: &StatusReport, target_url: &str, context: &str) -> Self {
        Self {
            state: report.state,
            target_url: target_url.to_string(),
            description: truncate(&report.description, MAX_DESCRIPTION_LEN),
            context: context.to_string(),
        }
    }
}

/// Status object returned by the API
#[derive(Debug, Clone, Deserialize)]
pub struct CommitStatus {
    pub id: u64,
    pub state: CommitState,
    pub description: Option<String>,
    pub context: Option<String>,
}

impl StatusClient {
    // =============================================================================
    // Commit Statuses
    // =============================================================================

    /// Set the status of a commit
    ///
    /// # Arguments
    /// * `report` - Repository, commit, state and description
    /// * `target_url` - Link shown next to the status
    /// * `context` - Label distinguishing this CI from others on the same commit
    ///
    /// # Returns
    /// The status object created by the API
    pub async fn create_status(
        &self,
        report: &StatusReport,
        target_url: &str,
        context: &str,
    ) -> Result<CommitStatus> {
        let url = format!(
            "{}/repos/{}/statuses/{}",
            self.api_url, report.repo_full_name, report.sha
        );
        let body = CreateStatus::from_report(report, target_url, context);

        tracing::debug!(
            "Setting commit status on repo: {} sha: {} to: {}",
            report.repo_full_name,
            report.sha,
            report.state
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .json(&body)
            .send()
            .await?;

        self.handle_response(response).await
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
