//! Webhook payload DTOs
//!
//! Covers the `push` and `pull_request` deliveries. Both convert into a
//! [`PipelineRequest`] when the event qualifies for a hardware test.

use serde::Deserialize;

use crate::domain::pipeline::{Contributor, MergeTarget, PipelineRequest};

/// Repository object embedded in most payloads
#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub full_name: String,
    pub html_url: String,
}

/// Account that triggered a delivery
#[derive(Debug, Clone, Deserialize)]
pub struct Sender {
    pub login: String,
}

// =============================================================================
// Push
// =============================================================================

/// `push` event payload
#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub git_ref: String,
    /// Null when the push deleted the branch
    pub head_commit: Option<HeadCommit>,
    pub repository: Repository,
    pub pusher: Pusher,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeadCommit {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pusher {
    pub name: String,
    pub email: Option<String>,
}

impl PushEvent {
    /// Builds a pipeline request, or `None` when there is no head commit
    pub fn into_request(self) -> Option<PipelineRequest> {
        let head_commit = self.head_commit?;
        let branch = branch_from_ref(&self.git_ref).to_string();

        Some(PipelineRequest::new(
            head_commit.id,
            branch,
            self.repository.html_url,
            self.repository.full_name,
            Contributor::new(self.pusher.name, self.pusher.email),
        ))
    }
}

/// Bare branch name from a ref: the last `/`-separated segment
///
/// `refs/heads/feature/x` yields `x`.
pub fn branch_from_ref(git_ref: &str) -> &str {
    git_ref.rsplit('/').next().unwrap_or(git_ref)
}

// =============================================================================
// Pull request
// =============================================================================

/// `pull_request` event payload
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub number: u64,
    pub pull_request: PullRequest,
    pub sender: Sender,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub state: Option<String>,
    pub head: PullRequestRef,
    pub base: PullRequestRef,
}

/// One side (head or base) of a pull request
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestRef {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: String,
    pub repo: Repository,
}

impl PullRequestEvent {
    /// Whether this action should trigger a hardware test
    pub fn is_testable(&self) -> bool {
        matches!(self.action.as_str(), "opened" | "reopened")
    }

    /// Builds a pipeline request for opened/reopened pull requests
    ///
    /// The head branch is tested after merging the base branch into it.
    /// `contributor_email` is used because pull request payloads carry no
    /// address for the sender.
    pub fn into_request(self, contributor_email: Option<String>) -> Option<PipelineRequest> {
        if !self.is_testable() {
            return None;
        }

        let PullRequest { head, base, .. } = self.pull_request;

        Some(
            PipelineRequest::new(
                head.sha,
                head.git_ref,
                head.repo.html_url,
                base.repo.full_name,
                Contributor::new(self.sender.login, contributor_email),
            )
            .with_merge_target(MergeTarget {
                repo_url: base.repo.html_url,
                branch: base.git_ref,
            }),
        )
    }
}
