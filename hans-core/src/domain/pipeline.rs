//! Pipeline request types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Everything needed to run one pipeline for one commit
///
/// Built by the event dispatcher from a single webhook delivery and
/// consumed by exactly one coordinator run. Never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRequest {
    /// Run identifier, used in logs and in the board lock marker
    pub id: Uuid,
    pub sha: String,
    pub branch: String,
    /// Repository web URL; `.git` is appended when cloning
    pub clone_url: String,
    /// `owner/name` of the repository receiving the commit status
    pub repo_full_name: String,
    /// Upstream branch merged on top before building (pull requests only)
    pub merge_target: Option<MergeTarget>,
    pub contributor: Contributor,
}

impl PipelineRequest {
    /// Creates a request with a fresh run id and no merge target
    pub fn new(
        sha: impl Into<String>,
        branch: impl Into<String>,
        clone_url: impl Into<String>,
        repo_full_name: impl Into<String>,
        contributor: Contributor,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sha: sha.into(),
            branch: branch.into(),
            clone_url: clone_url.into(),
            repo_full_name: repo_full_name.into(),
            merge_target: None,
            contributor,
        }
    }

    pub fn with_merge_target(mut self, target: MergeTarget) -> Self {
        self.merge_target = Some(target);
        self
    }

    /// Whether this request came from a pull request
    pub fn is_pull_request(&self) -> bool {
        self.merge_target.is_some()
    }
}

/// Base repository and branch a pull request is merged into
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeTarget {
    pub repo_url: String,
    pub branch: String,
}

/// The person whose change is being tested
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    pub name: String,
    pub email: Option<String>,
}

impl Contributor {
    pub fn new(name: impl Into<String>, email: Option<String>) -> Self {
        Self {
            name: name.into(),
            email,
        }
    }
}
