//! Commit status types

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a commit status as understood by the source-control platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitState {
    Pending,
    Success,
    Failure,
}

impl CommitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitState::Pending => "pending",
            CommitState::Success => "success",
            CommitState::Failure => "failure",
        }
    }

    /// Whether this state ends a run
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CommitState::Pending)
    }
}

impl fmt::Display for CommitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status update for one commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub repo_full_name: String,
    pub sha: String,
    pub state: CommitState,
    pub description: String,
}

impl StatusReport {
    pub fn new(
        repo_full_name: impl Into<String>,
        sha: impl Into<String>,
        state: CommitState,
        description: impl Into<String>,
    ) -> Self {
        Self {
            repo_full_name: repo_full_name.into(),
            sha: sha.into(),
            state,
            description: description.into(),
        }
    }
}
