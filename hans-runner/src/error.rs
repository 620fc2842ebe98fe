//! Runner error types

use thiserror::Error;

use crate::command::CommandError;
use crate::workspace::WorkspaceError;

/// Failure of one pipeline stage
///
/// Every variant aborts the run. The coordinator turns it into a single
/// `failure` commit status carrying [`StageError::status_description`].
#[derive(Debug, Error)]
pub enum StageError {
    /// Command ran and exited non-zero
    #[error("{description} (`{command}` exited with {code:?})")]
    CommandFailed {
        description: String,
        command: String,
        code: Option<i32>,
    },

    /// Command could not be started or waited on
    #[error("{description}: {source}")]
    CommandUnavailable {
        description: String,
        #[source]
        source: CommandError,
    },

    /// Nothing to run for a stage
    #[error("{description}: no command configured")]
    NoCommand { description: String },

    #[error("workspace error: {0}")]
    Workspace(#[from] WorkspaceError),
}

impl StageError {
    /// Text published in the failure status
    pub fn status_description(&self) -> String {
        match self {
            StageError::CommandFailed { description, .. }
            | StageError::CommandUnavailable { description, .. }
            | StageError::NoCommand { description } => description.clone(),
            StageError::Workspace(_) => "Preparing workspace failed".to_string(),
        }
    }
}
