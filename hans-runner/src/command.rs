//! External command runner
//!
//! Every git, make and hardware-test invocation goes through a
//! [`CommandRunner`]. Output is forwarded line by line to the log; the
//! exit status is the only thing the pipeline looks at.

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, info, warn};

use crate::error::StageError;

/// Log target used for forwarded command output
pub const OUTPUT_TARGET: &str = "hans_runner::command";

/// A program invocation, run without a shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment variables on top of the inherited environment
    pub env: Vec<(String, String)>,
    /// Working directory; the service's own when `None`
    pub cwd: Option<PathBuf>,
}

impl ExternalCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
        }
    }

    /// Builds a command from an argv-style list; `None` when empty
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone()).args(args.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }
}

impl fmt::Display for ExternalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.env {
            write!(f, "{}=\"{}\" ", key, value)?;
        }
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Exit status of a finished command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
}

impl ExitOutcome {
    pub fn from_code(code: i32) -> Self {
        Self { code: Some(code) }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Errors starting or waiting on a command
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Executes external commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs a command to completion, streaming its output to the log
    async fn status(&self, command: &ExternalCommand) -> Result<ExitOutcome, CommandError>;
}

/// Runs a stage command; any non-zero exit aborts the stage
///
/// `failure_description` is the text published in the failure status.
pub async fn run_stage(
    runner: &dyn CommandRunner,
    command: &ExternalCommand,
    failure_description: &str,
) -> Result<(), StageError> {
    let outcome = runner
        .status(command)
        .await
        .map_err(|source| StageError::CommandUnavailable {
            description: failure_description.to_string(),
            source,
        })?;

    if !outcome.success() {
        warn!("The command {} failed with {:?}", command, outcome.code);
        return Err(StageError::CommandFailed {
            description: failure_description.to_string(),
            command: command.to_string(),
            code: outcome.code,
        });
    }

    Ok(())
}

/// [`CommandRunner`] backed by real child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn status(&self, command: &ExternalCommand) -> Result<ExitOutcome, CommandError> {
        debug!("Running: {}", command);

        let mut process = tokio::process::Command::new(&command.program);
        process
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(cwd) = &command.cwd {
            process.current_dir(cwd);
        }

        let mut child = process.spawn().map_err(|source| CommandError::Spawn {
            command: command.to_string(),
            source,
        })?;

        let (_, _, status) = tokio::join!(
            forward_output(child.stdout.take()),
            forward_output(child.stderr.take()),
            child.wait(),
        );

        let status = status.map_err(|source| CommandError::Wait {
            command: command.to_string(),
            source,
        })?;

        debug!("{} exited with {:?}", command, status.code());
        Ok(ExitOutcome {
            code: status.code(),
        })
    }
}

async fn forward_output<R: AsyncRead + Unpin>(reader: Option<R>) {
    let Some(reader) = reader else {
        return;
    };

    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => info!(target: OUTPUT_TARGET, "OUT> {}", line),
            Ok(None) => break,
            Err(e) => {
                warn!(target: OUTPUT_TARGET, "Failed to read command output: {}", e);
                break;
            }
        }
    }
}
