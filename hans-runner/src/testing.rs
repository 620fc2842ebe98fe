//! Test doubles for the runner's seams
//!
//! Compiled for this crate's own tests and, through the `test-util`
//! feature, for downstream crates that drive a real coordinator with
//! scripted commands.

use async_trait::async_trait;
use hans_core::domain::notification::Notification;
use hans_core::domain::status::StatusReport;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::command::{CommandError, CommandRunner, ExitOutcome, ExternalCommand};
use crate::service::{NotificationService, StatusService};

/// One command seen by a [`ScriptedRunner`]
#[derive(Debug, Clone)]
pub struct Invocation {
    pub command: ExternalCommand,
    /// Whether the working directory existed when the command ran
    pub cwd_existed: bool,
}

/// Command runner that never spawns processes
///
/// Every command succeeds unless a rule registered with
/// [`ScriptedRunner::exit_code`] matches its rendered command line.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Vec<(String, i32)>,
    delay: Duration,
    invocations: Mutex<Vec<Invocation>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands whose command line contains `pattern` exit with `code`
    pub fn exit_code(mut self, pattern: impl Into<String>, code: i32) -> Self {
        self.rules.push((pattern.into(), code));
        self
    }

    /// Makes every command take `delay`
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// Rendered command lines, in execution order
    pub fn command_lines(&self) -> Vec<String> {
        self.invocations()
            .iter()
            .map(|i| i.command.to_string())
            .collect()
    }

    /// Working directories used, in execution order
    pub fn working_dirs(&self) -> Vec<Option<PathBuf>> {
        self.invocations()
            .into_iter()
            .map(|i| i.command.cwd)
            .collect()
    }

    /// Highest number of commands that were running at the same time
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn status(&self, command: &ExternalCommand) -> Result<ExitOutcome, CommandError> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        let cwd_existed = command.cwd.as_ref().is_none_or(|dir| dir.is_dir());
        self.invocations.lock().unwrap().push(Invocation {
            command: command.clone(),
            cwd_existed,
        });

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let line = command.to_string();
        let code = self
            .rules
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, code)| *code)
            .unwrap_or(0);

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(ExitOutcome::from_code(code))
    }
}

/// Status sink that records every report
#[derive(Debug, Default)]
pub struct RecordingStatusService {
    reports: Mutex<Vec<StatusReport>>,
    fail: bool,
}

impl RecordingStatusService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records reports but answers every call with an error
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn reports(&self) -> Vec<StatusReport> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusService for RecordingStatusService {
    async fn report(&self, report: &StatusReport) -> anyhow::Result<()> {
        self.reports.lock().unwrap().push(report.clone());
        if self.fail {
            anyhow::bail!("status API unavailable");
        }
        Ok(())
    }
}

/// Notification sink that records every message
#[derive(Debug, Default)]
pub struct RecordingNotifications {
    sent: Mutex<Vec<Notification>>,
    fail: bool,
}

impl RecordingNotifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationService for RecordingNotifications {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        if self.fail {
            anyhow::bail!("sendmail exited with 1");
        }
        Ok(())
    }
}
