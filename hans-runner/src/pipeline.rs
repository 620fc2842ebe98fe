//! Pipeline coordinator
//!
//! Runs one [`PipelineRequest`] against the board:
//!
//! ```text
//! START -> LOCK_ACQUIRED -> WORKSPACE_RESET -> CLONED -> [MERGED] -> BUILT
//!       -> HW_TESTED -> REPORTED -> CLEANED_UP -> LOCK_RELEASED
//! ```
//!
//! Any failing stage skips straight to REPORTED with a `failure` status.
//! Workspace cleanup and lock release happen on every path, and exactly
//! one terminal status is published per run.

use hans_core::domain::notification::Notification;
use hans_core::domain::pipeline::PipelineRequest;
use hans_core::domain::status::{CommitState, StatusReport};
use hans_core::domain::timing::TimingRecord;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::command::{CommandRunner, ExternalCommand};
use crate::config::Config;
use crate::error::StageError;
use crate::lock::{BoardLock, BoardLockGuard};
use crate::service::{NotificationService, StatusService};
use crate::workspace::{Workspace, WorkspaceManager};

/// Points a run passes through, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    LockAcquired,
    WorkspaceReset,
    Cloned,
    Merged,
    Built,
    HwTested,
    Reported,
    CleanedUp,
    LockReleased,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::LockAcquired => "LOCK_ACQUIRED",
            PipelineStage::WorkspaceReset => "WORKSPACE_RESET",
            PipelineStage::Cloned => "CLONED",
            PipelineStage::Merged => "MERGED",
            PipelineStage::Built => "BUILT",
            PipelineStage::HwTested => "HW_TESTED",
            PipelineStage::Reported => "REPORTED",
            PipelineStage::CleanedUp => "CLEANED_UP",
            PipelineStage::LockReleased => "LOCK_RELEASED",
        };
        f.write_str(name)
    }
}

/// Terminal result of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub state: CommitState,
    pub description: String,
    /// Present when the hardware test ran
    pub timing: Option<TimingRecord>,
}

impl PipelineOutcome {
    pub fn passed(&self) -> bool {
        self.state == CommitState::Success
    }
}

/// Result of a run that got through every stage
struct Completed {
    hw_passed: bool,
    timing: TimingRecord,
}

/// Serializes pipeline runs on the board and drives them to completion
pub struct Coordinator {
    config: Arc<Config>,
    lock: Arc<BoardLock>,
    workspaces: WorkspaceManager,
    runner: Arc<dyn CommandRunner>,
    status: Arc<dyn StatusService>,
    notifications: Arc<dyn NotificationService>,
}

impl Coordinator {
    pub fn new(
        config: Arc<Config>,
        runner: Arc<dyn CommandRunner>,
        status: Arc<dyn StatusService>,
        notifications: Arc<dyn NotificationService>,
    ) -> Self {
        let lock = Arc::new(BoardLock::from_config(&config));
        let workspaces = WorkspaceManager::new(&config, Arc::clone(&runner));

        Self {
            config,
            lock,
            workspaces,
            runner,
            status,
            notifications,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn lock(&self) -> &Arc<BoardLock> {
        &self.lock
    }

    /// Publishes the `pending` status for a queued request
    pub async fn report_pending(&self, request: &PipelineRequest) {
        let description = format!("Running test on {} hardware..", self.config.board_name);
        self.publish(request, CommitState::Pending, description).await;
    }

    /// Runs the whole pipeline for `request`
    ///
    /// Never fails: every error ends up in the returned outcome and in the
    /// terminal commit status.
    pub async fn run(&self, request: &PipelineRequest) -> PipelineOutcome {
        info!(
            "Run {} for {} ({}) waiting for the board",
            request.id, request.sha, request.branch
        );

        let guard = match self.lock.acquire(request.id).await {
            Ok(guard) => guard,
            Err(e) => {
                error!("Run {} could not lock the board: {}", request.id, e);
                let outcome = PipelineOutcome {
                    state: CommitState::Failure,
                    description: "Board lock unavailable".to_string(),
                    timing: None,
                };
                self.publish(request, outcome.state, outcome.description.clone())
                    .await;
                self.stage(request, PipelineStage::Reported);
                return outcome;
            }
        };
        self.stage(request, PipelineStage::LockAcquired);

        let (workspace, result) = match self.workspaces.workspace_for(&request.sha) {
            Ok(workspace) => {
                let result = self.execute(request, &workspace).await;
                (Some(workspace), result)
            }
            Err(e) => (None, Err(e.into())),
        };

        let outcome = self.conclude(request, result);

        self.publish(request, outcome.state, outcome.description.clone())
            .await;
        self.stage(request, PipelineStage::Reported);

        if let Some(workspace) = &workspace {
            self.cleanup(request, workspace).await;
        }

        self.unlock(request, guard).await;
        self.notify(request, &outcome).await;

        outcome
    }

    /// Stages that need the workspace, stopping at the first failure
    async fn execute(
        &self,
        request: &PipelineRequest,
        workspace: &Workspace,
    ) -> Result<Completed, StageError> {
        self.workspaces.reset(workspace).await?;
        self.stage(request, PipelineStage::WorkspaceReset);

        let git_start = Instant::now();
        self.workspaces
            .clone(workspace, &request.branch, &request.clone_url)
            .await?;
        self.stage(request, PipelineStage::Cloned);

        if let Some(target) = &request.merge_target {
            self.workspaces
                .merge_base(workspace, &target.repo_url, &target.branch)
                .await?;
            self.stage(request, PipelineStage::Merged);
        }
        let git = git_start.elapsed();

        let build_start = Instant::now();
        self.workspaces.build(workspace).await?;
        self.stage(request, PipelineStage::Built);
        let build = build_start.elapsed();

        let hw_start = Instant::now();
        let hw_test = self.hwtest_command(request, workspace)?;
        let exit = self
            .runner
            .status(&hw_test)
            .await
            .map_err(|source| StageError::CommandUnavailable {
                description: "HW test could not be started".to_string(),
                source,
            })?;
        let hardware = hw_start.elapsed();
        info!("HW TEST RESULT: {:?}", exit.code);
        self.stage(request, PipelineStage::HwTested);

        Ok(Completed {
            hw_passed: exit.success(),
            timing: TimingRecord {
                git,
                build,
                hardware,
            },
        })
    }

    fn conclude(
        &self,
        request: &PipelineRequest,
        result: Result<Completed, StageError>,
    ) -> PipelineOutcome {
        match result {
            Ok(Completed { hw_passed, timing }) => {
                let (state, verdict) = if hw_passed {
                    (CommitState::Success, "passed")
                } else {
                    (CommitState::Failure, "FAILED")
                };
                PipelineOutcome {
                    state,
                    description: format!(
                        "{}: {} HW test {}: {}",
                        self.config.hostname, self.config.board_name, verdict, timing
                    ),
                    timing: Some(timing),
                }
            }
            Err(e) => {
                warn!("Run {} aborted: {}", request.id, e);
                PipelineOutcome {
                    state: CommitState::Failure,
                    description: e.status_description(),
                    timing: None,
                }
            }
        }
    }

    /// Hardware test invocation
    ///
    /// Runs from the service's working directory. The environment tells the
    /// test script where the build lives and who to credit.
    fn hwtest_command(
        &self,
        request: &PipelineRequest,
        workspace: &Workspace,
    ) -> Result<ExternalCommand, StageError> {
        let command = ExternalCommand::from_argv(&self.config.hwtest_command).ok_or_else(|| {
            StageError::NoCommand {
                description: "HW test could not be started".to_string(),
            }
        })?;

        let mut command = command
            .env("srcdir", workspace.path().display().to_string())
            .env("pushername", request.contributor.name.clone())
            .env("HANS_WORKSPACE", workspace.path().display().to_string())
            .env("HANS_CHECKOUT", workspace.checkout().display().to_string())
            .env("HANS_SHA", request.sha.clone())
            .env("HANS_BRANCH", request.branch.clone());

        if let Some(email) = &request.contributor.email {
            command = command.env("pusheremail", email.clone());
        }

        Ok(command)
    }

    async fn cleanup(&self, request: &PipelineRequest, workspace: &Workspace) {
        if let Err(e) = self.workspaces.destroy(workspace).await {
            warn!("Run {} left its workspace behind: {}", request.id, e);
        }
        self.stage(request, PipelineStage::CleanedUp);
    }

    async fn unlock(&self, request: &PipelineRequest, guard: BoardLockGuard) {
        guard.release().await;
        self.stage(request, PipelineStage::LockReleased);
    }

    async fn publish(&self, request: &PipelineRequest, state: CommitState, description: String) {
        let report = StatusReport::new(
            request.repo_full_name.clone(),
            request.sha.clone(),
            state,
            description,
        );

        if let Err(e) = self.status.report(&report).await {
            warn!(
                "Failed to set {} status for {} on {}: {:#}",
                state, request.sha, request.repo_full_name, e
            );
        }
    }

    async fn notify(&self, request: &PipelineRequest, outcome: &PipelineOutcome) {
        let Some(notification) = self.notification_for(request, outcome) else {
            return;
        };

        if let Err(e) = self.notifications.notify(&notification).await {
            warn!("Failed to notify {}: {:#}", notification.contributor_email, e);
        }
    }

    fn notification_for(
        &self,
        request: &PipelineRequest,
        outcome: &PipelineOutcome,
    ) -> Option<Notification> {
        let mail = self.config.mail.as_ref()?;
        let email = request.contributor.email.clone()?;

        Some(Notification {
            contributor: request.contributor.name.clone(),
            contributor_email: email,
            sender: mail.sender.clone(),
            detail: outcome.description.clone(),
            success: outcome.passed(),
            branch: request.branch.clone(),
            repo_full_name: request.repo_full_name.clone(),
            sha: request.sha.clone(),
            results_link: self.config.target_url(),
            finished_at: chrono::Utc::now(),
        })
    }

    fn stage(&self, request: &PipelineRequest, stage: PipelineStage) {
        info!(run_id = %request.id, sha = %request.sha, "{}", stage);
    }
}
