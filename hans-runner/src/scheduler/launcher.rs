//! Pipeline launcher
//!
//! Spawns one task per accepted request. The task publishes the `pending`
//! status, then waits for the board and runs the pipeline.

use anyhow::{Context, Result};
use hans_core::domain::pipeline::PipelineRequest;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::command::{CommandRunner, ProcessRunner};
use crate::config::Config;
use crate::pipeline::{Coordinator, PipelineOutcome};
use crate::service::{
    DisabledNotifications, GitHubStatusService, NotificationService, SendmailNotificationService,
    StatusService,
};

/// Hands requests to detached pipeline tasks
#[derive(Clone)]
pub struct PipelineLauncher {
    coordinator: Arc<Coordinator>,
}

impl PipelineLauncher {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    /// Production wiring: real processes, GitHub statuses and sendmail
    pub fn from_config(config: Config) -> Result<Self> {
        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new());

        let status: Arc<dyn StatusService> = Arc::new(
            GitHubStatusService::from_config(&config)
                .context("Failed to create status service")?,
        );

        let notifications: Arc<dyn NotificationService> = match &config.mail {
            Some(mail) => Arc::new(SendmailNotificationService::from_config(mail)),
            None => {
                info!("No mail section configured, notifications disabled");
                Arc::new(DisabledNotifications)
            }
        };

        let coordinator = Coordinator::new(Arc::new(config), runner, status, notifications);
        Ok(Self::new(Arc::new(coordinator)))
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn config(&self) -> &Config {
        self.coordinator.config()
    }

    /// Starts a run for `request` and returns without waiting for it
    pub fn launch(&self, request: PipelineRequest) -> JoinHandle<PipelineOutcome> {
        info!(
            "Queued run {} for {} on {} ({})",
            request.id, request.sha, request.repo_full_name, request.branch
        );

        let coordinator = Arc::clone(&self.coordinator);

        tokio::spawn(async move {
            coordinator.report_pending(&request).await;
            let outcome = coordinator.run(&request).await;

            if outcome.passed() {
                info!("Run {} finished: {}", request.id, outcome.description);
            } else {
                error!("Run {} failed: {}", request.id, outcome.description);
            }
            outcome
        })
    }
}
