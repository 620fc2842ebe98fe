//! Commit status service

use async_trait::async_trait;
use hans_client::StatusClient;
use hans_core::domain::status::StatusReport;
use std::time::Duration;
use tracing::info;

use crate::config::Config;

/// Publishes commit statuses
#[async_trait]
pub trait StatusService: Send + Sync {
    /// Sets the status of `report.sha` in `report.repo_full_name`
    async fn report(&self, report: &StatusReport) -> anyhow::Result<()>;
}

/// [`StatusService`] backed by the GitHub statuses API
pub struct GitHubStatusService {
    client: StatusClient,
    target_url: String,
    context: String,
}

impl GitHubStatusService {
    pub fn new(client: StatusClient, target_url: String, context: String) -> Self {
        Self {
            client,
            target_url,
            context,
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let client = StatusClient::with_client(
            config.github_api_url.clone(),
            config.github_token.clone(),
            http_client,
        );

        Ok(Self::new(
            client,
            config.target_url(),
            config.status_context.clone(),
        ))
    }
}

#[async_trait]
impl StatusService for GitHubStatusService {
    async fn report(&self, report: &StatusReport) -> anyhow::Result<()> {
        info!(
            "Setting commit status on repo: {} sha: {} to: {} description: {}",
            report.repo_full_name, report.sha, report.state, report.description
        );

        let status = match self
            .client
            .create_status(report, &self.target_url, &self.context)
            .await
        {
            Ok(status) => status,
            Err(e) if e.is_unauthorized() => {
                anyhow::bail!("GitHub rejected the access token, check github.token: {}", e)
            }
            Err(e) => return Err(e.into()),
        };

        info!("Commit status {} created", status.id);
        Ok(())
    }
}
