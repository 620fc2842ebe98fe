//! Hans Status Client
//!
//! A small, typed HTTP client for the source-control platform's commit
//! status API. The only operation the CI service needs is setting the
//! status of a commit, so that is all this crate exposes.
//!
//! # Example
//!
//! ```no_run
//! use hans_client::StatusClient;
//! use hans_core::domain::status::{CommitState, StatusReport};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = StatusClient::new("ghp_token");
//!
//!     let report = StatusReport::new("org/repo", "abc123", CommitState::Pending, "Running");
//!     client
//!         .create_status(&report, "http://ci.example.org/", "continuous-integration/hans-ci")
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod error;
mod statuses;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use statuses::{CommitStatus, CreateStatus, MAX_DESCRIPTION_LEN};

use reqwest::Client;
use serde::de::DeserializeOwned;

/// Public GitHub API endpoint
pub const DEFAULT_API_URL: &str = "https://api.github.com";

const USER_AGENT: &str = concat!("hans-ci/", env!("CARGO_PKG_VERSION"));

/// HTTP client for the commit status API
#[derive(Debug, Clone)]
pub struct StatusClient {
    /// Base URL of the API (e.g., "https://api.github.com")
    api_url: String,
    /// Personal access token used as bearer credential
    token: String,
    /// HTTP client instance
    client: Client,
}

impl StatusClient {
    /// Create a client for the public GitHub API
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_client(DEFAULT_API_URL, token, Client::new())
    }

    /// Create a client with a custom base URL and HTTP client
    ///
    /// Use this for GitHub Enterprise installations or to configure
    /// timeouts and proxies.
    ///
    /// # Example
    /// ```
    /// use hans_client::StatusClient;
    /// use reqwest::Client;
    /// use std::time::Duration;
    ///
    /// let http_client = Client::builder()
    ///     .timeout(Duration::from_secs(30))
    ///     .build()
    ///     .unwrap();
    ///
    /// let client = StatusClient::with_client("https://ghe.example.org/api/v3", "token", http_client);
    /// ```
    pub fn with_client(api_url: impl Into<String>, token: impl Into<String>, client: Client) -> Self {
        let api_url = api_url.into();
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.into(),
            client,
        }
    }

    /// Get the base URL of the API
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}
