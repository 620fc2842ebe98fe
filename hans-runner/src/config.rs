//! Service configuration
//!
//! Loaded once at start-up from a YAML file (`.hans.yml` by default) and
//! a couple of environment overrides, validated, and then shared
//! read-only between every component that needs it.

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = ".hans.yml";

/// Service configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Token for the commit status API
    pub github_token: String,

    /// Base URL of the commit status API
    pub github_api_url: String,

    /// Externally visible host name, used in status links and descriptions
    pub hostname: String,

    /// Human readable name of the board under test (e.g., "Pixhawk")
    pub board_name: String,

    /// Context label attached to every commit status
    pub status_context: String,

    /// Directory in which per-commit workspaces are created
    pub workspace_root: PathBuf,

    /// Board lock marker file
    pub lock_path: PathBuf,

    /// Age after which a lock marker is considered abandoned
    pub stale_lock_after: Duration,

    /// How often a waiting pipeline rechecks the lock
    pub lock_poll_interval: Duration,

    /// History depth for the shallow clone
    pub clone_depth: u32,

    /// Directory name of the checkout inside a workspace
    pub checkout_dir: String,

    /// Firmware build settings
    pub build: BuildConfig,

    /// Hardware test program and arguments
    pub hwtest_command: Vec<String>,

    /// Notification mail settings; no mail is sent when absent
    pub mail: Option<MailConfig>,
}

/// Firmware build settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Boards passed to `make archives` through `BOARDS`
    pub boards: Vec<String>,
    /// Make target that builds the test firmware
    pub test_target: String,
    /// Parallel make jobs for the test build
    pub jobs: u32,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            boards: vec!["px4fmu-v2".to_string(), "px4io-v2".to_string()],
            test_target: "px4fmu-v2_test".to_string(),
            jobs: 8,
        }
    }
}

/// Notification mail settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MailConfig {
    /// From address
    pub sender: String,
    /// Addresses copied on every notification
    #[serde(default)]
    pub cc: Vec<String>,
    /// sendmail-compatible binary
    #[serde(default = "default_sendmail")]
    pub sendmail: String,
    /// Recipient for pull request runs (their payloads carry no address)
    #[serde(default)]
    pub pull_request_recipient: Option<String>,
}

fn default_sendmail() -> String {
    "sendmail".to_string()
}

// =============================================================================
// File format
// =============================================================================

#[derive(Debug, Deserialize)]
struct ConfigFile {
    github: GithubSection,
    hostname: String,
    board_name: Option<String>,
    status_context: Option<String>,
    workspace_root: Option<PathBuf>,
    #[serde(default)]
    lock: LockSection,
    #[serde(default)]
    clone: CloneSection,
    #[serde(default)]
    build: BuildConfig,
    hwtest: Option<Vec<String>>,
    mail: Option<MailConfig>,
}

#[derive(Debug, Deserialize)]
struct GithubSection {
    token: String,
    api_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LockSection {
    path: Option<PathBuf>,
    stale_after_secs: Option<u64>,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CloneSection {
    depth: Option<u32>,
    checkout_dir: Option<String>,
}

impl Config {
    /// Creates a configuration with defaults for everything but the credentials
    pub fn new(github_token: String, hostname: String) -> Self {
        Self {
            github_token,
            github_api_url: hans_client::DEFAULT_API_URL.to_string(),
            hostname,
            board_name: "Pixhawk".to_string(),
            status_context: "continuous-integration/hans-ci".to_string(),
            workspace_root: PathBuf::from("."),
            lock_path: PathBuf::from(".lockfile"),
            stale_lock_after: Duration::from_secs(10 * 60),
            lock_poll_interval: Duration::from_secs(1),
            clone_depth: 500,
            checkout_dir: "Firmware".to_string(),
            build: BuildConfig::default(),
            hwtest_command: vec!["ruby".to_string(), "hwtest.rb".to_string()],
            mail: None,
        }
    }

    /// Parses a YAML document
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let file: ConfigFile = serde_yaml::from_str(yaml).context("Could not parse configuration")?;

        let mut config = Self::new(file.github.token, file.hostname);

        if let Some(api_url) = file.github.api_url {
            config.github_api_url = api_url;
        }
        if let Some(board_name) = file.board_name {
            config.board_name = board_name;
        }
        if let Some(context) = file.status_context {
            config.status_context = context;
        }
        if let Some(root) = file.workspace_root {
            config.workspace_root = root;
        }
        if let Some(path) = file.lock.path {
            config.lock_path = path;
        }
        if let Some(secs) = file.lock.stale_after_secs {
            config.stale_lock_after = Duration::from_secs(secs);
        }
        if let Some(ms) = file.lock.poll_interval_ms {
            config.lock_poll_interval = Duration::from_millis(ms);
        }
        if let Some(depth) = file.clone.depth {
            config.clone_depth = depth;
        }
        if let Some(dir) = file.clone.checkout_dir {
            config.checkout_dir = dir;
        }
        if let Some(hwtest) = file.hwtest {
            config.hwtest_command = hwtest;
        }
        config.build = file.build;
        config.mail = file.mail;

        Ok(config)
    }

    /// Reads and parses a configuration file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml_str(&yaml).with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// Loads, applies environment overrides and validates
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = Self::from_file(path)?.with_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Applies environment overrides
    ///
    /// Recognized variables:
    /// - HANS_GITHUB_TOKEN
    /// - HANS_HOSTNAME
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(token) = lookup("HANS_GITHUB_TOKEN") {
            self.github_token = token;
        }
        if let Some(hostname) = lookup("HANS_HOSTNAME") {
            self.hostname = hostname;
        }
        self
    }

    /// Link attached to every commit status
    pub fn target_url(&self) -> String {
        format!("http://{}/", self.hostname)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.github_token.is_empty() {
            anyhow::bail!("github token cannot be empty");
        }

        if self.hostname.is_empty() {
            anyhow::bail!("hostname cannot be empty");
        }

        if !self.github_api_url.starts_with("http://") && !self.github_api_url.starts_with("https://")
        {
            anyhow::bail!("github api_url must start with http:// or https://");
        }

        if self.stale_lock_after.is_zero() {
            anyhow::bail!("lock stale_after_secs must be greater than 0");
        }

        if self.lock_poll_interval.is_zero() {
            anyhow::bail!("lock poll_interval_ms must be greater than 0");
        }

        if self.checkout_dir.is_empty() || self.checkout_dir.contains('/') {
            anyhow::bail!("clone checkout_dir must be a plain directory name");
        }

        if self.hwtest_command.is_empty() {
            anyhow::bail!("hwtest command cannot be empty");
        }

        if let Some(mail) = &self.mail {
            if mail.sender.is_empty() {
                anyhow::bail!("mail sender cannot be empty");
            }
        }

        Ok(())
    }
}
