//! Workspace management
//!
//! A workspace is a directory named after the commit under test. It holds
//! a single checkout in which the clone, merge and build stages run.
//! Only the run holding the board lock touches a workspace.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::command::{CommandRunner, ExternalCommand, run_stage};
use crate::config::{BuildConfig, Config};
use crate::error::StageError;

/// Name of the remote the base repository is fetched into
const BASE_REMOTE: &str = "base_repo";

#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// Commit id is not usable as a directory name
    #[error("invalid workspace name {0:?}")]
    InvalidName(String),

    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Directory of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    path: PathBuf,
    checkout: PathBuf,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Repository checkout inside the workspace
    pub fn checkout(&self) -> &Path {
        &self.checkout
    }
}

/// Creates, populates and destroys workspaces
pub struct WorkspaceManager {
    root: PathBuf,
    checkout_dir: String,
    clone_depth: u32,
    build: BuildConfig,
    runner: Arc<dyn CommandRunner>,
}

impl WorkspaceManager {
    pub fn new(config: &Config, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            root: config.workspace_root.clone(),
            checkout_dir: config.checkout_dir.clone(),
            clone_depth: config.clone_depth,
            build: config.build.clone(),
            runner,
        }
    }

    /// Workspace for a commit; does not touch the filesystem
    pub fn workspace_for(&self, sha: &str) -> Result<Workspace, WorkspaceError> {
        let valid = !sha.is_empty()
            && sha != "."
            && sha != ".."
            && !sha.contains(['/', '\\']);
        if !valid {
            return Err(WorkspaceError::InvalidName(sha.to_string()));
        }

        let path = self.root.join(sha);
        let checkout = path.join(&self.checkout_dir);
        Ok(Workspace { path, checkout })
    }

    /// Removes any leftover of a previous run and creates an empty directory
    pub async fn reset(&self, workspace: &Workspace) -> Result<(), WorkspaceError> {
        self.destroy(workspace).await?;
        create_dir(&workspace.path).await
    }

    /// Shallow-clones `branch` and initializes submodules
    pub async fn clone(
        &self,
        workspace: &Workspace,
        branch: &str,
        repo_url: &str,
    ) -> Result<(), StageError> {
        info!("Cloning {} from {}", branch, repo_url);
        create_dir(&workspace.path).await?;

        let clone = ExternalCommand::new("git")
            .arg("clone")
            .arg("--depth")
            .arg(self.clone_depth.to_string())
            .arg(git_url(repo_url))
            .arg("--branch")
            .arg(branch)
            .arg("--single-branch")
            .arg(&self.checkout_dir)
            .current_dir(&workspace.path);
        run_stage(self.runner.as_ref(), &clone, "Cloning repo failed.").await?;

        let init = git(workspace, ["submodule", "init"]);
        run_stage(self.runner.as_ref(), &init, "GIT submodule init failed").await?;

        let update = git(workspace, ["submodule", "update"]);
        run_stage(self.runner.as_ref(), &update, "GIT submodule update failed").await
    }

    /// Merges the base repository's branch into the checkout
    pub async fn merge_base(
        &self,
        workspace: &Workspace,
        base_repo_url: &str,
        base_branch: &str,
    ) -> Result<(), StageError> {
        info!("Merging {}/{} into test branch", base_repo_url, base_branch);

        let add_remote = git(workspace, ["remote", "add", BASE_REMOTE]).arg(git_url(base_repo_url));
        run_stage(self.runner.as_ref(), &add_remote, "GIT adding upstream failed").await?;

        let fetch = git(workspace, ["fetch", BASE_REMOTE]);
        run_stage(self.runner.as_ref(), &fetch, "GIT fetching upstream failed").await?;

        let merge = git(workspace, ["merge"])
            .arg(format!("{}/{}", BASE_REMOTE, base_branch))
            .arg("-m")
            .arg(format!(
                "Merged {}/{} into test branch",
                base_repo_url, base_branch
            ));
        let failure = format!("Failed merging {}/{}", base_repo_url, base_branch);
        run_stage(self.runner.as_ref(), &merge, &failure).await
    }

    /// Builds the firmware archives and the test firmware
    pub async fn build(&self, workspace: &Workspace) -> Result<(), StageError> {
        info!("Starting build");

        let archives = ExternalCommand::new("make")
            .arg("archives")
            .env("BOARDS", self.build.boards.join(" "))
            .current_dir(&workspace.checkout);
        run_stage(self.runner.as_ref(), &archives, "make archives failed").await?;

        let test_build = ExternalCommand::new("make")
            .arg(format!("-j{}", self.build.jobs))
            .arg(&self.build.test_target)
            .current_dir(&workspace.checkout);
        let failure = format!("make {} failed", self.build.test_target);
        run_stage(self.runner.as_ref(), &test_build, &failure).await
    }

    /// Recursively removes the workspace; a missing directory is fine
    pub async fn destroy(&self, workspace: &Workspace) -> Result<(), WorkspaceError> {
        match tokio::fs::remove_dir_all(&workspace.path).await {
            Ok(()) => {
                debug!("Removed workspace {}", workspace.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(WorkspaceError::Io {
                action: "removing",
                path: workspace.path.clone(),
                source,
            }),
        }
    }
}

fn git<const N: usize>(workspace: &Workspace, args: [&str; N]) -> ExternalCommand {
    ExternalCommand::new("git")
        .args(args)
        .current_dir(&workspace.checkout)
}

async fn create_dir(path: &Path) -> Result<(), WorkspaceError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| WorkspaceError::Io {
            action: "creating",
            path: path.to_path_buf(),
            source,
        })
}

/// Clone URL for a repository web URL
fn git_url(repo_url: &str) -> String {
    if repo_url.ends_with(".git") {
        repo_url.to_string()
    } else {
        format!("{}.git", repo_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    fn manager(root: &Path, runner: Arc<ScriptedRunner>) -> WorkspaceManager {
        let mut config = Config::new("token".to_string(), "host".to_string());
        config.workspace_root = root.to_path_buf();
        WorkspaceManager::new(&config, runner)
    }

    #[test]
    fn test_git_url() {
        assert_eq!(git_url("https://example/repo"), "https://example/repo.git");
        assert_eq!(git_url("https://example/repo.git"), "https://example/repo.git");
    }

    #[test]
    fn test_workspace_named_by_sha() {
        let runner = Arc::new(ScriptedRunner::new());
        let manager = manager(Path::new("/srv/hans"), runner);

        let workspace = manager.workspace_for("abc123").unwrap();
        assert_eq!(workspace.path(), Path::new("/srv/hans/abc123"));
        assert_eq!(workspace.checkout(), Path::new("/srv/hans/abc123/Firmware"));
    }

    #[test]
    fn test_workspace_rejects_path_like_names() {
        let runner = Arc::new(ScriptedRunner::new());
        let manager = manager(Path::new("/srv/hans"), runner);

        for name in ["", ".", "..", "../etc", "a/b"] {
            assert!(manager.workspace_for(name).is_err(), "{name:?} accepted");
        }
    }

    #[tokio::test]
    async fn test_reset_purges_leftovers() {
        let root = tempfile::tempdir().unwrap();
        let manager = manager(root.path(), Arc::new(ScriptedRunner::new()));
        let workspace = manager.workspace_for("abc123").unwrap();

        std::fs::create_dir_all(workspace.checkout()).unwrap();
        std::fs::write(workspace.checkout().join("stale.o"), b"x").unwrap();

        manager.reset(&workspace).await.unwrap();

        assert!(workspace.path().is_dir());
        assert!(!workspace.checkout().exists());
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let manager = manager(root.path(), Arc::new(ScriptedRunner::new()));
        let workspace = manager.workspace_for("abc123").unwrap();

        manager.reset(&workspace).await.unwrap();
        manager.destroy(&workspace).await.unwrap();
        assert!(!workspace.path().exists());

        manager.destroy(&workspace).await.unwrap();
    }

    #[tokio::test]
    async fn test_clone_commands() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let manager = manager(root.path(), runner.clone());
        let workspace = manager.workspace_for("abc123").unwrap();

        manager
            .clone(&workspace, "main", "https://example/repo")
            .await
            .unwrap();

        assert_eq!(
            runner.command_lines(),
            vec![
                "git clone --depth 500 https://example/repo.git --branch main --single-branch Firmware",
                "git submodule init",
                "git submodule update",
            ]
        );
        let dirs = runner.working_dirs();
        assert_eq!(dirs[0].as_deref(), Some(workspace.path()));
        assert_eq!(dirs[1].as_deref(), Some(workspace.checkout()));
        assert!(runner.invocations()[0].cwd_existed);
    }

    #[tokio::test]
    async fn test_clone_failure_stops_before_submodules() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new().exit_code("git clone", 128));
        let manager = manager(root.path(), runner.clone());
        let workspace = manager.workspace_for("abc123").unwrap();

        let err = manager
            .clone(&workspace, "main", "https://example/repo")
            .await
            .unwrap_err();

        assert_eq!(err.status_description(), "Cloning repo failed.");
        assert_eq!(runner.command_lines().len(), 1);
    }

    #[tokio::test]
    async fn test_merge_base_commands() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let manager = manager(root.path(), runner.clone());
        let workspace = manager.workspace_for("abc123").unwrap();

        manager
            .merge_base(&workspace, "https://example/upstream", "master")
            .await
            .unwrap();

        assert_eq!(
            runner.command_lines(),
            vec![
                "git remote add base_repo https://example/upstream.git",
                "git fetch base_repo",
                "git merge base_repo/master -m Merged https://example/upstream/master into test branch",
            ]
        );
    }

    #[tokio::test]
    async fn test_merge_conflict_description() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new().exit_code("git merge", 1));
        let manager = manager(root.path(), runner);
        let workspace = manager.workspace_for("abc123").unwrap();

        let err = manager
            .merge_base(&workspace, "https://example/upstream", "master")
            .await
            .unwrap_err();

        assert_eq!(
            err.status_description(),
            "Failed merging https://example/upstream/master"
        );
    }

    #[tokio::test]
    async fn test_build_commands() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let manager = manager(root.path(), runner.clone());
        let workspace = manager.workspace_for("abc123").unwrap();

        manager.build(&workspace).await.unwrap();

        assert_eq!(
            runner.command_lines(),
            vec![
                "BOARDS=\"px4fmu-v2 px4io-v2\" make archives",
                "make -j8 px4fmu-v2_test",
            ]
        );
    }

    #[tokio::test]
    async fn test_test_build_failure_description() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new().exit_code("px4fmu-v2_test", 2));
        let manager = manager(root.path(), runner);
        let workspace = manager.workspace_for("abc123").unwrap();

        let err = manager.build(&workspace).await.unwrap_err();
        assert_eq!(err.status_description(), "make px4fmu-v2_test failed");
    }
}
