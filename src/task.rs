//! The build task: mirror sync, workspace, checkout, build, install, cleanup.
//!
//! Stages run strictly in order and the first failure ends the task. Once a
//! workspace may exist, it is removed on every exit path. The task assumes
//! the caller holds the admission slot for its repository key, which makes it
//! the only writer of both the mirror and the workspace.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::{RunError, TaskError};
use crate::pipeline::{LogSink, PrefixWriter};
use crate::repo::RepoKey;
use crate::runner::{CommandRunner, CommandSpec};

/// What to do once the sources are checked out.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub branch: String,
    pub build_command: String,
    /// `None` skips the install stage.
    pub install_command: Option<String>,
    /// Extra `KEY=value` variables for the build command.
    pub environ: Vec<(String, String)>,
}

pub struct BuildTask {
    runner: Arc<dyn CommandRunner>,
    logger: Arc<PrefixWriter>,
    repo_url: String,
    mirror: PathBuf,
    workspace: PathBuf,
}

impl BuildTask {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        logger: Arc<PrefixWriter>,
        repo_url: &str,
        workdir: &Path,
    ) -> Self {
        let key = RepoKey::from_url(repo_url);
        Self {
            runner,
            logger,
            repo_url: repo_url.to_string(),
            mirror: key.mirror_path(workdir),
            workspace: key.workspace_path(workdir),
        }
    }

    #[cfg(test)]
    pub(crate) fn mirror(&self) -> &Path {
        &self.mirror
    }

    #[cfg(test)]
    pub(crate) fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Runs every stage of `plan`.
    pub async fn execute(&self, plan: &BuildPlan) -> Result<(), TaskError> {
        self.update_mirror().await.map_err(TaskError::MirrorUpdate)?;

        let result = self.build_in_workspace(plan).await;
        self.clean_workspace().await;
        result
    }

    /// Clones the mirror if it has no `HEAD` yet, then fetches all refs.
    pub async fn update_mirror(&self) -> Result<(), RunError> {
        if tokio::fs::try_exists(self.mirror.join("HEAD")).await.unwrap_or(false) {
            tracing::debug!(mirror = %self.mirror.display(), "mirror exists, fetching only");
        } else {
            let clone = CommandSpec::new("git")
                .args(["clone", "--mirror", self.repo_url.as_str()])
                .arg_path(&self.mirror);
            self.exec("clone", &clone).await?;
        }

        let fetch = CommandSpec::new("git")
            .args(["fetch", "-pt", "--all"])
            .current_dir(&self.mirror);
        self.exec("fetch", &fetch).await
    }

    async fn build_in_workspace(&self, plan: &BuildPlan) -> Result<(), TaskError> {
        self.remove_stale_workspace().await;

        let clone = CommandSpec::new("git")
            .args(["clone"])
            .arg_path(&self.mirror)
            .arg_path(&self.workspace);
        self.exec("workdir", &clone).await.map_err(TaskError::Workspace)?;

        let checkout = CommandSpec::new("git")
            .args(["-C"])
            .arg_path(&self.workspace)
            .args(["checkout", plan.branch.as_str()]);
        self.exec("workdir", &checkout)
            .await
            .map_err(|source| TaskError::Checkout {
                branch: plan.branch.clone(),
                source,
            })?;

        let build = CommandSpec::shell(&plan.build_command)
            .current_dir(&self.workspace)
            .envs(plan.environ.iter().cloned());
        self.exec("build", &build).await.map_err(TaskError::Build)?;

        if let Some(install_command) = &plan.install_command {
            let install = CommandSpec::shell(install_command).current_dir(&self.workspace);
            self.exec("install", &install).await.map_err(TaskError::Install)?;
        }

        Ok(())
    }

    async fn exec(&self, stage: &str, spec: &CommandSpec) -> Result<(), RunError> {
        let sink = self.logger.with_prefix(format!("[{}] ", stage));
        self.runner.run(spec, sink).await
    }

    async fn remove_stale_workspace(&self) {
        if !tokio::fs::try_exists(&self.workspace).await.unwrap_or(false) {
            return;
        }
        let logger = self.logger.with_prefix("[workdir] ");
        self.note(
            logger.as_ref(),
            &format!("removing stale working dir '{}'", self.workspace.display()),
        );
        if let Err(e) = tokio::fs::remove_dir_all(&self.workspace).await {
            tracing::warn!(workspace = %self.workspace.display(), error = %e, "can't remove stale working dir");
        }
    }

    /// Removes the workspace. Failure is reported but never fails the build.
    async fn clean_workspace(&self) {
        let logger = self.logger.with_prefix("[clean] ");
        match tokio::fs::remove_dir_all(&self.workspace).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(workspace = %self.workspace.display(), error = %e, "can't clear working dir");
                self.note(
                    logger.as_ref(),
                    &format!("can't clear working dir '{}': {}", self.workspace.display(), e),
                );
                return;
            }
        }
        self.note(
            logger.as_ref(),
            &format!("working dir '{}' cleared", self.workspace.display()),
        );
    }

    fn note(&self, logger: &dyn LogSink, message: &str) {
        if let Err(e) = logger.write_line(message) {
            tracing::debug!(error = %e, "dropped build log line");
        }
    }
}
