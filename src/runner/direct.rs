//! Direct host launcher.
//!
//! Runs the validator as a plain child process with host paths. There is no
//! isolation at all, so this is only meant for tests and trusted setups.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use super::config::BuildConfig;
use super::launcher::{LaunchFlags, ProcessHandle, ValidatorLauncher, ValidatorPaths};
use crate::error::LaunchError;
use crate::workspace::JobWorkspace;

/// Launches `program [args...] --schema ... --out ...` on the host.
#[derive(Debug, Clone)]
pub struct DirectLauncher {
    /// Validator executable.
    program: PathBuf,
    /// Arguments placed before the validator flags.
    args: Vec<String>,
}

impl DirectLauncher {
    /// Creates a new direct launcher for the given executable.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Creates with leading arguments (e.g. `-jar validator.jar`).
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn from_config(config: &BuildConfig) -> Self {
        Self::new(&config.validator_path).with_args(config.validator_args.clone())
    }

    /// Full argument list for a workspace.
    pub fn command_args(&self, workspace: &JobWorkspace, flags: &LaunchFlags) -> Vec<String> {
        let mut args = self.args.clone();
        args.extend(ValidatorPaths::on_host(workspace).to_args(flags));
        args
    }
}

#[async_trait]
impl ValidatorLauncher for DirectLauncher {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn launch(
        &self,
        workspace: &JobWorkspace,
        flags: &LaunchFlags,
    ) -> Result<ProcessHandle, LaunchError> {
        let mut command = Command::new(&self.program);
        command
            .args(self.command_args(workspace, flags))
            .current_dir(workspace.root());

        info!(
            job_id = %workspace.job_id(),
            program = %self.program.display(),
            "Starting validator directly on host"
        );

        ProcessHandle::spawn(command, self.program.display().to_string(), None)
    }
}
