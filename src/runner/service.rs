//! The build façade.
//!
//! [`BuildService::build`] is the single entry point: stage the inputs,
//! launch the validator, wait with a timeout, parse the result and remove the
//! workspace. It always returns a [`BuildResult`]; staging errors, launch
//! errors, timeouts and even panics inside the pipeline are folded into a
//! failed result.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tracing::{debug, info, warn};

use super::config::{BuildConfig, LaunchMode};
use super::direct::DirectLauncher;
use super::launcher::{LaunchFlags, ValidatorLauncher};
use super::parser::ResultParser;
use super::result::{BuildInput, BuildResult};
use super::sandbox::SandboxLauncher;
use super::supervisor::{self, Outcome};
use crate::error::BuildError;
use crate::metrics::MetricsCollector;
use crate::workspace::{JobWorkspace, DESCRIPTOR_FILE, SCHEMA_FILE};

/// Pipeline progress, traced for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    Staged,
    Executed,
    Finalized,
}

/// Runs validator builds. Cheap to share behind an `Arc`.
pub struct BuildService {
    config: BuildConfig,
    launcher: Arc<dyn ValidatorLauncher>,
    parser: ResultParser,
    metrics: MetricsCollector,
}

impl BuildService {
    /// Creates a service with an explicit launcher.
    pub fn new(config: BuildConfig, launcher: Arc<dyn ValidatorLauncher>) -> Self {
        Self {
            config,
            launcher,
            parser: ResultParser::new(),
            metrics: MetricsCollector::new(),
        }
    }

    /// Creates a service with the launcher selected by `config.launch_mode`.
    pub fn from_config(config: BuildConfig) -> Self {
        let launcher: Arc<dyn ValidatorLauncher> = match config.launch_mode {
            LaunchMode::Sandboxed => Arc::new(SandboxLauncher::from_config(&config)),
            LaunchMode::Direct => Arc::new(DirectLauncher::from_config(&config)),
        };
        Self::new(config, launcher)
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Name of the launch strategy in use.
    pub fn launcher_name(&self) -> &'static str {
        self.launcher.name()
    }

    /// Runs one build. Never fails and never panics.
    pub async fn build(&self, input: &BuildInput) -> BuildResult {
        let start = Instant::now();
        let _in_progress = self.metrics.track_build();

        info!(
            job_id = %input.job_id,
            launcher = self.launcher.name(),
            extra_pass = input.run_extra_pass,
            "Starting build"
        );

        let outcome = AssertUnwindSafe(self.execute(input)).catch_unwind().await;

        let (result, label) = match outcome {
            Ok(Ok(result)) => {
                let label = if result.success { "success" } else { "failure" };
                (result, label)
            }
            Ok(Err(e)) => {
                warn!(job_id = %input.job_id, error = %e, "Build failed");
                (BuildResult::from_error(&e), e.outcome_label())
            }
            Err(panic) => {
                let e = BuildError::Crash(panic_message(panic.as_ref()));
                warn!(job_id = %input.job_id, error = %e, "Build crashed");
                (BuildResult::from_error(&e), e.outcome_label())
            }
        };

        let elapsed = start.elapsed();
        self.metrics.record_build(label, elapsed.as_secs_f64());

        info!(
            job_id = %input.job_id,
            outcome = label,
            errors = result.error_count,
            warnings = result.warning_count,
            duration_ms = elapsed.as_millis() as u64,
            "Build finished"
        );

        result
    }

    /// Owns the workspace for the duration of one build.
    ///
    /// If this future unwinds or is dropped, the workspace's `Drop` removes it.
    async fn execute(&self, input: &BuildInput) -> Result<BuildResult, BuildError> {
        debug!(job_id = %input.job_id, phase = ?Phase::Init, "Build phase");

        let mut workspace = JobWorkspace::create(&self.config.work_root, &input.job_id)?;
        let result = self.run_in(&workspace, input).await;

        let failures = workspace.cleanup();
        if failures > 0 {
            warn!(
                job_id = %input.job_id,
                workspace = %workspace.root().display(),
                failures,
                "Workspace cleanup incomplete"
            );
        }
        self.metrics.record_cleanup_failures(failures);

        debug!(job_id = %input.job_id, phase = ?Phase::Finalized, "Build phase");
        result
    }

    async fn run_in(
        &self,
        workspace: &JobWorkspace,
        input: &BuildInput,
    ) -> Result<BuildResult, BuildError> {
        workspace.write_input(SCHEMA_FILE, &input.schema_bytes)?;
        workspace.write_input(DESCRIPTOR_FILE, &input.descriptor_bytes)?;
        debug!(
            job_id = %input.job_id,
            workspace = %workspace.root().display(),
            phase = ?Phase::Staged,
            "Build phase"
        );

        let flags = LaunchFlags::new(input.run_extra_pass);
        let mut handle = self.launcher.launch(workspace, &flags).await?;
        let outcome = supervisor::wait_with_timeout(&mut handle, self.config.timeout()).await?;
        debug!(job_id = %input.job_id, phase = ?Phase::Executed, "Build phase");

        match outcome {
            Outcome::TimedOut => Err(BuildError::Timeout {
                seconds: self.config.timeout_secs,
            }),
            Outcome::Exited { code, console } => {
                if !workspace.result_file().exists() {
                    if let Some(e) = self.launcher.runtime_failure(code, &console) {
                        return Err(e.into());
                    }
                }
                debug!(job_id = %input.job_id, exit_code = code, "Parsing validator output");
                Ok(self.parser.parse(workspace.output_dir(), code, &console))
            }
        }
    }
}

impl std::fmt::Debug for BuildService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildService")
            .field("config", &self.config)
            .field("launcher", &self.launcher.name())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LaunchError;
    use crate::runner::launcher::ProcessHandle;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct PanickingLauncher;

    #[async_trait]
    impl ValidatorLauncher for PanickingLauncher {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn launch(
            &self,
            _workspace: &JobWorkspace,
            _flags: &LaunchFlags,
        ) -> Result<ProcessHandle, LaunchError> {
            panic!("launcher exploded");
        }
    }

    struct UnavailableLauncher;

    #[async_trait]
    impl ValidatorLauncher for UnavailableLauncher {
        fn name(&self) -> &'static str {
            "unavailable"
        }

        async fn launch(
            &self,
            _workspace: &JobWorkspace,
            _flags: &LaunchFlags,
        ) -> Result<ProcessHandle, LaunchError> {
            Err(LaunchError::ValidatorNotFound(PathBuf::from("/nowhere")))
        }
    }

    fn input() -> BuildInput {
        BuildInput::new("job-42", b"<ecore/>".to_vec(), b"<genmodel/>".to_vec())
    }

    fn is_empty_dir(path: &std::path::Path) -> bool {
        std::fs::read_dir(path).map(|mut d| d.next().is_none()).unwrap_or(true)
    }

    #[test]
    fn test_service_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BuildService>();
    }

    #[test]
    fn test_from_config_selects_launcher() {
        let service = BuildService::from_config(BuildConfig::default());
        assert_eq!(service.launcher_name(), "sandboxed");

        let service = BuildService::from_config(BuildConfig::default().without_sandbox());
        assert_eq!(service.launcher_name(), "direct");
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");

        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[tokio::test]
    async fn test_panic_becomes_crash_result() {
        let temp = TempDir::new().unwrap();
        let config = BuildConfig::default().with_work_root(temp.path());
        let service = BuildService::new(config, Arc::new(PanickingLauncher));

        let result = service.build(&input()).await;

        assert!(!result.success);
        assert_eq!(result.error_count, 1);
        assert_eq!(result.report, "Crash: launcher exploded");
        assert!(is_empty_dir(temp.path()));
    }

    #[tokio::test]
    async fn test_launch_error_becomes_result() {
        let temp = TempDir::new().unwrap();
        let config = BuildConfig::default().with_work_root(temp.path());
        let service = BuildService::new(config, Arc::new(UnavailableLauncher));

        let result = service.build(&input()).await;

        assert!(!result.success);
        assert_eq!(result.error_count, 1);
        assert!(result.report.starts_with("Launch failed: "));
        assert!(is_empty_dir(temp.path()));
    }

    #[tokio::test]
    async fn test_staging_error_skips_launch() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();

        let config = BuildConfig::default().with_work_root(&blocker);
        let service = BuildService::new(config, Arc::new(PanickingLauncher));

        let result = service.build(&input()).await;

        assert!(!result.success);
        assert_eq!(result.error_count, 1);
        assert!(result.report.starts_with("Staging failed: "));
    }
}
