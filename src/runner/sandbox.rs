//! Hardened container launcher.
//!
//! Runs the validator through a container runtime with a fixed hardening
//! profile. None of these settings are optional:
//!
//! - container removed on exit, read-only root filesystem
//! - no network
//! - CPU, memory and process-count caps
//! - all capabilities dropped, no privilege escalation
//! - a small `noexec,nosuid` tmpfs at `/tmp`
//! - the workspace bind-mounted read-write at `/workspace`, the validator
//!   executable bind-mounted read-only under `/opt/validator`
//!
//! The validator receives in-container paths, never host paths.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

use super::config::BuildConfig;
use super::launcher::{ContainerRef, LaunchFlags, ProcessHandle, ValidatorLauncher, ValidatorPaths};
use crate::error::LaunchError;
use crate::workspace::JobWorkspace;

/// Where the workspace appears inside the container.
pub const CONTAINER_WORKSPACE: &str = "/workspace";
/// Directory the validator executable is mounted into.
pub const CONTAINER_VALIDATOR_DIR: &str = "/opt/validator";

/// Exit codes `docker run` reserves for its own failures: the runtime
/// itself failed (125), the command could not be invoked (126) or was not
/// found (127).
pub const RUNTIME_EXIT_CODES: [i32; 3] = [125, 126, 127];

/// Resource and image settings for the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Container runtime binary.
    pub runtime: String,
    /// Image to run.
    pub image: String,
    /// CPU limit (number of cores).
    pub cpu_limit: f64,
    /// Memory limit in MB.
    pub memory_limit_mb: u64,
    /// Maximum number of processes.
    pub pids_limit: u64,
    /// Size of the /tmp tmpfs in MB.
    pub tmpfs_size_mb: u64,
    /// Command placed before the mounted validator (e.g. `java -jar`).
    pub interpreter: Vec<String>,
}

impl SandboxConfig {
    /// Creates a new sandbox configuration with the default limits.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            runtime: "docker".to_string(),
            image: image.into(),
            cpu_limit: 1.0,
            memory_limit_mb: 1024,
            pids_limit: 256,
            tmpfs_size_mb: 64,
            interpreter: Vec::new(),
        }
    }

    pub fn from_build_config(config: &BuildConfig) -> Self {
        Self {
            runtime: config.container_runtime.clone(),
            image: config.sandbox_image.clone(),
            cpu_limit: config.cpu_limit,
            memory_limit_mb: config.memory_limit_mb,
            pids_limit: config.pids_limit,
            tmpfs_size_mb: config.tmpfs_size_mb,
            interpreter: config.sandbox_interpreter.clone(),
        }
    }

    /// Sets the container runtime binary.
    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = runtime.into();
        self
    }

    /// Sets the memory limit in MB.
    pub fn with_memory_mb(mut self, mb: u64) -> Self {
        self.memory_limit_mb = mb;
        self
    }

    /// Sets the CPU limit.
    pub fn with_cpu_limit(mut self, cores: f64) -> Self {
        self.cpu_limit = cores;
        self
    }

    /// Sets the process-count limit.
    pub fn with_pids_limit(mut self, limit: u64) -> Self {
        self.pids_limit = limit;
        self
    }

    /// Sets the interpreter command.
    pub fn with_interpreter(mut self, interpreter: Vec<String>) -> Self {
        self.interpreter = interpreter;
        self
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::new("eclipse-temurin:21-jre")
    }
}

/// Launches the validator inside a hardened container.
#[derive(Debug, Clone)]
pub struct SandboxLauncher {
    config: SandboxConfig,
    /// Validator executable on the host.
    validator: PathBuf,
    /// Arguments placed between the validator and its flags.
    validator_args: Vec<String>,
}

impl SandboxLauncher {
    /// Creates a new sandbox launcher.
    pub fn new(config: SandboxConfig, validator: impl Into<PathBuf>) -> Self {
        Self {
            config,
            validator: validator.into(),
            validator_args: Vec::new(),
        }
    }

    /// Sets arguments placed between the validator and its flags.
    pub fn with_validator_args(mut self, args: Vec<String>) -> Self {
        self.validator_args = args;
        self
    }

    pub fn from_config(config: &BuildConfig) -> Self {
        Self::new(SandboxConfig::from_build_config(config), &config.validator_path)
            .with_validator_args(config.validator_args.clone())
    }

    /// The sandbox settings in use.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Full runtime argument list for one run.
    ///
    /// `workspace_root` and `validator` must be absolute host paths.
    pub fn run_args(
        &self,
        container_name: &str,
        workspace_root: &Path,
        validator: &Path,
        flags: &LaunchFlags,
    ) -> Vec<String> {
        let validator_name = validator
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "validator".to_string());
        let container_validator = format!("{}/{}", CONTAINER_VALIDATOR_DIR, validator_name);

        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            container_name.to_string(),
            "--read-only".to_string(),
            "--network=none".to_string(),
            format!("--cpus={}", self.config.cpu_limit),
            format!("--memory={}m", self.config.memory_limit_mb),
            "--cap-drop=ALL".to_string(),
            "--security-opt=no-new-privileges".to_string(),
            format!("--pids-limit={}", self.config.pids_limit),
            "--tmpfs".to_string(),
            format!("/tmp:rw,noexec,nosuid,size={}m", self.config.tmpfs_size_mb),
            "--mount".to_string(),
            format!(
                "type=bind,source={},target={}",
                workspace_root.display(),
                CONTAINER_WORKSPACE
            ),
            "--mount".to_string(),
            format!(
                "type=bind,source={},target={},readonly",
                validator.display(),
                container_validator
            ),
            "-w".to_string(),
            CONTAINER_WORKSPACE.to_string(),
            self.config.image.clone(),
        ];

        args.extend(self.config.interpreter.iter().cloned());
        args.push(container_validator);
        args.extend(self.validator_args.iter().cloned());
        args.extend(ValidatorPaths::under(Path::new(CONTAINER_WORKSPACE)).to_args(flags));
        args
    }

    fn resolve_validator(&self) -> Result<PathBuf, LaunchError> {
        if !self.validator.exists() {
            return Err(LaunchError::ValidatorNotFound(self.validator.clone()));
        }
        canonical(&self.validator)
    }
}

/// Absolute host path that is safe to place in a `--mount` spec.
fn canonical(path: &Path) -> Result<PathBuf, LaunchError> {
    let resolved = path.canonicalize().map_err(|source| LaunchError::HostPath {
        path: path.to_path_buf(),
        source,
    })?;
    if resolved.to_string_lossy().contains(',') {
        return Err(LaunchError::UnmountablePath(resolved));
    }
    Ok(resolved)
}

/// Unique, runtime-safe container name.
pub fn container_name() -> String {
    format!("schema-forge-{}", Uuid::new_v4().simple())
}

#[async_trait]
impl ValidatorLauncher for SandboxLauncher {
    fn name(&self) -> &'static str {
        "sandboxed"
    }

    async fn launch(
        &self,
        workspace: &JobWorkspace,
        flags: &LaunchFlags,
    ) -> Result<ProcessHandle, LaunchError> {
        let validator = self.resolve_validator()?;
        let workspace_root = canonical(workspace.root())?;
        let name = container_name();

        let args = self.run_args(&name, &workspace_root, &validator, flags);
        debug!(container = %name, "{} {}", self.config.runtime, args.join(" "));

        info!(
            job_id = %workspace.job_id(),
            container = %name,
            image = %self.config.image,
            "Starting validator in sandbox"
        );

        let mut command = Command::new(&self.config.runtime);
        command.args(&args);

        ProcessHandle::spawn(
            command,
            self.config.runtime.clone(),
            Some(ContainerRef {
                runtime: self.config.runtime.clone(),
                name,
            }),
        )
    }

    fn runtime_failure(&self, exit_code: i32, console: &str) -> Option<LaunchError> {
        if !RUNTIME_EXIT_CODES.contains(&exit_code) {
            return None;
        }
        Some(LaunchError::Runtime {
            runtime: self.config.runtime.clone(),
            code: exit_code,
            console: console.trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_args(flags: LaunchFlags) -> Vec<String> {
        let launcher = SandboxLauncher::new(
            SandboxConfig::new("validator:latest"),
            "/opt/tools/validate",
        );
        launcher.run_args(
            "schema-forge-test",
            Path::new("/var/jobs/job-1-abc"),
            Path::new("/opt/tools/validate"),
            &flags,
        )
    }

    #[test]
    fn test_sandbox_config_defaults() {
        let config = SandboxConfig::default();
        assert_eq!(config.runtime, "docker");
        assert_eq!(config.memory_limit_mb, 1024);
        assert_eq!(config.pids_limit, 256);
        assert!((config.cpu_limit - 1.0).abs() < f64::EPSILON);
        assert!(config.interpreter.is_empty());
    }

    #[test]
    fn test_sandbox_config_from_build_config() {
        let build = BuildConfig::default()
            .with_container_runtime("podman")
            .with_sandbox_image("img:1")
            .with_memory_limit_mb(512)
            .with_pids_limit(64)
            .with_sandbox_interpreter(vec!["java".to_string(), "-jar".to_string()]);
        let config = SandboxConfig::from_build_config(&build);
        assert_eq!(config.runtime, "podman");
        assert_eq!(config.image, "img:1");
        assert_eq!(config.memory_limit_mb, 512);
        assert_eq!(config.pids_limit, 64);
        assert_eq!(config.interpreter, vec!["java", "-jar"]);
    }

    #[test]
    fn test_run_args_hardening() {
        let args = sample_args(LaunchFlags::default());

        for required in [
            "run",
            "--rm",
            "--read-only",
            "--network=none",
            "--cpus=1",
            "--memory=1024m",
            "--cap-drop=ALL",
            "--security-opt=no-new-privileges",
            "--pids-limit=256",
            "/tmp:rw,noexec,nosuid,size=64m",
        ] {
            assert!(args.contains(&required.to_string()), "missing {required}");
        }

        let name_at = args.iter().position(|a| a == "--name").unwrap();
        assert_eq!(args[name_at + 1], "schema-forge-test");
    }

    #[test]
    fn test_run_args_mounts() {
        let args = sample_args(LaunchFlags::default());
        assert!(args.contains(
            &"type=bind,source=/var/jobs/job-1-abc,target=/workspace".to_string()
        ));
        assert!(args.contains(
            &"type=bind,source=/opt/tools/validate,target=/opt/validator/validate,readonly"
                .to_string()
        ));
    }

    #[test]
    fn test_run_args_use_container_paths() {
        let args = sample_args(LaunchFlags::new(true));
        let image_at = args.iter().position(|a| a == "validator:latest").unwrap();
        let command = &args[image_at + 1..];

        assert_eq!(
            command,
            &[
                "/opt/validator/validate",
                "--schema",
                "/workspace/input/model.ecore",
                "--descriptor",
                "/workspace/input/model.genmodel",
                "--out",
                "/workspace/output",
                "--extra-pass",
                "true",
            ]
        );
        assert!(!command.iter().any(|a| a.contains("/var/jobs")));
    }

    #[test]
    fn test_run_args_interpreter_and_validator_args() {
        let launcher = SandboxLauncher::new(
            SandboxConfig::new("img").with_interpreter(vec!["java".to_string(), "-jar".to_string()]),
            "/opt/tools/validator.jar",
        )
        .with_validator_args(vec!["--strict".to_string()]);
        let args = launcher.run_args(
            "n",
            Path::new("/w"),
            Path::new("/opt/tools/validator.jar"),
            &LaunchFlags::default(),
        );
        let image_at = args.iter().position(|a| a == "img").unwrap();
        assert_eq!(args[image_at + 1], "java");
        assert_eq!(args[image_at + 2], "-jar");
        assert_eq!(args[image_at + 3], "/opt/validator/validator.jar");
        assert_eq!(args[image_at + 4], "--strict");
        assert_eq!(args[image_at + 5], "--schema");
    }

    #[test]
    fn test_container_names_are_unique() {
        let a = container_name();
        let b = container_name();
        assert_ne!(a, b);
        assert!(a.starts_with("schema-forge-"));
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-'));
    }

    #[test]
    fn test_runtime_failure_codes() {
        let launcher = SandboxLauncher::new(SandboxConfig::default(), "/opt/tools/validate");

        let err = launcher
            .runtime_failure(125, "Cannot connect to the Docker daemon\n")
            .unwrap();
        match err {
            LaunchError::Runtime { runtime, code, console } => {
                assert_eq!(runtime, "docker");
                assert_eq!(code, 125);
                assert_eq!(console, "Cannot connect to the Docker daemon");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(launcher.runtime_failure(127, "").is_some());
        assert!(launcher.runtime_failure(0, "").is_none());
        assert!(launcher.runtime_failure(1, "validation failed").is_none());
    }

    #[test]
    fn test_canonical_rejects_commas() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("a,b");
        std::fs::create_dir(&dir).unwrap();

        let err = canonical(&dir).unwrap_err();
        assert!(matches!(err, LaunchError::UnmountablePath(_)));
        assert!(canonical(temp.path()).is_ok());
    }

    #[tokio::test]
    async fn test_launch_missing_validator() {
        let temp = TempDir::new().unwrap();
        let workspace = JobWorkspace::create(temp.path(), "missing").unwrap();
        let launcher = SandboxLauncher::new(SandboxConfig::default(), temp.path().join("nope"));

        let err = launcher
            .launch(&workspace, &LaunchFlags::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::ValidatorNotFound(_)));
    }

    #[tokio::test]
    async fn test_launch_missing_runtime() {
        let temp = TempDir::new().unwrap();
        let validator = temp.path().join("validator");
        std::fs::write(&validator, "#!/bin/sh\n").unwrap();
        let workspace = JobWorkspace::create(&temp.path().join("jobs"), "runtime").unwrap();
        let launcher = SandboxLauncher::new(
            SandboxConfig::default().with_runtime("schema-forge-no-such-runtime"),
            &validator,
        );

        let err = launcher
            .launch(&workspace, &LaunchFlags::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::Spawn { .. }));
    }
}
