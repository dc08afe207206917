//! Configuration for validator builds.
//!
//! Values come from three layers, later ones winning: built-in defaults, an
//! optional YAML file, and `BUILD_*` environment variables.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default validator timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// How the validator process is started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    /// Inside a hardened container (the only mode fit for untrusted input).
    #[default]
    Sandboxed,
    /// Directly on the host. Test and fallback use only.
    Direct,
}

impl fmt::Display for LaunchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchMode::Sandboxed => write!(f, "sandboxed"),
            LaunchMode::Direct => write!(f, "direct"),
        }
    }
}

impl FromStr for LaunchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sandboxed" | "sandbox" | "container" => Ok(LaunchMode::Sandboxed),
            "direct" | "host" => Ok(LaunchMode::Direct),
            other => Err(format!("Unknown launch mode: {}", other)),
        }
    }
}

/// Configuration for the build service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Launch strategy.
    pub launch_mode: LaunchMode,
    /// Container runtime binary ("docker", "podman").
    pub container_runtime: String,
    /// Base image the validator runs in.
    pub sandbox_image: String,
    /// Host path to the validator executable.
    pub validator_path: PathBuf,
    /// Arguments placed before the validator flags (e.g. a script path).
    pub validator_args: Vec<String>,
    /// Maximum validator run time in seconds.
    pub timeout_secs: u64,
    /// Parent directory for per-job workspaces.
    pub work_root: PathBuf,
    /// CPU limit (number of cores).
    pub cpu_limit: f64,
    /// Memory limit in MB.
    pub memory_limit_mb: u64,
    /// Maximum number of processes inside the sandbox.
    pub pids_limit: u64,
    /// Size of the writable /tmp mount in MB.
    pub tmpfs_size_mb: u64,
    /// Command placed before the mounted validator in the sandbox (e.g. `java -jar`).
    pub sandbox_interpreter: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            launch_mode: LaunchMode::Sandboxed,
            container_runtime: "docker".to_string(),
            sandbox_image: "eclipse-temurin:21-jre".to_string(),
            validator_path: PathBuf::from("/opt/schema-forge/validator"),
            validator_args: Vec::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            work_root: std::env::temp_dir().join("schema-forge"),
            cpu_limit: 1.0,
            memory_limit_mb: 1024,
            pids_limit: 256,
            tmpfs_size_mb: 64,
            sandbox_interpreter: Vec::new(),
        }
    }
}

impl BuildConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a YAML file; fields it omits keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parses YAML content; fields it omits keep their defaults.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Creates configuration from defaults plus environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `BUILD_LAUNCH_MODE`: `sandboxed` or `direct` (default: sandboxed)
    /// - `BUILD_CONTAINER_RUNTIME`: runtime binary (default: docker)
    /// - `BUILD_SANDBOX_IMAGE`: base image (default: eclipse-temurin:21-jre)
    /// - `BUILD_VALIDATOR_PATH`: host validator executable
    /// - `BUILD_VALIDATOR_ARGS`: whitespace-separated leading arguments
    /// - `BUILD_TIMEOUT_SECS`: timeout in seconds (default: 300)
    /// - `BUILD_WORK_ROOT`: workspace parent directory (default: $TMPDIR/schema-forge)
    /// - `BUILD_SANDBOX_CPUS`: CPU cores (default: 1.0)
    /// - `BUILD_SANDBOX_MEMORY_MB`: memory limit (default: 1024)
    /// - `BUILD_SANDBOX_PIDS_LIMIT`: process limit (default: 256)
    /// - `BUILD_SANDBOX_TMPFS_MB`: /tmp size (default: 64)
    /// - `BUILD_SANDBOX_INTERPRETER`: whitespace-separated in-container interpreter
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides fields from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Overrides fields from an arbitrary key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("BUILD_LAUNCH_MODE") {
            self.launch_mode = val.parse().map_err(|message| ConfigError::InvalidValue {
                key: "BUILD_LAUNCH_MODE".to_string(),
                message,
            })?;
        }

        if let Some(val) = lookup("BUILD_CONTAINER_RUNTIME") {
            self.container_runtime = val;
        }

        if let Some(val) = lookup("BUILD_SANDBOX_IMAGE") {
            self.sandbox_image = val;
        }

        if let Some(val) = lookup("BUILD_VALIDATOR_PATH") {
            self.validator_path = PathBuf::from(val);
        }

        if let Some(val) = lookup("BUILD_VALIDATOR_ARGS") {
            self.validator_args = val.split_whitespace().map(String::from).collect();
        }

        if let Some(val) = lookup("BUILD_TIMEOUT_SECS") {
            self.timeout_secs = parse_env_value(&val, "BUILD_TIMEOUT_SECS")?;
        }

        if let Some(val) = lookup("BUILD_WORK_ROOT") {
            self.work_root = PathBuf::from(val);
        }

        if let Some(val) = lookup("BUILD_SANDBOX_CPUS") {
            self.cpu_limit = parse_env_value(&val, "BUILD_SANDBOX_CPUS")?;
        }

        if let Some(val) = lookup("BUILD_SANDBOX_MEMORY_MB") {
            self.memory_limit_mb = parse_env_value(&val, "BUILD_SANDBOX_MEMORY_MB")?;
        }

        if let Some(val) = lookup("BUILD_SANDBOX_PIDS_LIMIT") {
            self.pids_limit = parse_env_value(&val, "BUILD_SANDBOX_PIDS_LIMIT")?;
        }

        if let Some(val) = lookup("BUILD_SANDBOX_TMPFS_MB") {
            self.tmpfs_size_mb = parse_env_value(&val, "BUILD_SANDBOX_TMPFS_MB")?;
        }

        if let Some(val) = lookup("BUILD_SANDBOX_INTERPRETER") {
            self.sandbox_interpreter = val.split_whitespace().map(String::from).collect();
        }

        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.validator_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "validator_path cannot be empty".to_string(),
            ));
        }

        if self.work_root.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "work_root cannot be empty".to_string(),
            ));
        }

        if self.launch_mode == LaunchMode::Direct {
            return Ok(());
        }

        if self.work_root.to_string_lossy().contains(',') {
            return Err(ConfigError::ValidationFailed(
                "work_root cannot contain ',' in sandboxed mode".to_string(),
            ));
        }

        if self.container_runtime.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "container_runtime cannot be empty".to_string(),
            ));
        }

        if self.sandbox_image.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "sandbox_image cannot be empty".to_string(),
            ));
        }

        if self.cpu_limit <= 0.0 {
            return Err(ConfigError::ValidationFailed(
                "cpu_limit must be greater than 0".to_string(),
            ));
        }

        if self.memory_limit_mb < 64 {
            return Err(ConfigError::ValidationFailed(
                "memory_limit_mb must be at least 64 MB".to_string(),
            ));
        }

        if self.pids_limit == 0 {
            return Err(ConfigError::ValidationFailed(
                "pids_limit must be greater than 0".to_string(),
            ));
        }

        if self.tmpfs_size_mb == 0 {
            return Err(ConfigError::ValidationFailed(
                "tmpfs_size_mb must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Sets the launch mode.
    pub fn with_launch_mode(mut self, mode: LaunchMode) -> Self {
        self.launch_mode = mode;
        self
    }

    /// Runs the validator directly on the host.
    pub fn without_sandbox(mut self) -> Self {
        self.launch_mode = LaunchMode::Direct;
        self
    }

    /// Sets the container runtime binary.
    pub fn with_container_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.container_runtime = runtime.into();
        self
    }

    /// Sets the sandbox image.
    pub fn with_sandbox_image(mut self, image: impl Into<String>) -> Self {
        self.sandbox_image = image.into();
        self
    }

    /// Sets the validator executable.
    pub fn with_validator(mut self, path: impl Into<PathBuf>) -> Self {
        self.validator_path = path.into();
        self
    }

    /// Sets arguments placed before the validator flags.
    pub fn with_validator_args(mut self, args: Vec<String>) -> Self {
        self.validator_args = args;
        self
    }

    /// Sets the timeout in seconds.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Sets the workspace parent directory.
    pub fn with_work_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_root = dir.into();
        self
    }

    /// Sets the CPU limit.
    pub fn with_cpu_limit(mut self, cores: f64) -> Self {
        self.cpu_limit = cores;
        self
    }

    /// Sets the memory limit in MB.
    pub fn with_memory_limit_mb(mut self, mb: u64) -> Self {
        self.memory_limit_mb = mb;
        self
    }

    /// Sets the process-count limit.
    pub fn with_pids_limit(mut self, limit: u64) -> Self {
        self.pids_limit = limit;
        self
    }

    /// Sets the /tmp tmpfs size in MB.
    pub fn with_tmpfs_size_mb(mut self, mb: u64) -> Self {
        self.tmpfs_size_mb = mb;
        self
    }

    /// Sets the in-container interpreter command.
    pub fn with_sandbox_interpreter(mut self, interpreter: Vec<String>) -> Self {
        self.sandbox_interpreter = interpreter;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}
