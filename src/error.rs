//! Error types for schema-forge operations.
//!
//! Defines the failure taxonomy of the build pipeline:
//! - Workspace staging (before any process is launched)
//! - Validator launch and supervision
//! - The umbrella build error used inside the service façade
//! - Configuration loading and validation
//!
//! None of the pipeline errors ever leave `BuildService::build`; each one is
//! folded into a failed `BuildResult` at the façade boundary.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while preparing the per-job workspace.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("Failed to create workspace directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write input '{name}': {source}")]
    WriteInput {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid input file name '{0}'")]
    InvalidInputName(String),
}

/// Errors raised while starting or supervising the validator process.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Validator executable not found at '{0}'")]
    ValidatorNotFound(PathBuf),

    #[error("Failed to resolve host path '{path}': {source}")]
    HostPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Host path '{0}' contains a comma and cannot be bind-mounted")]
    UnmountablePath(PathBuf),

    #[error("Failed while waiting for validator process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Container runtime '{runtime}' exited with code {code}: {console}")]
    Runtime {
        runtime: String,
        code: i32,
        console: String,
    },
}

/// Every way a single build can fail before a result is parsed.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Staging failed: {0}")]
    Staging(#[from] StagingError),

    #[error("Launch failed: {0}")]
    Launch(#[from] LaunchError),

    #[error("Timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Crash: {0}")]
    Crash(String),
}

impl BuildError {
    /// Stable label for metrics and logs.
    pub fn outcome_label(&self) -> &'static str {
        match self {
            BuildError::Staging(_) => "staging_error",
            BuildError::Launch(_) => "launch_error",
            BuildError::Timeout { .. } => "timeout",
            BuildError::Crash(_) => "crash",
        }
    }
}

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
