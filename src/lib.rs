//! schema-forge: sandboxed build/validation orchestrator.
//!
//! Stages an untrusted schema and its code-generation descriptor in a
//! throwaway workspace, runs an external validator on them inside a
//! hardened container, and reports one structured result per build.

pub mod cli;
pub mod error;
pub mod metrics;
pub mod runner;
pub mod workspace;

// Re-export commonly used types
pub use error::{BuildError, ConfigError, LaunchError, StagingError};
pub use runner::{BuildConfig, BuildInput, BuildResult, BuildService, LaunchMode};
pub use workspace::JobWorkspace;
