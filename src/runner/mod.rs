//! Validator runner.
//!
//! Runs an external validator against one pair of untrusted artifacts and
//! turns whatever it leaves behind into a single [`BuildResult`].
//!
//! # Architecture
//!
//! ```text
//! BuildInput → JobWorkspace → ValidatorLauncher → wait_with_timeout → ResultParser → BuildResult
//!                   └──────────────── cleanup (always) ────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use schema_forge::runner::{BuildConfig, BuildInput, BuildService};
//!
//! let service = BuildService::from_config(BuildConfig::from_env()?);
//! let input = BuildInput::new("job-1", schema_bytes, descriptor_bytes);
//!
//! let result = service.build(&input).await;
//! println!("{} errors, {} warnings", result.error_count, result.warning_count);
//! ```

pub mod config;
pub mod direct;
pub mod launcher;
pub mod parser;
pub mod result;
pub mod sandbox;
pub mod service;
pub mod supervisor;

pub use config::{BuildConfig, LaunchMode, DEFAULT_TIMEOUT_SECS};
pub use direct::DirectLauncher;
pub use launcher::{LaunchFlags, ProcessHandle, ValidatorLauncher, ValidatorPaths};
pub use parser::ResultParser;
pub use result::{BuildInput, BuildResult};
pub use sandbox::{SandboxConfig, SandboxLauncher};
pub use service::BuildService;
pub use supervisor::{wait_with_timeout, Outcome};
