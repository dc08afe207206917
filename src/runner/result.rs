//! Build inputs and the single terminal result of a build.

use serde::{Deserialize, Serialize};

use crate::error::BuildError;

/// The artifacts submitted for one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInput {
    /// Opaque job identifier, used only to name the workspace.
    pub job_id: String,
    /// Raw bytes of the schema artifact.
    pub schema_bytes: Vec<u8>,
    /// Raw bytes of the code-generation descriptor.
    pub descriptor_bytes: Vec<u8>,
    /// Passed through to the validator as `--extra-pass`.
    pub run_extra_pass: bool,
}

impl BuildInput {
    /// Creates a new build input.
    pub fn new(
        job_id: impl Into<String>,
        schema_bytes: impl Into<Vec<u8>>,
        descriptor_bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            schema_bytes: schema_bytes.into(),
            descriptor_bytes: descriptor_bytes.into(),
            run_extra_pass: false,
        }
    }

    /// Sets the extra-pass flag.
    pub fn with_extra_pass(mut self, enabled: bool) -> Self {
        self.run_extra_pass = enabled;
        self
    }
}

/// Outcome of a build. Every field is always populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    /// Whether the artifacts validated.
    pub success: bool,
    /// Number of errors reported.
    pub error_count: u64,
    /// Number of warnings reported.
    pub warning_count: u64,
    /// Free-form diagnostic text.
    pub report: String,
    /// Identifiers discovered by the validator, if it reported any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovered_identifiers: Option<Vec<String>>,
}

impl BuildResult {
    /// A failed result with a single error and the given report.
    pub fn failure(report: impl Into<String>) -> Self {
        Self {
            success: false,
            error_count: 1,
            warning_count: 0,
            report: report.into(),
            discovered_identifiers: None,
        }
    }

    /// Result derived from the validator's exit code alone.
    ///
    /// A blank console falls back to a `Process exit <code>` placeholder.
    pub fn from_exit_code(exit_code: i32, console: &str) -> Self {
        let report = if console.trim().is_empty() {
            format!("Process exit {}", exit_code)
        } else {
            console.to_string()
        };

        if exit_code == 0 {
            Self {
                success: true,
                error_count: 0,
                warning_count: 0,
                report,
                discovered_identifiers: None,
            }
        } else {
            Self::failure(report)
        }
    }

    /// Converts a pipeline failure into its result.
    pub fn from_error(error: &BuildError) -> Self {
        Self::failure(error.to_string())
    }

    /// Sets the discovered identifiers; an empty list is treated as absent.
    pub fn with_identifiers(mut self, identifiers: Vec<String>) -> Self {
        self.discovered_identifiers = if identifiers.is_empty() {
            None
        } else {
            Some(identifiers)
        };
        self
    }

    /// Returns true if the build succeeded.
    pub fn is_success(&self) -> bool {
        self.success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LaunchError;
    use std::path::PathBuf;

    #[test]
    fn test_build_input_builder() {
        let input = BuildInput::new("job-1", b"schema".to_vec(), "descriptor").with_extra_pass(true);
        assert_eq!(input.job_id, "job-1");
        assert_eq!(input.schema_bytes, b"schema");
        assert_eq!(input.descriptor_bytes, b"descriptor");
        assert!(input.run_extra_pass);
    }

    #[test]
    fn test_from_exit_code_success() {
        let result = BuildResult::from_exit_code(0, "all good\n");
        assert!(result.is_success());
        assert_eq!(result.error_count, 0);
        assert_eq!(result.warning_count, 0);
        assert_eq!(result.report, "all good\n");
        assert!(result.discovered_identifiers.is_none());
    }

    #[test]
    fn test_from_exit_code_failure_placeholder() {
        let result = BuildResult::from_exit_code(3, "  \n");
        assert!(!result.success);
        assert_eq!(result.error_count, 1);
        assert_eq!(result.report, "Process exit 3");
    }

    #[test]
    fn test_from_error() {
        let result = BuildResult::from_error(&BuildError::Timeout { seconds: 7 });
        assert!(!result.success);
        assert_eq!(result.error_count, 1);
        assert_eq!(result.report, "Timeout after 7s");

        let result =
            BuildResult::from_error(&LaunchError::ValidatorNotFound(PathBuf::from("/x")).into());
        assert!(result.report.starts_with("Launch failed"));
    }

    #[test]
    fn test_with_identifiers_empty_is_absent() {
        let result = BuildResult::from_exit_code(0, "ok").with_identifiers(Vec::new());
        assert!(result.discovered_identifiers.is_none());

        let result =
            BuildResult::from_exit_code(0, "ok").with_identifiers(vec!["http://a".to_string()]);
        assert_eq!(result.discovered_identifiers, Some(vec!["http://a".to_string()]));
    }

    #[test]
    fn test_serialization_omits_missing_identifiers() {
        let json = serde_json::to_value(BuildResult::failure("nope")).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error_count"], 1);
        assert!(json.get("discovered_identifiers").is_none());
    }
}
