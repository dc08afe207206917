//! Interpretation of validator output.
//!
//! The validator is expected to leave `output/result.json` behind:
//!
//! ```json
//! {"success": true, "errors": 0, "warnings": 2, "report": "ok", "identifiers": ["http://a"]}
//! ```
//!
//! Every field is optional. When the file is missing or cannot be trusted
//! (unreadable, not JSON, a field of the wrong type) the result is inferred
//! from the exit code and the captured console text instead.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use super::result::BuildResult;
use crate::workspace::RESULT_FILE;

/// On-disk shape of the validator's result file.
#[derive(Debug, Deserialize)]
struct ResultFile {
    success: Option<bool>,
    errors: Option<u64>,
    warnings: Option<u64>,
    report: Option<String>,
    identifiers: Option<Vec<String>>,
}

/// Turns validator output into a `BuildResult`. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultParser;

impl ResultParser {
    pub fn new() -> Self {
        Self
    }

    /// Parses `output_dir/result.json`, falling back to the exit code.
    pub fn parse(&self, output_dir: &Path, exit_code: i32, console: &str) -> BuildResult {
        let path = output_dir.join(RESULT_FILE);

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                debug!(file = %path.display(), error = %e, exit_code, "No usable result file, inferring from exit code");
                return BuildResult::from_exit_code(exit_code, console);
            }
        };

        match parse_result_file(&content, console) {
            Some(result) => result,
            None => {
                debug!(file = %path.display(), exit_code, "Malformed result file, inferring from exit code");
                BuildResult::from_exit_code(exit_code, console)
            }
        }
    }
}

/// Parses result-file content; `None` means it cannot be trusted.
fn parse_result_file(content: &str, console: &str) -> Option<BuildResult> {
    let file: ResultFile = serde_json::from_str(content).ok()?;

    let result = BuildResult {
        success: file.success.unwrap_or(false),
        error_count: file.errors.unwrap_or(0),
        warning_count: file.warnings.unwrap_or(0),
        report: file.report.unwrap_or_else(|| console.to_string()),
        discovered_identifiers: None,
    };

    Some(result.with_identifiers(file.identifiers.unwrap_or_default()))
}
