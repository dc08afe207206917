//! Per-invocation staging directory.
//!
//! A `JobWorkspace` owns `<work_root>/<job>-<uuid>/{input,output}` for the
//! duration of one build. It is removed by an explicit `cleanup()` call and,
//! failing that, by `Drop`, so a cancelled build never leaks its directory.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::StagingError;

/// Subdirectory holding the staged artifacts.
pub const INPUT_DIR: &str = "input";
/// Subdirectory the validator writes into.
pub const OUTPUT_DIR: &str = "output";
/// File name of the staged schema artifact.
pub const SCHEMA_FILE: &str = "model.ecore";
/// File name of the staged descriptor artifact.
pub const DESCRIPTOR_FILE: &str = "model.genmodel";
/// Structured result file the validator writes into `output/`.
pub const RESULT_FILE: &str = "result.json";

const MAX_JOB_PREFIX_LEN: usize = 64;

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_-]").expect("Invalid regex for job id"))
}

/// Builds a collision-free directory name from an opaque job identifier.
pub fn workspace_dir_name(job_id: &str) -> String {
    let mut prefix = unsafe_chars().replace_all(job_id, "_").into_owned();
    prefix.truncate(MAX_JOB_PREFIX_LEN);
    if prefix.is_empty() {
        prefix.push_str("job");
    }
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

/// Isolated staging tree for a single build.
#[derive(Debug)]
pub struct JobWorkspace {
    job_id: String,
    root: PathBuf,
    input_dir: PathBuf,
    output_dir: PathBuf,
    cleaned: bool,
}

impl JobWorkspace {
    /// Allocates a fresh workspace under `work_root`.
    ///
    /// The root is created with `create_dir`, so a name collision surfaces as
    /// an error instead of two jobs sharing a tree. Anything created before a
    /// failure is removed again when the half-built value is dropped.
    pub fn create(work_root: &Path, job_id: &str) -> Result<Self, StagingError> {
        fs::create_dir_all(work_root).map_err(|source| StagingError::CreateDir {
            path: work_root.to_path_buf(),
            source,
        })?;

        let root = work_root.join(workspace_dir_name(job_id));
        fs::create_dir(&root).map_err(|source| StagingError::CreateDir {
            path: root.clone(),
            source,
        })?;

        let workspace = Self {
            job_id: job_id.to_string(),
            input_dir: root.join(INPUT_DIR),
            output_dir: root.join(OUTPUT_DIR),
            root,
            cleaned: false,
        };

        for dir in [&workspace.input_dir, &workspace.output_dir] {
            fs::create_dir(dir).map_err(|source| StagingError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }
        workspace.open_output_dir()?;

        debug!(job_id = %workspace.job_id, workspace = %workspace.root.display(), "Workspace created");
        Ok(workspace)
    }

    // Must stay writable for a container user with no capabilities.
    #[cfg(unix)]
    fn open_output_dir(&self) -> Result<(), StagingError> {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(&self.output_dir, fs::Permissions::from_mode(0o777)).map_err(
            |source| StagingError::CreateDir {
                path: self.output_dir.clone(),
                source,
            },
        )
    }

    #[cfg(not(unix))]
    fn open_output_dir(&self) -> Result<(), StagingError> {
        Ok(())
    }

    /// Writes one artifact into `input/` and returns its host path.
    pub fn write_input(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, StagingError> {
        if !is_plain_file_name(name) {
            return Err(StagingError::InvalidInputName(name.to_string()));
        }

        let path = self.input_dir.join(name);
        fs::write(&path, bytes).map_err(|source| StagingError::WriteInput {
            name: name.to_string(),
            source,
        })?;

        debug!(job_id = %self.job_id, file = %path.display(), bytes = bytes.len(), "Staged input");
        Ok(path)
    }

    /// Removes the whole tree, deepest entries first.
    ///
    /// Never fails: entries that are already gone are skipped and any other
    /// deletion error is logged. Returns the number of entries that could not
    /// be removed. Calling it again is a no-op.
    pub fn cleanup(&mut self) -> usize {
        if self.cleaned {
            return 0;
        }
        self.cleaned = true;

        let mut failures = 0;
        for entry in WalkDir::new(&self.root).contents_first(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    if e.io_error().map(|io| io.kind()) != Some(ErrorKind::NotFound) {
                        warn!(job_id = %self.job_id, error = %e, "Failed to walk workspace entry");
                        failures += 1;
                    }
                    continue;
                }
            };

            let path = entry.path();
            let removed = if entry.file_type().is_dir() {
                fs::remove_dir(path)
            } else {
                fs::remove_file(path)
            };

            match removed {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(
                        job_id = %self.job_id,
                        path = %path.display(),
                        error = %e,
                        "Failed to remove workspace entry"
                    );
                    failures += 1;
                }
            }
        }

        debug!(job_id = %self.job_id, workspace = %self.root.display(), failures, "Workspace cleaned up");
        failures
    }

    /// Opaque job identifier this workspace was created for.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Root of the workspace tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Host path of a staged input.
    pub fn input_path(&self, name: &str) -> PathBuf {
        self.input_dir.join(name)
    }

    /// Host path of the structured result file.
    pub fn result_file(&self) -> PathBuf {
        self.output_dir.join(RESULT_FILE)
    }

    /// Returns true once `cleanup()` has run.
    pub fn is_cleaned(&self) -> bool {
        self.cleaned
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        if !self.cleaned {
            self.cleanup();
        }
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name)
}
