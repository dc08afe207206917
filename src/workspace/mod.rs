//! Ephemeral job workspaces.
//!
//! Every build gets its own directory tree:
//!
//! ```text
//! <work_root>/<job-id>-<uuid>/
//! ├── input/    model.ecore, model.genmodel
//! └── output/   result.json (written by the validator)
//! ```
//!
//! The tree lives exactly as long as the build that created it.

pub mod job;

pub use job::{
    workspace_dir_name, JobWorkspace, DESCRIPTOR_FILE, INPUT_DIR, OUTPUT_DIR, RESULT_FILE,
    SCHEMA_FILE,
};
