//! Bounded wait on a launched validator.

use std::time::Duration;

use tracing::{debug, warn};

use super::launcher::ProcessHandle;
use crate::error::LaunchError;

/// Exit code reported when the process was terminated by a signal.
pub const SIGNAL_EXIT_CODE: i32 = -1;

/// How a supervised process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The process exited on its own.
    Exited { code: i32, console: String },
    /// The process was killed after exceeding the timeout.
    TimedOut,
}

/// Waits for `handle` to exit, killing it once `timeout` elapses.
///
/// On timeout the process (and its container, if any) is force-stopped and
/// its output discarded.
pub async fn wait_with_timeout(
    handle: &mut ProcessHandle,
    timeout: Duration,
) -> Result<Outcome, LaunchError> {
    match tokio::time::timeout(timeout, handle.wait()).await {
        Ok(Ok(status)) => {
            let code = status.code().unwrap_or(SIGNAL_EXIT_CODE);
            let console = handle.collect_output().await;
            debug!(program = %handle.program(), exit_code = code, console_bytes = console.len(), "Validator exited");
            Ok(Outcome::Exited { code, console })
        }
        Ok(Err(e)) => {
            handle.terminate().await;
            Err(LaunchError::Wait(e))
        }
        Err(_) => {
            warn!(
                program = %handle.program(),
                container = ?handle.container_name(),
                timeout_secs = timeout.as_secs(),
                "Validator timed out, killing"
            );
            handle.terminate().await;
            Ok(Outcome::TimedOut)
        }
    }
}
