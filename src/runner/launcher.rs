//! Validator launch strategies.
//!
//! A launcher turns a staged workspace into a running validator process.
//! Two strategies share the `ValidatorLauncher` contract:
//!
//! - [`SandboxLauncher`](super::sandbox::SandboxLauncher): hardened container,
//!   the default and the only strategy fit for untrusted artifacts.
//! - [`DirectLauncher`](super::direct::DirectLauncher): plain host process,
//!   for tests and trusted fallback setups.
//!
//! Both hand back a [`ProcessHandle`] whose stdout and stderr are drained
//! into one console text in the background, so a chatty validator can never
//! block on a full pipe. On unix the process leads its own process group,
//! and the whole group is killed once the leader is done, so nothing the
//! validator forked outlives the build.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::LaunchError;
use crate::workspace::{JobWorkspace, DESCRIPTOR_FILE, INPUT_DIR, OUTPUT_DIR, SCHEMA_FILE};

/// Upper bound on retained console text.
pub const MAX_CONSOLE_BYTES: usize = 1024 * 1024;

/// How long to wait for output pipes to close after the process exits.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// How long a runtime `kill`/`rm` call may take.
const RUNTIME_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-build switches passed through to the validator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaunchFlags {
    pub run_extra_pass: bool,
}

impl LaunchFlags {
    pub fn new(run_extra_pass: bool) -> Self {
        Self { run_extra_pass }
    }
}

/// Artifact locations as the validator process sees them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorPaths {
    pub schema: PathBuf,
    pub descriptor: PathBuf,
    pub out: PathBuf,
}

impl ValidatorPaths {
    /// Paths for a workspace rooted at `root`, host or in-container.
    pub fn under(root: &Path) -> Self {
        let input = root.join(INPUT_DIR);
        Self {
            schema: input.join(SCHEMA_FILE),
            descriptor: input.join(DESCRIPTOR_FILE),
            out: root.join(OUTPUT_DIR),
        }
    }

    /// Host paths of a staged workspace.
    pub fn on_host(workspace: &JobWorkspace) -> Self {
        Self::under(workspace.root())
    }

    /// `--schema <p> --descriptor <p> --out <dir> --extra-pass <bool>`
    pub fn to_args(&self, flags: &LaunchFlags) -> Vec<String> {
        vec![
            "--schema".to_string(),
            self.schema.to_string_lossy().to_string(),
            "--descriptor".to_string(),
            self.descriptor.to_string_lossy().to_string(),
            "--out".to_string(),
            self.out.to_string_lossy().to_string(),
            "--extra-pass".to_string(),
            flags.run_extra_pass.to_string(),
        ]
    }
}

/// Starts the validator for a staged workspace.
#[async_trait]
pub trait ValidatorLauncher: Send + Sync {
    /// Short strategy name for logs.
    fn name(&self) -> &'static str;

    /// Spawns the validator. The process is running when this returns.
    async fn launch(
        &self,
        workspace: &JobWorkspace,
        flags: &LaunchFlags,
    ) -> Result<ProcessHandle, LaunchError>;

    /// Classifies an exit that came from the launch machinery rather than
    /// the validator. Only consulted when no result file was written.
    fn runtime_failure(&self, _exit_code: i32, _console: &str) -> Option<LaunchError> {
        None
    }
}

/// Container backing a sandboxed process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRef {
    /// Runtime binary used to start the container.
    pub runtime: String,
    /// Unique container name.
    pub name: String,
}

/// A running validator process with its captured console.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    /// Process group led by the child (unix only).
    pgid: Option<u32>,
    program: String,
    container: Option<ContainerRef>,
    capture: Option<OutputCapture>,
    finished: bool,
}

impl ProcessHandle {
    /// Spawns `command` with piped output and starts draining it.
    ///
    /// The child is killed if the handle is dropped before it exits.
    pub fn spawn(
        mut command: Command,
        program: impl Into<String>,
        container: Option<ContainerRef>,
    ) -> Result<Self, LaunchError> {
        let program = program.into();

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| LaunchError::Spawn {
            program: program.clone(),
            source,
        })?;

        let pgid = if cfg!(unix) { child.id() } else { None };
        let capture = OutputCapture::start(&mut child);

        debug!(program = %program, pid = ?child.id(), container = ?container.as_ref().map(|c| &c.name), "Validator process spawned");

        Ok(Self {
            child,
            pgid,
            program,
            container,
            capture: Some(capture),
            finished: false,
        })
    }

    /// OS process id, while the process is running.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Program that was launched (runtime binary or validator).
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Name of the backing container, if sandboxed.
    pub fn container_name(&self) -> Option<&str> {
        self.container.as_ref().map(|c| c.name.as_str())
    }

    /// Waits for the process to exit, then kills whatever is left of its
    /// process group.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        let status = self.child.wait().await?;
        self.finished = true;
        self.kill_group();
        Ok(status)
    }

    /// Sends SIGKILL to every process in the child's group.
    pub fn kill_group(&self) {
        if let Some(pgid) = self.pgid {
            kill_process_group(pgid);
        }
    }

    /// Returns everything the process wrote to stdout and stderr.
    ///
    /// Output still arriving after a short grace period (e.g. from orphaned
    /// grandchildren holding the pipe) is discarded.
    pub async fn collect_output(&mut self) -> String {
        match self.capture.take() {
            Some(capture) => capture.finish(OUTPUT_DRAIN_GRACE).await,
            None => String::new(),
        }
    }

    /// Forcibly stops the process and, if sandboxed, its container.
    pub async fn terminate(&mut self) {
        self.kill_group();
        if let Err(e) = self.child.kill().await {
            debug!(program = %self.program, error = %e, "Kill failed (process may have exited)");
        }

        if let Some(container) = &self.container {
            kill_container(container).await;
        }

        if let Some(capture) = self.capture.take() {
            capture.abort();
        }

        self.finished = true;
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.abort();
        }

        if self.finished {
            return;
        }
        self.kill_group();

        // Killing the runtime client does not stop its container.
        if let Some(container) = self.container.clone() {
            std::thread::spawn(move || {
                let _ = std::process::Command::new(&container.runtime)
                    .args(["rm", "-f", &container.name])
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status();
            });
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pgid) else {
        return;
    };

    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => debug!(pgid, "Process group killed"),
        Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid, error = %e, "Failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

async fn kill_container(container: &ContainerRef) {
    let kill = Command::new(&container.runtime)
        .args(["kill", &container.name])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match tokio::time::timeout(RUNTIME_CALL_TIMEOUT, kill).await {
        Ok(Ok(status)) if status.success() => {
            debug!(container = %container.name, "Container killed");
        }
        Ok(Ok(status)) => {
            debug!(container = %container.name, status = %status, "Container kill returned non-zero (may already be gone)");
        }
        Ok(Err(e)) => {
            warn!(container = %container.name, error = %e, "Failed to run container kill");
        }
        Err(_) => {
            warn!(container = %container.name, "Container kill timed out");
        }
    }
}

/// Console text with a retention cap.
#[derive(Debug, Default)]
struct ConsoleBuffer {
    text: String,
    truncated: bool,
}

impl ConsoleBuffer {
    fn push(&mut self, chunk: &[u8]) {
        if self.truncated {
            return;
        }

        let chunk = String::from_utf8_lossy(chunk);
        let room = MAX_CONSOLE_BYTES.saturating_sub(self.text.len());
        if chunk.len() <= room {
            self.text.push_str(&chunk);
            return;
        }

        let mut end = room;
        while end > 0 && !chunk.is_char_boundary(end) {
            end -= 1;
        }
        self.text.push_str(&chunk[..end]);
        self.text.push_str("... [truncated]");
        self.truncated = true;
    }
}

/// Background readers merging stdout and stderr line by line.
#[derive(Debug)]
struct OutputCapture {
    console: Arc<Mutex<ConsoleBuffer>>,
    readers: Vec<JoinHandle<()>>,
}

impl OutputCapture {
    fn start(child: &mut Child) -> Self {
        let console = Arc::new(Mutex::new(ConsoleBuffer::default()));
        let mut readers = Vec::with_capacity(2);

        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(drain(stdout, Arc::clone(&console))));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(drain(stderr, Arc::clone(&console))));
        }

        Self { console, readers }
    }

    async fn finish(mut self, grace: Duration) -> String {
        let readers = std::mem::take(&mut self.readers);
        let aborts: Vec<_> = readers.iter().map(|r| r.abort_handle()).collect();

        if tokio::time::timeout(grace, futures::future::join_all(readers))
            .await
            .is_err()
        {
            debug!("Output pipes still open after process exit, discarding the rest");
            for abort in aborts {
                abort.abort();
            }
        }

        let mut console = self.console.lock().await;
        std::mem::take(&mut console.text)
    }

    fn abort(&self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}

async fn drain<R>(stream: R, console: Arc<Mutex<ConsoleBuffer>>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => console.lock().await.push(&line),
            Err(e) => {
                debug!(error = %e, "Error reading validator output");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validator_paths_under_root() {
        let paths = ValidatorPaths::under(Path::new("/workspace"));
        assert_eq!(paths.schema, PathBuf::from("/workspace/input/model.ecore"));
        assert_eq!(paths.descriptor, PathBuf::from("/workspace/input/model.genmodel"));
        assert_eq!(paths.out, PathBuf::from("/workspace/output"));
    }

    #[test]
    fn test_validator_args() {
        let paths = ValidatorPaths::under(Path::new("/w"));
        let args = paths.to_args(&LaunchFlags::new(true));
        assert_eq!(
            args,
            vec![
                "--schema",
                "/w/input/model.ecore",
                "--descriptor",
                "/w/input/model.genmodel",
                "--out",
                "/w/output",
                "--extra-pass",
                "true",
            ]
        );

        let args = paths.to_args(&LaunchFlags::default());
        assert_eq!(args.last().map(String::as_str), Some("false"));
    }

    #[test]
    fn test_console_buffer_truncates() {
        let mut buffer = ConsoleBuffer::default();
        buffer.push(b"hello\n");
        assert_eq!(buffer.text, "hello\n");

        buffer.push(&vec![b'x'; MAX_CONSOLE_BYTES]);
        assert!(buffer.truncated);
        assert!(buffer.text.ends_with("... [truncated]"));
        let len = buffer.text.len();

        buffer.push(b"more");
        assert_eq!(buffer.text.len(), len);
    }

    #[test]
    fn test_console_buffer_lossy_utf8() {
        let mut buffer = ConsoleBuffer::default();
        buffer.push(&[0x66, 0x6f, 0xff, 0x6f]);
        assert!(buffer.text.starts_with("fo"));
        assert!(buffer.text.contains('\u{FFFD}'));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_captures_both_streams() {
        let mut command = Command::new("/bin/sh");
        command.args(["-c", "echo out; echo err 1>&2; exit 3"]);

        let mut handle = ProcessHandle::spawn(command, "/bin/sh", None).unwrap();
        let status = handle.wait().await.unwrap();
        let console = handle.collect_output().await;

        assert_eq!(status.code(), Some(3));
        assert!(console.contains("out\n"));
        assert!(console.contains("err\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wait_kills_background_children() {
        let temp = tempfile::TempDir::new().unwrap();
        let marker = temp.path().join("late");

        let mut command = Command::new("/bin/sh");
        command
            .arg("-c")
            .arg(format!("(sleep 1; touch '{}') & exit 0", marker.display()));

        let mut handle = ProcessHandle::spawn(command, "/bin/sh", None).unwrap();
        let status = handle.wait().await.unwrap();
        let started = std::time::Instant::now();
        handle.collect_output().await;

        assert!(status.success());
        assert!(started.elapsed() < OUTPUT_DRAIN_GRACE);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_kills_background_children() {
        let temp = tempfile::TempDir::new().unwrap();
        let marker = temp.path().join("late");

        let mut command = Command::new("/bin/sh");
        command
            .arg("-c")
            .arg(format!("(sleep 1; touch '{}') & sleep 30", marker.display()));

        let mut handle = ProcessHandle::spawn(command, "/bin/sh", None).unwrap();
        handle.terminate().await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let command = Command::new("/definitely/not/a/validator");
        let err = ProcessHandle::spawn(command, "/definitely/not/a/validator", None).unwrap_err();
        assert!(matches!(err, LaunchError::Spawn { .. }));
    }
}
