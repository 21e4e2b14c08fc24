//! Supervised process execution.
//!
//! Commands are spawned directly from their argv, never through a shell.
//! Both output streams are drained concurrently while the process runs, and
//! a wall-clock deadline kills the process if it overstays. A semaphore caps
//! how many processes run at once.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::error::ExecError;

/// How long to wait for the output pipes to close once the process is gone.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Read chunk size for output capture.
const READ_CHUNK: usize = 8 * 1024;

/// Coarse classification of a finished execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Success,
    CommandFailed,
    Timeout,
}

/// Everything observed about one process run.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// Exit code, absent when the process was ended by a signal.
    pub exit_code: Option<i32>,
    #[serde(rename = "output")]
    pub stdout: String,
    pub stderr: String,
    /// The process was killed for exceeding its deadline.
    pub timed_out: bool,
    /// Output beyond the capture limit was dropped.
    pub truncated: bool,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl ExecutionResult {
    pub fn status(&self) -> ExecutionStatus {
        if self.timed_out {
            ExecutionStatus::Timeout
        } else if self.exit_code == Some(0) {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::CommandFailed
        }
    }

    /// Human-readable exit summary.
    pub fn exit_description(&self) -> String {
        match (self.timed_out, self.exit_code) {
            (true, _) => "killed after timeout".to_string(),
            (false, Some(code)) => format!("exit code {code}"),
            (false, None) => "terminated by signal".to_string(),
        }
    }
}

/// Shared capture buffer for one output stream.
#[derive(Default)]
struct Capture {
    bytes: Vec<u8>,
    truncated: bool,
}

type SharedCapture = Arc<Mutex<Capture>>;

fn spawn_reader<R>(pipe: Option<R>, capture: SharedCapture, limit: usize) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut pipe) = pipe else {
            return;
        };
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    let mut capture = capture.lock().unwrap_or_else(PoisonError::into_inner);
                    let room = limit.saturating_sub(capture.bytes.len());
                    if n > room {
                        capture.truncated = true;
                    }
                    let keep = n.min(room);
                    capture.bytes.extend_from_slice(&chunk[..keep]);
                }
                Err(e) => {
                    debug!("Output pipe closed with error: {}", e);
                    break;
                }
            }
        }
    })
}

async fn finish_reader(handle: JoinHandle<()>) {
    let abort = handle.abort_handle();
    if tokio::time::timeout(PIPE_DRAIN_GRACE, handle).await.is_err() {
        // A grandchild may still hold the pipe open
        abort.abort();
    }
}

fn take_capture(capture: &SharedCapture) -> (String, bool) {
    let mut capture = capture.lock().unwrap_or_else(PoisonError::into_inner);
    let bytes = std::mem::take(&mut capture.bytes);
    (String::from_utf8_lossy(&bytes).into_owned(), capture.truncated)
}

/// Runs whitelisted commands inside the workspace.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    working_dir: PathBuf,
    permits: Arc<Semaphore>,
    max_output_bytes: usize,
}

impl ProcessExecutor {
    /// Create an executor running commands from `working_dir`, with at most
    /// `max_concurrent` processes alive at once.
    pub fn new(working_dir: impl AsRef<Path>, max_concurrent: usize, max_output_bytes: usize) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            max_output_bytes,
        }
    }

    /// Number of executions that could start right now without waiting.
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Spawn `tokens` and supervise it for at most `timeout`.
    ///
    /// Non-zero exits and timeouts are reported through the returned
    /// [`ExecutionResult`]; only failing to start or supervise the process is
    /// an error.
    #[instrument(skip_all, fields(program = tokens.first().map(String::as_str).unwrap_or("")))]
    pub async fn execute(
        &self,
        tokens: &[String],
        timeout: Duration,
    ) -> Result<ExecutionResult, ExecError> {
        let (program, args) = tokens.split_first().ok_or(ExecError::EmptyCommand)?;

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ExecError::internal("executor is shut down"))?;

        let started = Instant::now();
        let mut child = Command::new(program)
            .args(args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecError::Spawn {
                program: program.clone(),
                source: e,
            })?;

        let stdout = SharedCapture::default();
        let stderr = SharedCapture::default();
        let stdout_reader = spawn_reader(child.stdout.take(), stdout.clone(), self.max_output_bytes);
        let stderr_reader = spawn_reader(child.stderr.take(), stderr.clone(), self.max_output_bytes);

        let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => (status.code(), false),
            Ok(Err(e)) => {
                stdout_reader.abort();
                stderr_reader.abort();
                return Err(ExecError::internal(format!("failed to wait for process: {e}")));
            }
            Err(_) => {
                warn!("Process exceeded {:?}; killing it", timeout);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed-out process: {}", e);
                }
                (None, true)
            }
        };

        tokio::join!(finish_reader(stdout_reader), finish_reader(stderr_reader));

        let (stdout, stdout_truncated) = take_capture(&stdout);
        let (stderr, stderr_truncated) = take_capture(&stderr);

        let result = ExecutionResult {
            exit_code,
            stdout,
            stderr,
            timed_out,
            truncated: stdout_truncated || stderr_truncated,
            duration: started.elapsed(),
        };

        info!(
            "Process finished: {} in {:?}",
            result.exit_description(),
            result.duration
        );

        Ok(result)
    }
}
