//! Handle over one spawned capture child process.

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use process_utils::TerminateRequest;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{Error, Result};

/// Which capture a child process performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureKind {
    Media,
    Chat,
}

impl CaptureKind {
    pub const ALL: [CaptureKind; 2] = [CaptureKind::Media, CaptureKind::Chat];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Media => "media",
            Self::Chat => "chat",
        }
    }
}

impl fmt::Display for CaptureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a capture child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ExitOutcome {
    /// Exit code 0: the stream ended normally.
    Ended,
    /// Any other exit the supervisor did not ask for. `code` is `None` when
    /// the process died by a signal or could not be waited on.
    Crashed { code: Option<i32> },
    /// The supervisor asked the process to stop.
    Stopped,
}

impl ExitOutcome {
    fn classify(code: Option<i32>, stop_requested: bool) -> Self {
        match code {
            _ if stop_requested => Self::Stopped,
            Some(0) => Self::Ended,
            code => Self::Crashed { code },
        }
    }

    pub fn is_crash(&self) -> bool {
        matches!(self, Self::Crashed { .. })
    }
}

/// Owns one capture child process through a waiter task.
///
/// The waiter task holds the [`Child`] and reports its exit code through a
/// oneshot channel, so exits can be observed in a `select!` without blocking
/// and without racing the poll deadline.
pub struct ChildProcessHandle {
    kind: CaptureKind,
    pid: Option<u32>,
    started_at: Instant,
    exit_rx: oneshot::Receiver<Option<i32>>,
    kill_token: CancellationToken,
    stop_requested: bool,
    outcome: Option<ExitOutcome>,
}

impl fmt::Debug for ChildProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildProcessHandle")
            .field("kind", &self.kind)
            .field("pid", &self.pid)
            .field("stop_requested", &self.stop_requested)
            .field("outcome", &self.outcome)
            .finish()
    }
}

impl ChildProcessHandle {
    /// Spawn `command` and start watching it.
    ///
    /// stdout/stderr lines are forwarded to the log at debug level, tagged
    /// with `source` and the capture kind.
    pub fn spawn(kind: CaptureKind, source: &str, mut command: Command) -> Result<Self> {
        let program = command.as_std().get_program().to_string_lossy().into_owned();
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| Error::spawn(&program, e))?;
        let pid = child.id();

        if let Some(stdout) = child.stdout.take() {
            forward_output(stdout, source.to_string(), kind, "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(stderr, source.to_string(), kind, "stderr");
        }

        let kill_token = CancellationToken::new();
        let exit_rx = spawn_process_waiter(child, kill_token.clone());

        debug!(source = %source, kind = %kind, pid = ?pid, program = %program, "Spawned capture process");

        Ok(Self {
            kind,
            pid,
            started_at: Instant::now(),
            exit_rx,
            kill_token,
            stop_requested: false,
            outcome: None,
        })
    }

    pub fn kind(&self) -> CaptureKind {
        self.kind
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Time since spawn.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Last observed exit outcome, if the process has exited.
    pub fn outcome(&self) -> Option<ExitOutcome> {
        self.outcome
    }

    /// Non-blocking liveness check.
    pub fn is_alive(&mut self) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        match self.exit_rx.try_recv() {
            Ok(code) => {
                self.record_exit(code);
                false
            }
            Err(oneshot::error::TryRecvError::Empty) => true,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.record_exit(None);
                false
            }
        }
    }

    /// Wait for the process to exit.
    ///
    /// Cancel safe: dropping the future before completion loses nothing.
    pub async fn exited(&mut self) -> ExitOutcome {
        if let Some(outcome) = self.outcome {
            return outcome;
        }
        let code = (&mut self.exit_rx).await.unwrap_or(None);
        self.record_exit(code)
    }

    /// Ask the process to stop, escalating to a forced kill after `kill_timeout`.
    pub async fn terminate(&mut self, kill_timeout: Duration) -> ExitOutcome {
        if let Some(outcome) = self.outcome {
            return outcome;
        }
        self.stop_requested = true;

        let request = match self.pid {
            Some(pid) => process_utils::request_terminate(pid),
            None => Ok(TerminateRequest::AlreadyGone),
        };

        match request {
            Ok(TerminateRequest::Delivered) => {
                if let Ok(outcome) = tokio::time::timeout(kill_timeout, self.exited()).await {
                    return outcome;
                }
                warn!(
                    kind = %self.kind,
                    pid = ?self.pid,
                    timeout_secs = kill_timeout.as_secs_f64(),
                    "Capture process ignored termination request, killing"
                );
            }
            Ok(TerminateRequest::AlreadyGone) => {}
            Ok(TerminateRequest::Unsupported) => {}
            Err(e) => {
                warn!(kind = %self.kind, pid = ?self.pid, error = %e, "Termination request failed, killing");
            }
        }

        self.kill_token.cancel();
        self.exited().await
    }

    fn record_exit(&mut self, code: Option<i32>) -> ExitOutcome {
        let outcome = ExitOutcome::classify(code, self.stop_requested);
        self.outcome = Some(outcome);
        outcome
    }
}

impl Drop for ChildProcessHandle {
    fn drop(&mut self) {
        // A handle is only dropped once the attempt is over; never leak the child.
        if self.outcome.is_none() {
            self.kill_token.cancel();
        }
    }
}

/// Wait for `child` on a separate task and report its exit code.
///
/// Cancelling `kill_token` kills the process; the code reported is then
/// whatever the killed process returns (`None` for a signal on unix).
fn spawn_process_waiter(
    mut child: Child,
    kill_token: CancellationToken,
) -> oneshot::Receiver<Option<i32>> {
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            _ = kill_token.cancelled() => {
                if let Err(e) = child.start_kill() {
                    error!(error = %e, "Failed to kill capture process");
                }
                child.wait().await
            }
        };

        let code = match status {
            Ok(status) => status.code(),
            Err(e) => {
                error!(error = %e, "Error waiting for capture process");
                None
            }
        };
        let _ = tx.send(code);
    });

    rx
}

fn forward_output<R>(reader: R, source: String, kind: CaptureKind, stream: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => debug!(source = %source, kind = %kind, stream, "{}", line),
                Ok(None) => break,
                Err(e) => {
                    debug!(source = %source, kind = %kind, stream, error = %e, "Output stream closed");
                    break;
                }
            }
        }
    });
}
