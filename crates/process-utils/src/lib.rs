//! Small process-related helpers shared across the workspace.
//!
//! Child processes spawned by the capture supervisors must not pop up console
//! windows on Windows, and must be asked to stop politely before being killed.

use std::ffi::OsStr;
use std::io;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
///
/// The child is killed if its handle is dropped without being reaped.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd.kill_on_drop(true);
    cmd
}

/// Outcome of a polite termination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateRequest {
    /// The signal was delivered; the process may still take a while to exit.
    Delivered,
    /// The process no longer exists.
    AlreadyGone,
    /// The platform has no polite termination signal; escalate to a kill.
    Unsupported,
}

/// Ask a process to terminate gracefully.
///
/// On unix this sends `SIGTERM`. Elsewhere it returns
/// [`TerminateRequest::Unsupported`] and callers should fall back to a forced kill.
pub fn request_terminate(pid: u32) -> io::Result<TerminateRequest> {
    #[cfg(unix)]
    {
        let pid: libc::pid_t = pid
            .try_into()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;

        // SAFETY: `kill` has no memory-safety preconditions; a stale pid only yields ESRCH.
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc == 0 {
            return Ok(TerminateRequest::Delivered);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(TerminateRequest::AlreadyGone);
        }
        Err(err)
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        Ok(TerminateRequest::Unsupported)
    }
}
