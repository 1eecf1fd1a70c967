//! Turns a live event into running capture processes.

use std::path::PathBuf;

use chrono::Local;

use super::command::{chat_args, media_args};
use super::probe::LiveEvent;
use crate::Result;
use crate::domain::{AuthMethod, Source};
use crate::process::{CaptureKind, ChildProcessHandle};

/// Spawns one capture child process.
///
/// The scratch directory exists by the time this is called.
pub trait CaptureLauncher: Send + Sync + 'static {
    fn launch(
        &self,
        source: &Source,
        kind: CaptureKind,
        event: &LiveEvent,
    ) -> Result<ChildProcessHandle>;
}

/// Launcher backed by the capture tool binary.
#[derive(Debug, Clone)]
pub struct YtDlpLauncher {
    program: PathBuf,
    auth: AuthMethod,
}

impl YtDlpLauncher {
    pub fn new(program: impl Into<PathBuf>, auth: AuthMethod) -> Self {
        Self {
            program: program.into(),
            auth,
        }
    }
}

impl CaptureLauncher for YtDlpLauncher {
    fn launch(
        &self,
        source: &Source,
        kind: CaptureKind,
        event: &LiveEvent,
    ) -> Result<ChildProcessHandle> {
        let args = match kind {
            CaptureKind::Media => media_args(&source.scratch_dir, &self.auth, &event.url),
            CaptureKind::Chat => chat_args(&source.scratch_dir, &self.auth, &event.url, Local::now()),
        };

        let mut command = process_utils::tokio_command(&self.program);
        command.args(args);
        ChildProcessHandle::spawn(kind, &source.name, command)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::ExitOutcome;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_launch_passes_event_url_last() {
        let temp = TempDir::new().unwrap();
        // `echo` stands in for the capture tool and exits 0.
        let launcher = YtDlpLauncher::new("echo", AuthMethod::None);
        let source = Source::new("A", temp.path().join("dest"), temp.path(), false);
        let event = LiveEvent {
            url: "https://www.youtube.com/watch?v=abc".into(),
            title: None,
            id: Some("abc".into()),
        };

        for kind in CaptureKind::ALL {
            let mut handle = launcher.launch(&source, kind, &event).unwrap();
            assert_eq!(handle.kind(), kind);
            assert_eq!(handle.exited().await, ExitOutcome::Ended);
        }
    }

    #[tokio::test]
    async fn test_launch_missing_binary_fails() {
        let temp = TempDir::new().unwrap();
        let launcher = YtDlpLauncher::new("/nonexistent/live-keeper-yt-dlp", AuthMethod::None);
        let source = Source::new("A", temp.path().join("dest"), temp.path(), false);
        let event = LiveEvent {
            url: "u".into(),
            title: None,
            id: None,
        };
        assert!(launcher.launch(&source, CaptureKind::Media, &event).is_err());
    }
}
