//! Chat-log rendering after a move.
//!
//! The renderer is an external program invoked as `<renderer> <chat.json> [args...]`.
//! Rendering never affects the moved file: failures are logged and dropped.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::config::RenderSettings;
use crate::utils::filename::is_chat_log;

/// How one render attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    Succeeded,
    /// Non-zero exit; `code` is `None` when killed by a signal.
    Failed { code: Option<i32>, last_line: Option<String> },
    /// The chat log was gone before the renderer could start.
    MissingInput,
    SpawnFailed(String),
}

impl RenderOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Launches the chat renderer for moved chat logs.
#[derive(Debug, Clone)]
pub struct RenderTrigger {
    enabled: bool,
    program: PathBuf,
    args: Vec<String>,
}

impl RenderTrigger {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            enabled: true,
            program: program.into(),
            args,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            program: PathBuf::new(),
            args: Vec::new(),
        }
    }

    pub fn from_settings(settings: &RenderSettings) -> Self {
        if settings.enabled {
            Self::new(&settings.program, settings.args.clone())
        } else {
            Self::disabled()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether a moved file should be rendered.
    pub fn qualifies(&self, path: &Path) -> bool {
        self.enabled
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(is_chat_log)
    }

    /// Run the renderer on `path` to completion and log the outcome.
    pub async fn render(&self, path: &Path) -> RenderOutcome {
        let outcome = self.run(path).await;
        match &outcome {
            RenderOutcome::Succeeded => {
                info!(path = %path.display(), "Chat render finished");
            }
            RenderOutcome::Failed { code, last_line } => {
                warn!(
                    path = %path.display(),
                    code = ?code,
                    output = last_line.as_deref().unwrap_or(""),
                    "Chat render failed"
                );
            }
            RenderOutcome::MissingInput => {
                warn!(path = %path.display(), "Chat log missing, render skipped");
            }
            RenderOutcome::SpawnFailed(e) => {
                warn!(path = %path.display(), program = %self.program.display(), error = %e, "Failed to start chat renderer");
            }
        }
        outcome
    }

    async fn run(&self, path: &Path) -> RenderOutcome {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return RenderOutcome::MissingInput;
        }

        let mut command = process_utils::tokio_command(&self.program);
        command
            .arg(path)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => return RenderOutcome::SpawnFailed(e.to_string()),
        };
        debug!(path = %path.display(), pid = ?child.id(), "Chat renderer started");

        let mut last_line = None;
        if let Some(stderr) = child.stderr.take() {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                debug!(path = %path.display(), "renderer: {}", line);
                last_line = Some(line);
            }
        }

        match child.wait().await {
            Ok(status) if status.success() => RenderOutcome::Succeeded,
            Ok(status) => RenderOutcome::Failed {
                code: status.code(),
                last_line,
            },
            Err(e) => RenderOutcome::Failed {
                code: None,
                last_line: Some(e.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_qualifies_only_chat_logs_when_enabled() {
        let trigger = RenderTrigger::new("renderer", Vec::new());
        assert!(trigger.qualifies(Path::new("/d/2024-01-01_12-00-00_abc.live_chat.json")));
        assert!(trigger.qualifies(Path::new("/d/chat.JSON")));
        assert!(!trigger.qualifies(Path::new("/d/x.mp4")));
        assert!(!trigger.qualifies(Path::new("/d/x.json.part")));

        let disabled = RenderTrigger::disabled();
        assert!(!disabled.is_enabled());
        assert!(!disabled.qualifies(Path::new("/d/chat.live_chat.json")));
    }

    #[test]
    fn test_from_settings() {
        let settings = RenderSettings {
            enabled: false,
            ..Default::default()
        };
        assert!(!RenderTrigger::from_settings(&settings).is_enabled());
        assert!(RenderTrigger::from_settings(&RenderSettings::default()).is_enabled());
    }

    #[tokio::test]
    async fn test_missing_input_is_not_spawned() {
        let temp = TempDir::new().unwrap();
        let trigger = RenderTrigger::new("/nonexistent/renderer", Vec::new());
        let outcome = trigger.render(&temp.path().join("gone.live_chat.json")).await;
        assert_eq!(outcome, RenderOutcome::MissingInput);
    }

    #[tokio::test]
    async fn test_missing_renderer_is_spawn_failure() {
        let temp = TempDir::new().unwrap();
        let chat = temp.path().join("a.live_chat.json");
        std::fs::write(&chat, b"{}").unwrap();

        let trigger = RenderTrigger::new("/nonexistent/renderer", Vec::new());
        let outcome = trigger.render(&chat).await;
        assert!(matches!(outcome, RenderOutcome::SpawnFailed(_)));
        assert!(chat.exists());
    }

    // With `sh` as the renderer, the chat log itself runs as the script.
    #[cfg(unix)]
    #[tokio::test]
    async fn test_renderer_receives_path_then_args() {
        let temp = TempDir::new().unwrap();
        let chat = temp.path().join("a.live_chat.json");
        std::fs::write(&chat, r#"printf '%s\n' "$0" "$1" > "$2""#).unwrap();
        let record = temp.path().join("args.txt");

        let trigger = RenderTrigger::new(
            "sh",
            vec!["--fast".to_string(), record.to_string_lossy().into_owned()],
        );
        let outcome = trigger.render(&chat).await;
        assert!(outcome.is_success());

        let recorded = std::fs::read_to_string(&record).unwrap();
        assert_eq!(recorded, format!("{}\n--fast\n", chat.display()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_failure_and_keeps_file() {
        let temp = TempDir::new().unwrap();
        let chat = temp.path().join("a.live_chat.json");
        std::fs::write(&chat, "echo 'bad chat log' >&2; exit 3").unwrap();

        let outcome = RenderTrigger::new("sh", Vec::new()).render(&chat).await;
        assert_eq!(
            outcome,
            RenderOutcome::Failed {
                code: Some(3),
                last_line: Some("bad chat log".to_string()),
            }
        );
        assert!(chat.exists());
    }
}
