//! Runtime settings.
//!
//! Everything here is assembled once at startup from CLI flags and
//! environment variables; only the source list is reloaded at runtime.

use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;

use crate::domain::{AuthMethod, RetryPolicy};

/// What to do when the destination already holds a file with the same name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum CollisionPolicy {
    /// Pick the first free `<stem> (n).<ext>` name.
    #[default]
    Rename,
    /// Leave the file in scratch and retry on every tick.
    Fail,
}

/// Adaptive polling cadence.
#[derive(Debug, Clone, PartialEq)]
pub struct PollSettings {
    /// Interval while nothing is scheduled.
    pub slow_interval: Duration,
    /// Interval while an event is imminent.
    pub fast_interval: Duration,
    /// Upcoming events starting within this window switch to fast polling.
    pub schedule_threshold: Duration,
    /// How long a scheduled event may stay pending past its start before
    /// the source falls back to slow polling.
    pub scheduled_timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            slow_interval: Duration::from_secs(300),
            fast_interval: Duration::from_secs(15),
            schedule_threshold: Duration::from_secs(30 * 60),
            scheduled_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Capture child-process settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    /// Capture tool binary.
    pub program: PathBuf,
    pub auth: AuthMethod,
    pub retry: RetryPolicy,
    /// Uninterrupted capture time after which a crash no longer counts as consecutive.
    pub stable_after: Duration,
    /// Grace period between the polite termination request and a forced kill.
    pub kill_timeout: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            program: PathBuf::from("yt-dlp"),
            auth: AuthMethod::None,
            retry: RetryPolicy::default(),
            stable_after: Duration::from_secs(5 * 60),
            kill_timeout: Duration::from_secs(5),
        }
    }
}

/// External chat renderer invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub enabled: bool,
    pub program: PathBuf,
    /// Fixed options appended after the chat-log path.
    pub args: Vec<String>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            program: PathBuf::from("yt-chat-to-video"),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinalizerSettings {
    /// Time between scratch scans.
    pub interval: Duration,
    pub collision_policy: CollisionPolicy,
    /// Repeated move failures for one path within this window log at debug.
    pub error_log_interval: Duration,
    pub render: RenderSettings,
}

impl Default for FinalizerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            collision_policy: CollisionPolicy::Rename,
            error_log_interval: Duration::from_secs(10 * 60),
            render: RenderSettings::default(),
        }
    }
}

/// Complete runtime settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Source list file.
    pub config_path: PathBuf,
    /// Parent of every per-source scratch directory.
    pub scratch_root: PathBuf,
    pub log_dir: PathBuf,
    /// How often the source list file is re-read.
    pub config_reload_interval: Duration,
    /// Upper bound on graceful shutdown before remaining tasks are aborted.
    pub shutdown_timeout: Duration,
    pub poll: PollSettings,
    pub capture: CaptureSettings,
    pub finalizer: FinalizerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("channellist.yaml"),
            scratch_root: PathBuf::from("scratch"),
            log_dir: PathBuf::from("logs"),
            config_reload_interval: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(30),
            poll: PollSettings::default(),
            capture: CaptureSettings::default(),
            finalizer: FinalizerSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.poll.slow_interval, Duration::from_secs(300));
        assert_eq!(settings.poll.fast_interval, Duration::from_secs(15));
        assert_eq!(settings.capture.kill_timeout, Duration::from_secs(5));
        assert_eq!(settings.finalizer.interval, Duration::from_secs(30));
        assert_eq!(settings.finalizer.collision_policy, CollisionPolicy::Rename);
        assert!(settings.finalizer.render.enabled);
    }

    #[test]
    fn test_collision_policy_names() {
        assert_eq!(
            CollisionPolicy::from_str("fail", true).unwrap(),
            CollisionPolicy::Fail
        );
        let names: Vec<_> = CollisionPolicy::value_variants()
            .iter()
            .filter_map(|p| p.to_possible_value())
            .map(|v| v.get_name().to_string())
            .collect();
        assert_eq!(names, vec!["rename", "fail"]);
    }
}
