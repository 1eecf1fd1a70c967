//! Command-line arguments.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::{CollisionPolicy, Settings};
use crate::domain::AuthMethod;

/// Keeps live channels recorded and files finished captures away.
#[derive(Debug, Parser)]
#[command(name = "live-keeper", version, about)]
pub struct Args {
    /// Source list (YAML).
    #[arg(long, env = "LIVE_KEEPER_CONFIG", default_value = "channellist.yaml")]
    pub config: PathBuf,

    /// Parent directory of the per-source scratch directories.
    #[arg(long, env = "LIVE_KEEPER_SCRATCH_ROOT", default_value = "scratch")]
    pub scratch_root: PathBuf,

    #[arg(long, env = "LIVE_KEEPER_LOG_DIR", default_value = "logs")]
    pub log_dir: PathBuf,

    /// Netscape cookie file passed to the capture tool.
    #[arg(long, env = "LIVE_KEEPER_COOKIES", conflicts_with = "cookies_from_browser")]
    pub cookies: Option<PathBuf>,

    /// Browser to read cookies from (e.g. `firefox`).
    #[arg(long, env = "LIVE_KEEPER_COOKIES_FROM_BROWSER")]
    pub cookies_from_browser: Option<String>,

    /// Seconds between finalizer scans.
    #[arg(long, env = "LIVE_KEEPER_FINALIZE_INTERVAL", value_parser = clap::value_parser!(u64).range(1..))]
    pub finalize_interval: Option<u64>,

    /// Do not render chat logs after moving them.
    #[arg(long, env = "LIVE_KEEPER_NO_RENDER")]
    pub no_render: bool,

    /// Chat renderer program.
    #[arg(long, env = "LIVE_KEEPER_RENDERER")]
    pub renderer: Option<PathBuf>,

    /// Option appended after the chat-log path (repeatable; comma-separated in the env var).
    #[arg(
        long = "render-arg",
        env = "LIVE_KEEPER_RENDER_ARGS",
        value_delimiter = ',',
        allow_hyphen_values = true
    )]
    pub render_args: Vec<String>,

    /// What to do when the destination already holds a file with the same name.
    #[arg(long, env = "LIVE_KEEPER_COLLISION_POLICY", value_enum)]
    pub collision_policy: Option<CollisionPolicy>,

    /// Capture tool binary.
    #[arg(long = "yt-dlp", env = "LIVE_KEEPER_YT_DLP", default_value = "yt-dlp")]
    pub yt_dlp: PathBuf,
}

impl Args {
    /// Runtime settings: defaults overridden by these arguments.
    pub fn settings(&self) -> Settings {
        let mut settings = Settings {
            config_path: self.config.clone(),
            scratch_root: self.scratch_root.clone(),
            log_dir: self.log_dir.clone(),
            ..Default::default()
        };

        settings.capture.program = self.yt_dlp.clone();
        settings.capture.auth =
            AuthMethod::from_options(self.cookies.clone(), self.cookies_from_browser.clone());

        if let Some(secs) = self.finalize_interval {
            settings.finalizer.interval = Duration::from_secs(secs);
        }
        if self.no_render {
            settings.finalizer.render.enabled = false;
        }
        if let Some(renderer) = &self.renderer {
            settings.finalizer.render.program = renderer.clone();
        }
        settings.finalizer.render.args = self.render_args.clone();
        if let Some(policy) = self.collision_policy {
            settings.finalizer.collision_policy = policy;
        }
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("live-keeper").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let settings = parse(&[]).unwrap().settings();
        assert_eq!(settings.config_path, PathBuf::from("channellist.yaml"));
        assert_eq!(settings.scratch_root, PathBuf::from("scratch"));
        assert_eq!(settings.capture.program, PathBuf::from("yt-dlp"));
        assert_eq!(settings.capture.auth, AuthMethod::None);
        assert_eq!(settings.finalizer.interval, Duration::from_secs(30));
        assert!(settings.finalizer.render.enabled);
        assert!(settings.finalizer.render.args.is_empty());
        assert_eq!(settings.finalizer.collision_policy, CollisionPolicy::Rename);
    }

    #[test]
    fn test_render_args_and_collision_policy() {
        let settings = parse(&[
            "--renderer",
            "/opt/render",
            "--render-arg",
            "--fps",
            "--render-arg=30",
            "--collision-policy",
            "fail",
        ])
        .unwrap()
        .settings();

        assert_eq!(settings.finalizer.render.program, PathBuf::from("/opt/render"));
        assert_eq!(settings.finalizer.render.args, vec!["--fps", "30"]);
        assert_eq!(settings.finalizer.collision_policy, CollisionPolicy::Fail);
    }

    #[test]
    fn test_unknown_collision_policy_rejected() {
        assert!(parse(&["--collision-policy", "overwrite"]).is_err());
    }

    #[test]
    fn test_overrides() {
        let args = parse(&[
            "--config",
            "/etc/live/channels.yaml",
            "--scratch-root",
            "/tmp/scratch",
            "--cookies-from-browser",
            "firefox",
            "--finalize-interval",
            "5",
            "--no-render",
            "--yt-dlp",
            "/opt/yt-dlp",
        ])
        .unwrap();
        let settings = args.settings();

        assert_eq!(settings.config_path, PathBuf::from("/etc/live/channels.yaml"));
        assert_eq!(settings.scratch_root, PathBuf::from("/tmp/scratch"));
        assert_eq!(settings.capture.auth, AuthMethod::Browser("firefox".into()));
        assert_eq!(settings.finalizer.interval, Duration::from_secs(5));
        assert!(!settings.finalizer.render.enabled);
        assert_eq!(settings.capture.program, PathBuf::from("/opt/yt-dlp"));
    }

    #[test]
    fn test_cookie_options_conflict() {
        assert!(parse(&["--cookies", "c.txt", "--cookies-from-browser", "firefox"]).is_err());
    }

    #[test]
    fn test_zero_finalize_interval_rejected() {
        assert!(parse(&["--finalize-interval", "0"]).is_err());
    }
}
