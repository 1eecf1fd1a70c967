//! Capture tool command lines.

use std::ffi::OsString;
use std::path::Path;

use chrono::{DateTime, Local};

use crate::domain::AuthMethod;

/// Output template for media captures, relative to the scratch directory.
pub const MEDIA_OUTPUT_TEMPLATE: &str = "%(title)s [%(id)s].%(ext)s";

/// Arguments for the media capture: the whole live window from its start.
pub fn media_args(scratch_dir: &Path, auth: &AuthMethod, url: &str) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--live-from-start".into(),
        "--no-progress".into(),
        "-o".into(),
        scratch_dir.join(MEDIA_OUTPUT_TEMPLATE).into_os_string(),
    ];
    args.extend(auth.args());
    args.push(url.into());
    args
}

/// Arguments for the chat capture.
///
/// The output name carries the local start time so consecutive captures of
/// the same event never share a file.
pub fn chat_args(
    scratch_dir: &Path,
    auth: &AuthMethod,
    url: &str,
    started: DateTime<Local>,
) -> Vec<OsString> {
    let template = format!("{}_%(id)s.%(ext)s", started.format("%Y-%m-%d_%H-%M-%S"));
    let mut args: Vec<OsString> = vec![
        "--skip-download".into(),
        "--write-subs".into(),
        "--sub-langs".into(),
        "live_chat".into(),
        "--sub-format".into(),
        "json3".into(),
        "-o".into(),
        scratch_dir.join(template).into_os_string(),
    ];
    args.extend(auth.args());
    args.push(url.into());
    args
}

/// Arguments for the metadata-only status probe.
pub fn probe_args(auth: &AuthMethod, url: &str) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--dump-single-json".into(),
        "--skip-download".into(),
        "--no-warnings".into(),
    ];
    args.extend(auth.args());
    args.push(url.into());
    args
}

/// Arguments for listing a channel's streams tab without resolving each entry.
pub fn streams_probe_args(auth: &AuthMethod, url: &str) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["--flat-playlist".into()];
    args.extend(probe_args(auth, url));
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_media_args() {
        let args = media_args(
            Path::new("/scratch/A"),
            &AuthMethod::None,
            "https://www.youtube.com/watch?v=abc",
        );
        assert_eq!(
            strings(&args),
            vec![
                "--live-from-start",
                "--no-progress",
                "-o",
                "/scratch/A/%(title)s [%(id)s].%(ext)s",
                "https://www.youtube.com/watch?v=abc",
            ]
        );
    }

    #[test]
    fn test_chat_args_with_browser_auth() {
        let started = Local.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        let args = chat_args(
            Path::new("/scratch/A"),
            &AuthMethod::Browser("firefox".into()),
            "https://www.youtube.com/watch?v=abc",
            started,
        );
        assert_eq!(
            strings(&args),
            vec![
                "--skip-download",
                "--write-subs",
                "--sub-langs",
                "live_chat",
                "--sub-format",
                "json3",
                "-o",
                "/scratch/A/2024-05-06_07-08-09_%(id)s.%(ext)s",
                "--cookies-from-browser",
                "firefox",
                "https://www.youtube.com/watch?v=abc",
            ]
        );
    }

    #[test]
    fn test_probe_args_with_cookie_file() {
        let args = probe_args(
            &AuthMethod::CookieFile("/etc/cookies.txt".into()),
            "https://www.youtube.com/@A/live",
        );
        assert_eq!(
            strings(&args),
            vec![
                "--dump-single-json",
                "--skip-download",
                "--no-warnings",
                "--cookies",
                "/etc/cookies.txt",
                "https://www.youtube.com/@A/live",
            ]
        );
    }

    #[test]
    fn test_streams_probe_args() {
        let args = streams_probe_args(&AuthMethod::None, "https://www.youtube.com/@A/streams");
        assert_eq!(
            strings(&args),
            vec![
                "--flat-playlist",
                "--dump-single-json",
                "--skip-download",
                "--no-warnings",
                "https://www.youtube.com/@A/streams",
            ]
        );
    }
}
