//! Status probe: is a source live, scheduled, or idle?
//!
//! The production probe runs the capture tool in metadata-only mode against
//! the channel's `/live` page and interprets its JSON output or error text.
//! When `/live` reports nothing, the `/streams` tab is listed for a scheduled
//! event that `/live` does not point at yet.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use super::command::{probe_args, streams_probe_args};
use crate::domain::{AuthMethod, Source};

/// Upper bound on one probe invocation.
const PROBE_TIMEOUT: Duration = Duration::from_secs(90);

static BEGINS_IN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:will begin|premieres)\s+in\s+(\d+)\s+(second|minute|hour|day)s?")
        .expect("begins-in regex is valid")
});

/// A live event ready to be captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveEvent {
    /// Page handed to the capture tool.
    pub url: String,
    pub title: Option<String>,
    pub id: Option<String>,
}

/// Result of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveStatus {
    /// Nothing live or scheduled.
    None,
    /// An event is scheduled to start at the given time.
    Upcoming { starts_at: DateTime<Utc> },
    Live(LiveEvent),
}

/// Error type for probe operations.
#[derive(Debug, Clone)]
pub struct CheckError {
    pub message: String,
    /// Whether retrying later may succeed.
    pub transient: bool,
}

impl CheckError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }
}

impl std::fmt::Display for CheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CheckError {}

impl From<crate::Error> for CheckError {
    fn from(err: crate::Error) -> Self {
        CheckError::transient(err.to_string())
    }
}

/// Queries the current status of a source.
#[async_trait]
pub trait StatusProbe: Send + Sync + 'static {
    async fn probe(&self, source: &Source) -> Result<LiveStatus, CheckError>;
}

/// Subset of the capture tool's JSON metadata used here.
#[derive(Debug, Default, Deserialize)]
struct ProbeInfo {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    webpage_url: Option<String>,
    #[serde(default)]
    is_live: Option<bool>,
    #[serde(default)]
    live_status: Option<String>,
    #[serde(default)]
    release_timestamp: Option<i64>,
    #[serde(default)]
    entries: Vec<ProbeInfo>,
}

impl ProbeInfo {
    fn is_live(&self) -> bool {
        self.is_live == Some(true) || self.live_status.as_deref() == Some("is_live")
    }

    fn upcoming_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let starts_at = DateTime::from_timestamp(self.release_timestamp?, 0)?;
        let flagged = self.live_status.as_deref() == Some("is_upcoming");
        (flagged || starts_at > now).then_some(starts_at)
    }
}

/// Interpret successful probe output.
pub fn parse_probe_json(
    json: &str,
    fallback_url: &str,
    now: DateTime<Utc>,
) -> Result<LiveStatus, CheckError> {
    let info: ProbeInfo = serde_json::from_str(json)
        .map_err(|e| CheckError::transient(format!("invalid probe output: {e}")))?;

    if info.is_live() {
        return Ok(LiveStatus::Live(LiveEvent {
            url: info.webpage_url.unwrap_or_else(|| fallback_url.to_string()),
            title: info.title,
            id: info.id,
        }));
    }

    if let Some(starts_at) = info.upcoming_at(now) {
        return Ok(LiveStatus::Upcoming { starts_at });
    }

    // A channel tab listing: the earliest scheduled entry wins.
    let upcoming = info
        .entries
        .iter()
        .filter_map(|entry| entry.upcoming_at(now))
        .min();
    Ok(upcoming.map_or(LiveStatus::None, |starts_at| LiveStatus::Upcoming { starts_at }))
}

/// Interpret a failed probe from its error text.
///
/// "Not live" and "will begin" failures are statuses, anything else is an error.
pub fn parse_probe_failure(stderr: &str, now: DateTime<Utc>) -> Result<LiveStatus, CheckError> {
    let lower = stderr.to_lowercase();

    if let Some(caps) = BEGINS_IN.captures(&lower) {
        let amount: i64 = caps[1].parse().unwrap_or(0);
        let unit = match &caps[2] {
            "second" => 1,
            "minute" => 60,
            "hour" => 60 * 60,
            _ => 24 * 60 * 60,
        };
        let starts_at = now + chrono::Duration::seconds(amount.saturating_mul(unit));
        return Ok(LiveStatus::Upcoming { starts_at });
    }

    if lower.contains("this live event will begin")
        || lower.contains("not currently live")
        || lower.contains("premieres in")
    {
        return Ok(LiveStatus::None);
    }

    let message = stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("probe failed without output")
        .trim()
        .to_string();
    Err(CheckError::transient(message))
}

/// Probe backed by the capture tool binary.
#[derive(Debug, Clone)]
pub struct YtDlpProbe {
    program: PathBuf,
    auth: AuthMethod,
}

impl YtDlpProbe {
    pub fn new(program: impl Into<PathBuf>, auth: AuthMethod) -> Self {
        Self {
            program: program.into(),
            auth,
        }
    }

    async fn run(&self, args: Vec<OsString>, url: &str) -> Result<LiveStatus, CheckError> {
        let mut command = process_utils::tokio_command(&self.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = tokio::time::timeout(PROBE_TIMEOUT, command.output())
            .await
            .map_err(|_| CheckError::transient(format!("probe timed out after {PROBE_TIMEOUT:?}")))?
            .map_err(|e| {
                CheckError::permanent(format!("failed to run {}: {e}", self.program.display()))
            })?;

        let now = Utc::now();
        if output.status.success() {
            parse_probe_json(&String::from_utf8_lossy(&output.stdout), url, now)
        } else {
            parse_probe_failure(&String::from_utf8_lossy(&output.stderr), now)
        }
    }
}

#[async_trait]
impl StatusProbe for YtDlpProbe {
    async fn probe(&self, source: &Source) -> Result<LiveStatus, CheckError> {
        let live_url = source.live_url();
        let status = self.run(probe_args(&self.auth, &live_url), &live_url).await?;
        if status != LiveStatus::None {
            return Ok(status);
        }

        // Only scheduled entries count here; a failed listing means nothing scheduled.
        let streams_url = source.streams_url();
        match self
            .run(streams_probe_args(&self.auth, &streams_url), &streams_url)
            .await
        {
            Ok(status @ LiveStatus::Upcoming { .. }) => Ok(status),
            Ok(_) => Ok(LiveStatus::None),
            Err(e) => {
                debug!(source = %source.name, error = %e, "Streams tab listing failed");
                Ok(LiveStatus::None)
            }
        }
    }
}
