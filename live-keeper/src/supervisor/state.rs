//! Per-source supervisor state.
//!
//! Pure bookkeeping: phase, poll cadence, crash counting and scheduling
//! deadlines. The actor in [`super::channel`] owns one of these and is the
//! only thing that mutates it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::capture::LiveEvent;
use crate::config::PollSettings;
use crate::domain::RetryPolicy;
use crate::process::{CaptureKind, ChildProcessHandle};

/// Supervisor phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Nothing running; slow polling.
    Idle,
    /// An event starts soon; fast polling.
    Scheduled,
    /// Capture processes are running.
    Capturing,
    /// Waiting to respawn a crashed capture.
    Backoff,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Scheduled => "scheduled",
            Phase::Capturing => "capturing",
            Phase::Backoff => "backoff",
        };
        f.write_str(s)
    }
}

/// What to do about a crashed capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashDecision {
    /// Respawn after `delay`; `crash` is the consecutive crash number.
    Respawn { delay: Duration, crash: u32 },
    /// Retries exhausted; stop capturing this kind for the current event.
    Abandon { crash: u32 },
}

/// Pending event schedule while in [`Phase::Scheduled`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Schedule {
    starts_at: DateTime<Utc>,
    entered_at: DateTime<Utc>,
}

/// Mutable state of one supervised source.
#[derive(Debug)]
pub struct SourceState {
    pub phase: Phase,
    pub poll_interval: Duration,
    /// Next status probe, when polling.
    pub next_check: Option<Instant>,
    pub media: Option<ChildProcessHandle>,
    pub chat: Option<ChildProcessHandle>,
    /// Consecutive crashes in the current capture attempt.
    pub crash_count: u32,
    /// Event being captured.
    pub event: Option<LiveEvent>,
    /// Kinds waiting to be respawned and when.
    pub respawn_at: Option<Instant>,
    pending_respawn: Vec<CaptureKind>,
    schedule: Option<Schedule>,
    /// Polling has stopped; waiting for running captures to finish.
    pub stopping: bool,
    pub total_spawns: u64,
    pub total_crashes: u64,
}

impl SourceState {
    pub fn new(poll: &PollSettings) -> Self {
        Self {
            phase: Phase::Idle,
            poll_interval: poll.slow_interval,
            next_check: None,
            media: None,
            chat: None,
            crash_count: 0,
            event: None,
            respawn_at: None,
            pending_respawn: Vec::new(),
            schedule: None,
            stopping: false,
            total_spawns: 0,
            total_crashes: 0,
        }
    }

    /// Schedule the next probe one poll interval from now.
    pub fn schedule_next_check(&mut self) {
        self.next_check = Some(Instant::now() + self.poll_interval);
    }

    /// Probe right away.
    pub fn check_now(&mut self) {
        self.next_check = Some(Instant::now());
    }

    /// The earliest deadline the actor must wake up for.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.stopping {
            return None;
        }
        match self.phase {
            Phase::Idle | Phase::Scheduled => self.next_check,
            Phase::Backoff => self.respawn_at,
            Phase::Capturing => None,
        }
    }

    pub fn enter_idle(&mut self, poll: &PollSettings) {
        self.phase = Phase::Idle;
        self.poll_interval = poll.slow_interval;
        self.schedule = None;
        self.event = None;
        self.respawn_at = None;
        self.pending_respawn.clear();
        self.schedule_next_check();
    }

    /// Enter or stay in [`Phase::Scheduled`] for an event at `starts_at`.
    pub fn enter_scheduled(&mut self, starts_at: DateTime<Utc>, now: DateTime<Utc>, poll: &PollSettings) {
        let entered_at = match self.schedule {
            Some(s) if self.phase == Phase::Scheduled => s.entered_at,
            _ => now,
        };
        self.phase = Phase::Scheduled;
        self.poll_interval = poll.fast_interval;
        self.schedule = Some(Schedule {
            starts_at,
            entered_at,
        });
        self.schedule_next_check();
    }

    /// Scheduled for longer than `timeout` past the later of entry and start time.
    pub fn scheduled_timed_out(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let Some(schedule) = self.schedule else {
            return false;
        };
        let anchor = schedule.starts_at.max(schedule.entered_at);
        chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|timeout| anchor.checked_add_signed(timeout))
            .is_some_and(|deadline| now > deadline)
    }

    pub fn scheduled_start(&self) -> Option<DateTime<Utc>> {
        self.schedule.map(|s| s.starts_at)
    }

    /// Start capturing `event`.
    pub fn enter_capturing(&mut self, event: LiveEvent) {
        self.phase = Phase::Capturing;
        self.schedule = None;
        self.next_check = None;
        self.event = Some(event);
    }

    pub fn handle_mut(&mut self, kind: CaptureKind) -> &mut Option<ChildProcessHandle> {
        match kind {
            CaptureKind::Media => &mut self.media,
            CaptureKind::Chat => &mut self.chat,
        }
    }

    pub fn handle(&self, kind: CaptureKind) -> Option<&ChildProcessHandle> {
        match kind {
            CaptureKind::Media => self.media.as_ref(),
            CaptureKind::Chat => self.chat.as_ref(),
        }
    }

    pub fn running_count(&self) -> usize {
        usize::from(self.media.is_some()) + usize::from(self.chat.is_some())
    }

    pub fn pending_respawn(&self) -> &[CaptureKind] {
        &self.pending_respawn
    }

    /// Nothing running and nothing waiting to be respawned.
    pub fn capture_finished(&self) -> bool {
        self.running_count() == 0 && self.pending_respawn.is_empty()
    }

    /// Count a crash of a process that ran for `uptime` and decide what to do.
    ///
    /// A crash after at least `stable_after` of uninterrupted capture starts a
    /// fresh count.
    pub fn record_crash(
        &mut self,
        uptime: Duration,
        stable_after: Duration,
        retry: &RetryPolicy,
    ) -> CrashDecision {
        if uptime >= stable_after {
            self.crash_count = 0;
        }
        self.crash_count = self.crash_count.saturating_add(1);
        self.total_crashes += 1;

        if retry.should_retry(self.crash_count) {
            CrashDecision::Respawn {
                delay: retry.delay_for_crash(self.crash_count),
                crash: self.crash_count,
            }
        } else {
            CrashDecision::Abandon {
                crash: self.crash_count,
            }
        }
    }

    /// Queue `kind` for respawn after `delay` and enter [`Phase::Backoff`].
    ///
    /// With several kinds pending, the latest deadline wins so that no
    /// respawn happens earlier than its own backoff.
    pub fn schedule_respawn(&mut self, kind: CaptureKind, delay: Duration) {
        if !self.pending_respawn.contains(&kind) {
            self.pending_respawn.push(kind);
        }
        let at = Instant::now() + delay;
        self.respawn_at = Some(self.respawn_at.map_or(at, |current| current.max(at)));
        self.phase = Phase::Backoff;
    }

    /// Take the kinds due for respawn and leave [`Phase::Backoff`].
    pub fn take_pending_respawn(&mut self) -> Vec<CaptureKind> {
        self.respawn_at = None;
        if self.phase == Phase::Backoff {
            self.phase = Phase::Capturing;
        }
        std::mem::take(&mut self.pending_respawn)
    }

    /// Stop polling; running captures may finish on their own.
    pub fn begin_stopping(&mut self) {
        self.stopping = true;
        self.next_check = None;
        self.respawn_at = None;
        self.pending_respawn.clear();
        if self.phase == Phase::Backoff {
            self.phase = Phase::Capturing;
        }
    }

    pub fn snapshot(&self, name: &str) -> SourceSnapshot {
        let now = Instant::now();
        SourceSnapshot {
            name: name.to_string(),
            phase: self.phase,
            poll_interval: self.poll_interval,
            next_check_in: self
                .next_check
                .map(|at| at.saturating_duration_since(now)),
            media_pid: self.media.as_ref().and_then(ChildProcessHandle::pid),
            chat_pid: self.chat.as_ref().and_then(ChildProcessHandle::pid),
            crash_count: self.crash_count,
            pending_respawn: self.pending_respawn.clone(),
            scheduled_start: self.scheduled_start(),
            event_url: self.event.as_ref().map(|e| e.url.clone()),
            stopping: self.stopping,
            total_spawns: self.total_spawns,
            total_crashes: self.total_crashes,
        }
    }
}

/// Point-in-time copy of a supervisor's state, handed out through its mailbox.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSnapshot {
    pub name: String,
    pub phase: Phase,
    pub poll_interval: Duration,
    pub next_check_in: Option<Duration>,
    pub media_pid: Option<u32>,
    pub chat_pid: Option<u32>,
    pub crash_count: u32,
    pub pending_respawn: Vec<CaptureKind>,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub event_url: Option<String>,
    pub stopping: bool,
    pub total_spawns: u64,
    pub total_crashes: u64,
}

impl SourceSnapshot {
    pub fn running_count(&self) -> usize {
        usize::from(self.media_pid.is_some()) + usize::from(self.chat_pid.is_some())
    }
}
