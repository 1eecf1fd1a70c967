//! The per-source supervisor actor.
//!
//! One `ChannelSupervisor` runs per configured source. It polls the source's
//! status on an adaptive cadence, spawns one media and one chat capture when
//! the source goes live, and restarts crashed captures with bounded backoff.
//!
//! # State machine
//!
//! ```text
//! Idle --upcoming soon--> Scheduled --live--> Capturing --crash--> Backoff
//!  ^                         |                   |                    |
//!  +------none / timeout-----+                   |      respawn       |
//!  +-------------both captures retired-----------+<-------------------+
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handle::{DEFAULT_MAILBOX_CAPACITY, SupervisorHandle};
use super::messages::{ActorError, ActorOutcome, ActorResult, SupervisorMessage};
use super::state::{CrashDecision, Phase, SourceState};
use crate::capture::{CaptureLauncher, LiveEvent, LiveStatus, StatusProbe};
use crate::config::{PollSettings, Settings};
use crate::domain::{RetryPolicy, Source};
use crate::process::{CaptureKind, ChildProcessHandle, ExitOutcome};
use crate::utils::fs::ensure_dir_all_with_op;

/// Timing and retry configuration shared by every supervisor.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    pub poll: PollSettings,
    pub retry: RetryPolicy,
    /// Uninterrupted capture time after which the crash counter starts over.
    pub stable_after: Duration,
    /// Grace period before a terminated capture is killed.
    pub kill_timeout: Duration,
}

impl SupervisorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            poll: settings.poll.clone(),
            retry: settings.capture.retry.clone(),
            stable_after: settings.capture.stable_after,
            kill_timeout: settings.capture.kill_timeout,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Supervises the captures of one source.
pub struct ChannelSupervisor {
    source: Source,
    config: SupervisorConfig,
    probe: Arc<dyn StatusProbe>,
    launcher: Arc<dyn CaptureLauncher>,
    state: SourceState,
    mailbox: mpsc::Receiver<SupervisorMessage>,
    mailbox_closed: bool,
    cancellation_token: CancellationToken,
}

impl ChannelSupervisor {
    /// Create a supervisor and the handle used to talk to it.
    pub fn new(
        source: Source,
        config: SupervisorConfig,
        probe: Arc<dyn StatusProbe>,
        launcher: Arc<dyn CaptureLauncher>,
        cancellation_token: CancellationToken,
    ) -> (Self, SupervisorHandle) {
        let (tx, rx) = mpsc::channel(DEFAULT_MAILBOX_CAPACITY);
        let handle = SupervisorHandle::new(tx, cancellation_token.clone(), source.clone());
        let state = SourceState::new(&config.poll);

        let supervisor = Self {
            source,
            config,
            probe,
            launcher,
            state,
            mailbox: rx,
            mailbox_closed: false,
            cancellation_token,
        };
        (supervisor, handle)
    }

    pub fn name(&self) -> &str {
        &self.source.name
    }

    /// Run until stopped or cancelled.
    pub async fn run(mut self) -> ActorResult {
        info!(source = %self.source.name, "Supervisor starting");

        ensure_dir_all_with_op("creating scratch directory", &self.source.scratch_dir)
            .await
            .map_err(ActorError::from)?;
        if let Err(e) =
            ensure_dir_all_with_op("creating destination directory", &self.source.destination).await
        {
            warn!(source = %self.source.name, error = %e, "Destination directory unavailable");
        }

        self.state.check_now();

        loop {
            let deadline = self.state.next_deadline();

            tokio::select! {
                biased;

                _ = self.cancellation_token.cancelled() => {
                    self.terminate_all().await;
                    info!(source = %self.source.name, "Supervisor cancelled");
                    return Ok(ActorOutcome::Cancelled);
                }

                msg = self.mailbox.recv(), if !self.mailbox_closed => {
                    if self.handle_message(msg).await {
                        info!(source = %self.source.name, "Supervisor stopped");
                        return Ok(ActorOutcome::Stopped);
                    }
                }

                outcome = wait_exit(&mut self.state.media) => {
                    self.on_exit(CaptureKind::Media, outcome);
                }

                outcome = wait_exit(&mut self.state.chat) => {
                    self.on_exit(CaptureKind::Chat, outcome);
                }

                _ = sleep_until_opt(deadline) => {
                    self.on_deadline().await;
                }
            }

            if self.state.stopping && self.state.running_count() == 0 {
                info!(source = %self.source.name, "Captures finished, supervisor stopped");
                return Ok(ActorOutcome::Stopped);
            }
        }
    }

    /// Returns `true` when the supervisor should exit right away.
    async fn handle_message(&mut self, msg: Option<SupervisorMessage>) -> bool {
        match msg {
            Some(SupervisorMessage::GetState(reply)) => {
                let _ = reply.send(self.state.snapshot(&self.source.name));
                false
            }
            Some(SupervisorMessage::Stop { force: true }) => {
                debug!(source = %self.source.name, "Force stop requested");
                self.terminate_all().await;
                true
            }
            Some(SupervisorMessage::Stop { force: false }) => {
                self.begin_stopping();
                false
            }
            None => {
                self.mailbox_closed = true;
                self.begin_stopping();
                false
            }
        }
    }

    fn begin_stopping(&mut self) {
        if self.state.stopping {
            return;
        }
        let running = self.state.running_count();
        if running > 0 {
            info!(
                source = %self.source.name,
                running,
                "Stop requested, letting running captures finish"
            );
        }
        self.state.begin_stopping();
    }

    async fn on_deadline(&mut self) {
        match self.state.phase {
            Phase::Idle | Phase::Scheduled => self.poll().await,
            Phase::Backoff => self.respawn_due().await,
            Phase::Capturing => {}
        }
    }

    /// One status probe in `Idle` or `Scheduled`.
    async fn poll(&mut self) {
        let phase = self.state.phase;
        let status = self.probe.probe(&self.source).await;
        let now = Utc::now();
        let poll = &self.config.poll;

        match status {
            Ok(LiveStatus::Live(event)) => {
                self.start_capture(event).await;
            }
            Ok(LiveStatus::Upcoming { starts_at }) => {
                let until = (starts_at - now).to_std().unwrap_or(Duration::ZERO);
                if until > poll.schedule_threshold {
                    if phase == Phase::Scheduled {
                        info!(source = %self.source.name, %starts_at, "Event moved later, back to slow polling");
                        self.state.enter_idle(poll);
                    } else {
                        debug!(source = %self.source.name, %starts_at, "Upcoming event outside the fast-poll window");
                        self.state.schedule_next_check();
                    }
                } else if phase == Phase::Scheduled
                    && self.state.scheduled_timed_out(now, poll.scheduled_timeout)
                {
                    info!(source = %self.source.name, %starts_at, "Scheduled event did not start, back to slow polling");
                    self.state.enter_idle(poll);
                } else {
                    if phase != Phase::Scheduled {
                        info!(
                            source = %self.source.name,
                            %starts_at,
                            in_secs = until.as_secs(),
                            "Upcoming event, switching to fast polling"
                        );
                    }
                    self.state.enter_scheduled(starts_at, now, poll);
                }
            }
            Ok(LiveStatus::None) => {
                if phase == Phase::Scheduled {
                    info!(source = %self.source.name, "Event no longer scheduled, back to slow polling");
                    self.state.enter_idle(poll);
                } else {
                    debug!(source = %self.source.name, "Not live");
                    self.state.schedule_next_check();
                }
            }
            Err(e) => {
                warn!(source = %self.source.name, %phase, error = %e, "Status probe failed");
                if phase == Phase::Scheduled
                    && self.state.scheduled_timed_out(now, poll.scheduled_timeout)
                {
                    self.state.enter_idle(poll);
                } else {
                    self.state.schedule_next_check();
                }
            }
        }
    }

    async fn start_capture(&mut self, event: LiveEvent) {
        info!(
            source = %self.source.name,
            url = %event.url,
            title = event.title.as_deref().unwrap_or(""),
            "Source is live, starting capture"
        );
        self.state.crash_count = 0;
        self.state.enter_capturing(event);
        for kind in CaptureKind::ALL {
            self.spawn_capture(kind).await;
        }
        self.after_capture_change();
    }

    /// Spawn one capture kind; a failed spawn counts as a crash.
    async fn spawn_capture(&mut self, kind: CaptureKind) {
        debug_assert!(self.state.handle(kind).is_none());

        let Some(event) = self.state.event.clone() else {
            return;
        };

        let result = match ensure_dir_all_with_op(
            "creating scratch directory",
            &self.source.scratch_dir,
        )
        .await
        {
            Ok(()) => self.launcher.launch(&self.source, kind, &event),
            Err(e) => Err(e),
        };

        match result {
            Ok(handle) => {
                info!(
                    source = %self.source.name,
                    %kind,
                    pid = ?handle.pid(),
                    "Capture process started"
                );
                self.state.total_spawns += 1;
                *self.state.handle_mut(kind) = Some(handle);
            }
            Err(e) => {
                warn!(source = %self.source.name, %kind, error = %e, "Failed to start capture process");
                self.handle_crash(kind, Duration::ZERO);
            }
        }
    }

    fn on_exit(&mut self, kind: CaptureKind, outcome: ExitOutcome) {
        let uptime = self
            .state
            .handle_mut(kind)
            .take()
            .map(|handle| handle.uptime())
            .unwrap_or_default();

        match outcome {
            ExitOutcome::Ended => {
                info!(
                    source = %self.source.name,
                    %kind,
                    uptime_secs = uptime.as_secs(),
                    "Capture ended normally"
                );
            }
            ExitOutcome::Stopped => {
                debug!(source = %self.source.name, %kind, "Capture stopped");
            }
            ExitOutcome::Crashed { code } => {
                warn!(
                    source = %self.source.name,
                    %kind,
                    code = ?code,
                    uptime_secs = uptime.as_secs(),
                    "Capture process crashed"
                );
                if !self.state.stopping {
                    self.handle_crash(kind, uptime);
                }
            }
        }

        self.after_capture_change();
    }

    fn handle_crash(&mut self, kind: CaptureKind, uptime: Duration) {
        match self
            .state
            .record_crash(uptime, self.config.stable_after, &self.config.retry)
        {
            CrashDecision::Respawn { delay, crash } => {
                info!(
                    source = %self.source.name,
                    %kind,
                    crash,
                    max_retries = self.config.retry.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling capture restart"
                );
                self.state.schedule_respawn(kind, delay);
            }
            CrashDecision::Abandon { crash } => {
                error!(
                    source = %self.source.name,
                    %kind,
                    crashes = crash,
                    "Capture keeps crashing, giving up on this event"
                );
            }
        }
    }

    /// Back to idle polling once nothing is running or pending.
    fn after_capture_change(&mut self) {
        if self.state.stopping {
            return;
        }
        if matches!(self.state.phase, Phase::Capturing | Phase::Backoff)
            && self.state.capture_finished()
        {
            info!(source = %self.source.name, "Capture finished, back to idle polling");
            self.state.crash_count = 0;
            self.state.enter_idle(&self.config.poll);
        }
    }

    /// Backoff elapsed: re-probe, then respawn or retire the pending kinds.
    async fn respawn_due(&mut self) {
        let due = self.state.take_pending_respawn();
        if due.is_empty() {
            self.after_capture_change();
            return;
        }

        let still_live = match self.probe.probe(&self.source).await {
            Ok(LiveStatus::Live(event)) => {
                self.state.event = Some(event);
                true
            }
            Ok(_) => false,
            Err(e) => {
                debug!(source = %self.source.name, error = %e, "Probe failed during backoff, assuming still live");
                true
            }
        };

        if still_live {
            for kind in due {
                self.spawn_capture(kind).await;
            }
        } else {
            info!(source = %self.source.name, kinds = ?due, "Event no longer live, not restarting capture");
        }

        self.after_capture_change();
    }

    /// Terminate both captures concurrently.
    async fn terminate_all(&mut self) {
        self.state.begin_stopping();
        let name = self.source.name.as_str();
        let kill_timeout = self.config.kill_timeout;
        tokio::join!(
            terminate(name, &mut self.state.media, kill_timeout),
            terminate(name, &mut self.state.chat, kill_timeout),
        );
    }
}

async fn terminate(source: &str, handle: &mut Option<ChildProcessHandle>, kill_timeout: Duration) {
    let Some(mut handle) = handle.take() else {
        return;
    };
    let kind = handle.kind();
    let outcome = handle.terminate(kill_timeout).await;
    info!(source = %source, %kind, outcome = ?outcome, "Capture process terminated");
}

/// Resolves when the process exits; never resolves for an empty slot.
async fn wait_exit(handle: &mut Option<ChildProcessHandle>) -> ExitOutcome {
    match handle {
        Some(handle) => handle.exited().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::capture::CheckError;
    use crate::process::CaptureKind;
    use crate::supervisor::state::SourceSnapshot;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Probe returning scripted statuses, then `fallback` forever.
    struct ScriptedProbe {
        script: Mutex<VecDeque<Result<LiveStatus, CheckError>>>,
        fallback: LiveStatus,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        fn new(script: Vec<Result<LiveStatus, CheckError>>, fallback: LiveStatus) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                fallback,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StatusProbe for ScriptedProbe {
        async fn probe(&self, _source: &Source) -> Result<LiveStatus, CheckError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(self.fallback.clone()))
        }
    }

    /// Launcher running `sh -c <script>` per kind and recording every spawn.
    struct ShellLauncher {
        media: String,
        chat: String,
        spawned: Mutex<Vec<(CaptureKind, PathBuf)>>,
    }

    impl ShellLauncher {
        fn new(media: &str, chat: &str) -> Arc<Self> {
            Arc::new(Self {
                media: media.to_string(),
                chat: chat.to_string(),
                spawned: Mutex::new(Vec::new()),
            })
        }

        fn count(&self, kind: CaptureKind) -> usize {
            self.spawned
                .lock()
                .unwrap()
                .iter()
                .filter(|(k, _)| *k == kind)
                .count()
        }
    }

    impl CaptureLauncher for ShellLauncher {
        fn launch(
            &self,
            source: &Source,
            kind: CaptureKind,
            _event: &LiveEvent,
        ) -> crate::Result<ChildProcessHandle> {
            let script = match kind {
                CaptureKind::Media => &self.media,
                CaptureKind::Chat => &self.chat,
            };
            self.spawned
                .lock()
                .unwrap()
                .push((kind, source.scratch_dir.clone()));
            let mut cmd = process_utils::tokio_command("sh");
            cmd.arg("-c").arg(script);
            ChildProcessHandle::spawn(kind, &source.name, cmd)
        }
    }

    fn live() -> LiveStatus {
        LiveStatus::Live(LiveEvent {
            url: "https://www.youtube.com/watch?v=abc".into(),
            title: Some("stream".into()),
            id: Some("abc".into()),
        })
    }

    fn fast_config(max_retries: u32) -> SupervisorConfig {
        SupervisorConfig {
            poll: PollSettings {
                slow_interval: Duration::from_millis(40),
                fast_interval: Duration::from_millis(10),
                schedule_threshold: Duration::from_secs(30 * 60),
                scheduled_timeout: Duration::from_secs(30 * 60),
            },
            retry: RetryPolicy {
                max_retries,
                initial_delay_ms: 10,
                max_delay_ms: 40,
                ..Default::default()
            },
            stable_after: Duration::from_secs(300),
            kill_timeout: Duration::from_secs(2),
        }
    }

    struct Harness {
        _temp: TempDir,
        source: Source,
        handle: SupervisorHandle,
        task: tokio::task::JoinHandle<ActorResult>,
    }

    fn start(
        config: SupervisorConfig,
        probe: Arc<ScriptedProbe>,
        launcher: Arc<ShellLauncher>,
    ) -> Harness {
        let temp = TempDir::new().unwrap();
        let source = Source::new(
            "A",
            temp.path().join("destination").join("A"),
            &temp.path().join("scratch"),
            false,
        );
        let (supervisor, handle) = ChannelSupervisor::new(
            source.clone(),
            config,
            probe,
            launcher,
            CancellationToken::new(),
        );
        let task = tokio::spawn(supervisor.run());
        Harness {
            _temp: temp,
            source,
            handle,
            task,
        }
    }

    /// Poll the supervisor's state until `pred` holds (5s real-time limit).
    async fn wait_for(handle: &SupervisorHandle, pred: impl Fn(&SourceSnapshot) -> bool) -> SourceSnapshot {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            let snapshot = handle.get_state().await.unwrap();
            if pred(&snapshot) {
                return snapshot;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "condition not reached, last state: {snapshot:?}"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_not_live_stays_idle_without_spawning() {
        let probe = ScriptedProbe::new(vec![], LiveStatus::None);
        let launcher = ShellLauncher::new("exit 0", "exit 0");
        let h = start(fast_config(3), probe.clone(), launcher.clone());

        let snapshot = wait_for(&h.handle, |_| probe.calls() >= 3).await;

        assert_eq!(snapshot.phase, Phase::Idle);
        assert_eq!(snapshot.poll_interval, Duration::from_millis(40));
        assert_eq!(snapshot.running_count(), 0);
        assert_eq!(launcher.count(CaptureKind::Media), 0);
        assert_eq!(launcher.count(CaptureKind::Chat), 0);
        assert!(h.source.scratch_dir.is_dir());

        h.handle.stop(false).await.unwrap();
        assert_eq!(h.task.await.unwrap().unwrap(), ActorOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_upcoming_then_live_starts_one_capture_of_each_kind() {
        let starts_at = Utc::now() + chrono::Duration::minutes(5);
        let probe = ScriptedProbe::new(vec![Ok(LiveStatus::Upcoming { starts_at })], live());
        let launcher = ShellLauncher::new("exec sleep 30", "exec sleep 30");
        // Slow interval long enough that the scheduled state is observable.
        let mut config = fast_config(3);
        config.poll.slow_interval = Duration::from_secs(60);
        config.poll.fast_interval = Duration::from_millis(300);
        let h = start(config, probe.clone(), launcher.clone());

        let scheduled = wait_for(&h.handle, |s| s.phase == Phase::Scheduled).await;
        assert_eq!(scheduled.poll_interval, Duration::from_millis(300));
        assert_eq!(scheduled.scheduled_start, Some(starts_at));

        let capturing = wait_for(&h.handle, |s| s.phase == Phase::Capturing).await;
        assert!(capturing.media_pid.is_some());
        assert!(capturing.chat_pid.is_some());
        assert_eq!(launcher.count(CaptureKind::Media), 1);
        assert_eq!(launcher.count(CaptureKind::Chat), 1);
        let spawned = launcher.spawned.lock().unwrap().clone();
        assert!(spawned.iter().all(|(_, dir)| *dir == h.source.scratch_dir));

        // No further probes while capturing.
        let calls = probe.calls();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(probe.calls(), calls);

        h.handle.stop(true).await.unwrap();
        assert_eq!(h.task.await.unwrap().unwrap(), ActorOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_scheduled_event_withdrawn_returns_to_idle() {
        let starts_at = Utc::now() + chrono::Duration::minutes(5);
        let probe = ScriptedProbe::new(
            vec![Ok(LiveStatus::Upcoming { starts_at })],
            LiveStatus::None,
        );
        let launcher = ShellLauncher::new("exit 0", "exit 0");
        let mut config = fast_config(3);
        config.poll.slow_interval = Duration::from_secs(60);
        config.poll.fast_interval = Duration::from_millis(300);
        let h = start(config, probe.clone(), launcher.clone());

        let scheduled = wait_for(&h.handle, |s| s.phase == Phase::Scheduled).await;
        assert_eq!(scheduled.poll_interval, Duration::from_millis(300));

        let idle = wait_for(&h.handle, |s| s.phase == Phase::Idle).await;
        assert_eq!(idle.poll_interval, Duration::from_secs(60));
        assert_eq!(idle.scheduled_start, None);
        assert_eq!(probe.calls(), 2);
        assert_eq!(launcher.count(CaptureKind::Media), 0);

        h.handle.stop(false).await.unwrap();
        assert_eq!(h.task.await.unwrap().unwrap(), ActorOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_scheduled_event_that_never_starts_times_out() {
        // Already past its start time, so it stays inside the fast-poll window.
        let starts_at = Utc::now() - chrono::Duration::minutes(1);
        let probe = ScriptedProbe::new(vec![], LiveStatus::Upcoming { starts_at });
        let launcher = ShellLauncher::new("exit 0", "exit 0");
        let mut config = fast_config(3);
        config.poll.slow_interval = Duration::from_secs(60);
        config.poll.fast_interval = Duration::from_millis(50);
        config.poll.scheduled_timeout = Duration::from_millis(300);
        let h = start(config, probe.clone(), launcher.clone());

        let scheduled = wait_for(&h.handle, |s| s.phase == Phase::Scheduled).await;
        assert_eq!(scheduled.scheduled_start, Some(starts_at));

        let idle = wait_for(&h.handle, |s| s.phase == Phase::Idle).await;
        assert_eq!(idle.poll_interval, Duration::from_secs(60));
        assert!(probe.calls() >= 3);
        assert_eq!(launcher.count(CaptureKind::Media), 0);
        assert_eq!(launcher.count(CaptureKind::Chat), 0);

        h.handle.stop(false).await.unwrap();
        assert_eq!(h.task.await.unwrap().unwrap(), ActorOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_crashing_capture_is_retried_up_to_cap_then_abandoned() {
        let probe = ScriptedProbe::new(vec![], live());
        let launcher = ShellLauncher::new("exit 1", "exec sleep 30");
        let h = start(fast_config(3), probe, launcher.clone());

        let snapshot = wait_for(&h.handle, |s| {
            s.total_crashes >= 4 && s.phase == Phase::Capturing && s.pending_respawn.is_empty()
        })
        .await;

        // One initial spawn plus three retries; the healthy sibling is untouched.
        assert_eq!(launcher.count(CaptureKind::Media), 4);
        assert_eq!(launcher.count(CaptureKind::Chat), 1);
        assert!(snapshot.media_pid.is_none());
        assert!(snapshot.chat_pid.is_some());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(launcher.count(CaptureKind::Media), 4);

        h.handle.cancel();
        assert_eq!(h.task.await.unwrap().unwrap(), ActorOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_abandoned_capture_returns_to_idle_when_sibling_ends() {
        let probe = ScriptedProbe::new(vec![Ok(live())], LiveStatus::None);
        let launcher = ShellLauncher::new("exit 2", "sleep 0.3; exit 0");
        // No retries: the first media crash abandons it.
        let h = start(fast_config(0), probe, launcher.clone());

        let snapshot = wait_for(&h.handle, |s| {
            s.phase == Phase::Idle && s.total_spawns == 2 && s.running_count() == 0
        })
        .await;

        assert_eq!(snapshot.crash_count, 0);
        assert_eq!(snapshot.poll_interval, Duration::from_millis(40));
        assert_eq!(launcher.count(CaptureKind::Media), 1);

        h.handle.stop(true).await.unwrap();
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_normal_end_of_both_returns_to_idle() {
        let probe = ScriptedProbe::new(vec![Ok(live())], LiveStatus::None);
        let launcher = ShellLauncher::new("exit 0", "exit 0");
        let h = start(fast_config(3), probe, launcher.clone());

        let snapshot = wait_for(&h.handle, |s| s.total_spawns == 2 && s.phase == Phase::Idle).await;

        assert_eq!(snapshot.total_crashes, 0);
        assert_eq!(snapshot.crash_count, 0);
        assert!(snapshot.event_url.is_none());

        h.handle.stop(false).await.unwrap();
        assert_eq!(h.task.await.unwrap().unwrap(), ActorOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_backoff_reprobe_not_live_retires_crashed_kind() {
        // Live for the first probe, then the event is over.
        let probe = ScriptedProbe::new(vec![Ok(live())], LiveStatus::None);
        let launcher = ShellLauncher::new("exit 1", "sleep 0.2; exit 0");
        let h = start(fast_config(5), probe, launcher.clone());

        wait_for(&h.handle, |s| s.phase == Phase::Idle && s.total_spawns >= 2).await;

        assert_eq!(launcher.count(CaptureKind::Media), 1);
        assert_eq!(launcher.count(CaptureKind::Chat), 1);

        h.handle.stop(false).await.unwrap();
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_backoff_probe_error_respawns() {
        let probe = ScriptedProbe::new(
            vec![Ok(live()), Err(CheckError::transient("HTTP Error 429"))],
            LiveStatus::None,
        );
        let launcher = ShellLauncher::new("exit 1", "exec sleep 30");
        let h = start(fast_config(1), probe, launcher.clone());

        wait_for(&h.handle, |s| s.total_crashes >= 2 && s.pending_respawn.is_empty()).await;
        assert_eq!(launcher.count(CaptureKind::Media), 2);

        h.handle.stop(true).await.unwrap();
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_graceful_stop_lets_capture_finish() {
        let probe = ScriptedProbe::new(vec![], live());
        let launcher = ShellLauncher::new("sleep 1; exit 0", "sleep 1; exit 0");
        let h = start(fast_config(3), probe.clone(), launcher.clone());

        wait_for(&h.handle, |s| s.running_count() == 2).await;
        h.handle.stop(false).await.unwrap();

        let stopping = h.handle.get_state().await.unwrap();
        assert!(stopping.stopping);
        assert_eq!(stopping.running_count(), 2);

        let outcome = tokio::time::timeout(Duration::from_secs(5), h.task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcome, ActorOutcome::Stopped);
        // Nothing new was spawned after the stop.
        assert_eq!(launcher.count(CaptureKind::Media), 1);
        assert_eq!(launcher.count(CaptureKind::Chat), 1);
    }

    #[tokio::test]
    async fn test_probe_error_in_idle_keeps_phase() {
        let probe = ScriptedProbe::new(
            vec![
                Err(CheckError::transient("timeout")),
                Err(CheckError::transient("timeout")),
            ],
            LiveStatus::None,
        );
        let launcher = ShellLauncher::new("exit 0", "exit 0");
        let h = start(fast_config(3), probe.clone(), launcher.clone());

        let snapshot = wait_for(&h.handle, |_| probe.calls() >= 3).await;
        assert_eq!(snapshot.phase, Phase::Idle);
        assert_eq!(launcher.count(CaptureKind::Media), 0);

        h.handle.cancel();
        assert_eq!(h.task.await.unwrap().unwrap(), ActorOutcome::Cancelled);
    }
}
