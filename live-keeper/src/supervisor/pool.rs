//! The set of running channel supervisors.
//!
//! The pool reconciles its supervisors against the latest source list:
//! new sources get a supervisor, removed sources have theirs stopped
//! (letting an in-flight capture finish), unchanged sources are left alone.
//! Supervisor tasks live in a `JoinSet` and are reaped as they exit.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::channel::{ChannelSupervisor, SupervisorConfig};
use super::handle::SupervisorHandle;
use super::messages::{ActorOutcome, ActorResult};
use crate::capture::{CaptureLauncher, StatusProbe};
use crate::config::SourceList;
use crate::domain::Source;

/// Result of one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Sources that got a new supervisor.
    pub added: Vec<String>,
    /// Sources whose supervisor was told to stop.
    pub removed: Vec<String>,
    /// Sources left running untouched.
    pub unchanged: Vec<String>,
    /// Configured sources excluded by validation.
    pub rejected: Vec<String>,
    /// Sources waiting for their previous supervisor to finish first.
    pub deferred: Vec<String>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.deferred.is_empty()
    }
}

/// Report from a shutdown operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Supervisors running (or finishing) when shutdown started.
    pub total_actors: usize,
    pub graceful_stops: usize,
    /// Supervisors aborted or crashed during shutdown.
    pub forced_terminations: usize,
    /// Stop messages that could not be delivered.
    pub stop_message_failures: usize,
}

impl ShutdownReport {
    pub fn all_graceful(&self) -> bool {
        self.forced_terminations == 0 && self.stop_message_failures == 0
    }
}

/// A supervisor task that exited.
#[derive(Debug)]
pub struct SupervisorExit {
    pub name: String,
    /// `Err` holds the run error or panic message.
    pub outcome: Result<ActorOutcome, String>,
}

impl SupervisorExit {
    pub fn is_crash(&self) -> bool {
        self.outcome.is_err()
    }
}

struct TaskEntry {
    name: String,
    /// Still the active supervisor for `name` (not retiring).
    active: bool,
    handle: SupervisorHandle,
}

/// Owns every running channel supervisor.
pub struct SupervisorPool {
    config: SupervisorConfig,
    probe: Arc<dyn StatusProbe>,
    launcher: Arc<dyn CaptureLauncher>,
    /// Active supervisor task per source name.
    active: BTreeMap<String, Id>,
    /// Every task still running, including retiring ones.
    tasks: HashMap<Id, TaskEntry>,
    /// Sources to start once their retiring supervisor has exited.
    deferred: BTreeMap<String, Source>,
    join_set: JoinSet<ActorResult>,
    cancellation_token: CancellationToken,
    shutdown_timeout: Duration,
}

impl SupervisorPool {
    pub fn new(
        config: SupervisorConfig,
        probe: Arc<dyn StatusProbe>,
        launcher: Arc<dyn CaptureLauncher>,
        cancellation_token: CancellationToken,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            config,
            probe,
            launcher,
            active: BTreeMap::new(),
            tasks: HashMap::new(),
            deferred: BTreeMap::new(),
            join_set: JoinSet::new(),
            cancellation_token,
            shutdown_timeout,
        }
    }

    /// Number of sources with an active supervisor.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.active.contains_key(name)
    }

    /// Names of sources with an active supervisor, ordered.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.active.keys().map(String::as_str)
    }

    /// Supervisor tasks still running, including ones finishing a capture.
    pub fn task_count(&self) -> usize {
        self.join_set.len()
    }

    pub fn handle(&self, name: &str) -> Option<&SupervisorHandle> {
        let id = self.active.get(name)?;
        self.tasks.get(id).map(|entry| &entry.handle)
    }

    /// Bring the set of supervisors in line with `list`.
    ///
    /// Idempotent: reconciling twice with the same list changes nothing the
    /// second time. A source whose definition changed is stopped and started
    /// again; the new supervisor waits until the old one has exited.
    pub async fn reconcile(&mut self, list: &SourceList) -> ReconcileReport {
        let mut report = ReconcileReport {
            rejected: list.rejected.iter().map(|r| r.name.clone()).collect(),
            ..Default::default()
        };

        // Removed or changed.
        let stale: Vec<String> = self
            .active
            .keys()
            .filter(|name| {
                list.get(name)
                    .is_none_or(|source| self.handle(name).is_some_and(|h| h.source != *source))
            })
            .cloned()
            .collect();
        for name in stale {
            self.retire(&name).await;
            report.removed.push(name);
        }

        // Deferred sources that are no longer wanted as-is.
        self.deferred
            .retain(|name, source| list.get(name).is_some_and(|wanted| wanted == source));

        for source in &list.sources {
            if self.active.contains_key(&source.name) {
                report.unchanged.push(source.name.clone());
            } else if self.is_retiring(&source.name) {
                if self.deferred.insert(source.name.clone(), source.clone()).is_none() {
                    info!(source = %source.name, "Previous supervisor still finishing, start deferred");
                }
                report.deferred.push(source.name.clone());
            } else {
                self.spawn(source.clone());
                report.added.push(source.name.clone());
            }
        }

        if !report.is_noop() {
            info!(
                added = report.added.len(),
                removed = report.removed.len(),
                unchanged = report.unchanged.len(),
                rejected = report.rejected.len(),
                deferred = report.deferred.len(),
                "Reconciled supervisors"
            );
        }
        report
    }

    fn spawn(&mut self, source: Source) {
        let token = self.cancellation_token.child_token();
        let (supervisor, handle) = ChannelSupervisor::new(
            source,
            self.config.clone(),
            self.probe.clone(),
            self.launcher.clone(),
            token,
        );
        let name = supervisor.name().to_string();
        let abort = self.join_set.spawn(supervisor.run());
        let id = abort.id();

        debug!(source = %name, "Spawned supervisor");
        self.active.insert(name.clone(), id);
        self.tasks.insert(
            id,
            TaskEntry {
                name,
                active: true,
                handle,
            },
        );
    }

    /// Stop polling for `name`; its running capture may finish on its own.
    async fn retire(&mut self, name: &str) {
        let Some(id) = self.active.remove(name) else {
            return;
        };
        let Some(entry) = self.tasks.get_mut(&id) else {
            return;
        };
        entry.active = false;
        info!(source = %name, "Stopping supervisor for removed source");
        if let Err(e) = entry.handle.stop(false).await {
            debug!(source = %name, error = %e, "Supervisor already stopped");
        }
    }

    fn is_retiring(&self, name: &str) -> bool {
        self.tasks
            .values()
            .any(|entry| !entry.active && entry.name == name)
    }

    /// Wait for the next supervisor task to exit and update bookkeeping.
    ///
    /// Returns `None` when no tasks are running. A deferred source whose
    /// previous supervisor just exited is started here.
    pub async fn join_next(&mut self) -> Option<SupervisorExit> {
        let joined = self.join_set.join_next_with_id().await?;
        let (id, outcome) = match joined {
            Ok((id, Ok(outcome))) => (id, Ok(outcome)),
            Ok((id, Err(e))) => (id, Err(e.to_string())),
            Err(e) => {
                let message = if e.is_panic() {
                    "supervisor panicked".to_string()
                } else {
                    e.to_string()
                };
                (e.id(), Err(message))
            }
        };

        let Some(entry) = self.tasks.remove(&id) else {
            warn!(task = %id, "Unknown supervisor task exited");
            return Some(SupervisorExit {
                name: String::new(),
                outcome,
            });
        };

        if entry.active {
            self.active.remove(&entry.name);
        }

        match &outcome {
            Ok(o) => debug!(source = %entry.name, outcome = ?o, "Supervisor exited"),
            Err(e) => error!(source = %entry.name, error = %e, "Supervisor exited with error"),
        }

        if !self.is_retiring(&entry.name)
            && !self.active.contains_key(&entry.name)
            && let Some(source) = self.deferred.remove(&entry.name)
        {
            info!(source = %source.name, "Starting deferred supervisor");
            self.spawn(source);
        }

        Some(SupervisorExit {
            name: entry.name,
            outcome,
        })
    }

    /// Force-stop every supervisor and wait for them to exit.
    ///
    /// 1. Send `Stop { force: true }` to every supervisor.
    /// 2. Wait up to the shutdown timeout.
    /// 3. Cancel, then abort whatever is still running.
    pub async fn shutdown(&mut self) -> ShutdownReport {
        let total_actors = self.join_set.len();
        let mut graceful_stops = 0;
        let mut forced_terminations = 0;
        let mut stop_message_failures = 0;

        info!(supervisors = total_actors, "Shutting down supervisors");
        self.deferred.clear();

        for entry in self.tasks.values() {
            if let Err(e) = entry.handle.stop(true).await {
                debug!(source = %entry.name, error = %e, "Failed to send stop");
                stop_message_failures += 1;
                entry.handle.cancel();
            }
        }

        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.join_next()).await {
                Ok(Some(exit)) if exit.is_crash() => forced_terminations += 1,
                Ok(Some(_)) => graceful_stops += 1,
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        remaining = self.join_set.len(),
                        "Shutdown timeout reached, cancelling supervisors"
                    );
                    self.cancellation_token.cancel();
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    forced_terminations += self.join_set.len();
                    self.join_set.abort_all();
                    while self.join_set.join_next().await.is_some() {}
                    break;
                }
            }
        }

        self.active.clear();
        self.tasks.clear();

        let report = ShutdownReport {
            total_actors,
            graceful_stops,
            forced_terminations,
            stop_message_failures,
        };
        info!(
            total = report.total_actors,
            graceful = report.graceful_stops,
            forced = report.forced_terminations,
            message_failures = report.stop_message_failures,
            "Supervisor shutdown complete"
        );
        report
    }
}
