//! The finalizer loop.
//!
//! Each tick lists the files directly under every source's scratch directory,
//! records their sizes and moves files whose size held steady since the
//! previous tick. Files the capture tool is still writing (`.part` and
//! friends) are never touched.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::mover::{FailureThrottle, move_file};
use super::render::{RenderOutcome, RenderTrigger};
use super::table::{FileObservationTable, Observed};
use crate::config::{CollisionPolicy, FinalizerSettings, SourceList};
use crate::domain::Source;
use crate::utils::filename::is_in_progress;
use crate::utils::fs::io_error;

/// Summary of one finalizer tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Files considered (in-progress files excluded).
    pub scanned: usize,
    pub in_progress: usize,
    /// Files seen for the first time or still changing.
    pub pending: usize,
    /// Destination paths of files moved this tick.
    pub moved: Vec<PathBuf>,
    pub failed: usize,
    pub renders_started: usize,
    /// Observations dropped because their file was not seen this tick.
    pub forgotten: usize,
}

/// Moves stable scratch files to their source's destination.
pub struct Finalizer {
    sources: watch::Receiver<Arc<SourceList>>,
    interval: Duration,
    collision_policy: CollisionPolicy,
    table: FileObservationTable,
    failures: FailureThrottle,
    render: RenderTrigger,
    renders: JoinSet<RenderOutcome>,
}

impl Finalizer {
    pub fn new(settings: &FinalizerSettings, sources: watch::Receiver<Arc<SourceList>>) -> Self {
        Self {
            sources,
            interval: settings.interval,
            collision_policy: settings.collision_policy,
            table: FileObservationTable::new(),
            failures: FailureThrottle::new(settings.error_log_interval),
            render: RenderTrigger::from_settings(&settings.render),
            renders: JoinSet::new(),
        }
    }

    pub fn with_render(mut self, render: RenderTrigger) -> Self {
        self.render = render;
        self
    }

    pub fn observations(&self) -> &FileObservationTable {
        &self.table
    }

    /// Scan every source once.
    pub async fn tick(&mut self) -> ScanReport {
        self.reap_renders();

        let list = self.sources.borrow().clone();
        let now = Instant::now();
        let mut report = ScanReport::default();
        let mut seen = HashSet::new();

        for source in &list.sources {
            self.scan_source(source, now, &mut seen, &mut report).await;
        }

        report.forgotten = self.table.retain_seen(&seen);
        self.failures.retain(|path| seen.contains(path));

        if !report.moved.is_empty() || report.failed > 0 {
            info!(
                moved = report.moved.len(),
                failed = report.failed,
                pending = report.pending,
                "Finalizer tick"
            );
        } else {
            debug!(scanned = report.scanned, pending = report.pending, "Finalizer tick");
        }
        report
    }

    async fn scan_source(
        &mut self,
        source: &Source,
        now: Instant,
        seen: &mut HashSet<PathBuf>,
        report: &mut ScanReport,
    ) {
        let files = match list_files(&source.scratch_dir).await {
            Ok(files) => files,
            Err(e) => {
                if self.failures.should_warn(&source.scratch_dir, now) {
                    warn!(source = %source.name, error = %e, "Failed to list scratch directory");
                }
                // Keep what is known about this source until the next listing.
                seen.insert(source.scratch_dir.clone());
                seen.extend(self.table.paths_in(&source.scratch_dir).cloned());
                return;
            }
        };

        for (path, size) in files {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if is_in_progress(name) {
                report.in_progress += 1;
                continue;
            }
            report.scanned += 1;
            seen.insert(path.clone());

            if self.table.observe(&path, size, now) != Observed::Stable {
                report.pending += 1;
                continue;
            }

            match move_file(&path, &source.destination, self.collision_policy).await {
                Ok(dest) => {
                    info!(source = %source.name, file = %name, dest = %dest.display(), size, "Moved finished file");
                    self.table.remove(&path);
                    self.failures.clear(&path);
                    if self.render.qualifies(&dest) {
                        let render = self.render.clone();
                        let chat = dest.clone();
                        self.renders.spawn(async move { render.render(&chat).await });
                        report.renders_started += 1;
                    }
                    report.moved.push(dest);
                }
                Err(e) => {
                    report.failed += 1;
                    if self.failures.should_warn(&path, now) {
                        warn!(source = %source.name, file = %name, error = %e, "Failed to move file, will retry");
                    } else {
                        debug!(source = %source.name, file = %name, error = %e, "Move still failing");
                    }
                }
            }
        }
    }

    fn reap_renders(&mut self) {
        while let Some(joined) = self.renders.try_join_next() {
            if let Err(e) = joined {
                warn!(error = %e, "Render task failed");
            }
        }
    }

    /// Wait for every render started so far.
    pub async fn wait_for_renders(&mut self) -> Vec<RenderOutcome> {
        let mut outcomes = Vec::new();
        while let Some(joined) = self.renders.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(error = %e, "Render task failed"),
            }
        }
        outcomes
    }

    /// Scan every `interval` until cancelled.
    ///
    /// Cancellation is only observed between ticks, so a move in progress
    /// always completes.
    pub async fn run(mut self, cancellation_token: CancellationToken) {
        info!(interval_secs = self.interval.as_secs_f64(), "Finalizer starting");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancellation_token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick().await;
        }

        if !self.renders.is_empty() {
            info!(renders = self.renders.len(), "Abandoning in-flight chat renders");
        }
        info!("Finalizer stopped");
    }
}

/// Regular files directly under `dir` with their sizes. A missing directory is empty.
async fn list_files(dir: &Path) -> crate::Result<Vec<(PathBuf, u64)>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error("listing", dir, e)),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| io_error("listing", dir, e))?
    {
        let path = entry.path();
        match entry.metadata().await {
            Ok(meta) if meta.is_file() => files.push((path, meta.len())),
            Ok(_) => {}
            // Vanished between listing and stat.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error("reading metadata of", &path, e)),
        }
    }
    files.sort();
    Ok(files)
}
