//! Periodic re-reading of the source list file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::loader::{ChannelEntry, SourceList, build_sources, load_channel_list};
use crate::Result;
use crate::domain::AuthMethod;

/// Re-reads the source list on a fixed cadence and publishes it when it changed.
///
/// Subscribers (the pool reconciler and the finalizer) get the latest
/// validated [`SourceList`] through a `watch` channel.
pub struct ConfigWatcher {
    path: PathBuf,
    scratch_root: PathBuf,
    auth: AuthMethod,
    interval: Duration,
    last_entries: Vec<ChannelEntry>,
    tx: watch::Sender<Arc<SourceList>>,
}

impl ConfigWatcher {
    /// Load the source list once.
    ///
    /// Failing to read or parse the file here is fatal for the caller.
    pub async fn load(
        path: impl Into<PathBuf>,
        scratch_root: impl Into<PathBuf>,
        auth: AuthMethod,
        interval: Duration,
    ) -> Result<(Self, watch::Receiver<Arc<SourceList>>)> {
        let path = path.into();
        let scratch_root = scratch_root.into();
        let entries = load_channel_list(&path).await?;
        let list = build_sources(&entries, &scratch_root, &auth).await;
        info!(
            path = %path.display(),
            sources = list.sources.len(),
            rejected = list.rejected.len(),
            "Loaded source list"
        );

        let (tx, rx) = watch::channel(Arc::new(list));
        Ok((
            Self {
                path,
                scratch_root,
                auth,
                interval,
                last_entries: entries,
                tx,
            },
            rx,
        ))
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<SourceList>> {
        self.tx.subscribe()
    }

    /// Re-read the file once. Returns `true` when a new list was published.
    ///
    /// Read or parse errors keep the previous list in force. Rejected entries
    /// are validated again on every reload, so a destination that becomes
    /// writable later is admitted without editing the file.
    pub async fn reload(&mut self) -> bool {
        let entries = match load_channel_list(&self.path).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to reload source list, keeping previous");
                return false;
            }
        };

        let has_rejections = !self.tx.borrow().rejected.is_empty();
        if entries == self.last_entries && !has_rejections {
            debug!(path = %self.path.display(), "Source list unchanged");
            return false;
        }

        let list = build_sources(&entries, &self.scratch_root, &self.auth).await;
        self.last_entries = entries;
        if **self.tx.borrow() == list {
            debug!(path = %self.path.display(), "Source list unchanged after revalidation");
            return false;
        }

        info!(
            sources = list.sources.len(),
            rejected = list.rejected.len(),
            "Source list changed"
        );
        self.tx.send_replace(Arc::new(list));
        true
    }

    /// Reload every interval until cancelled.
    pub async fn run(mut self, cancel_token: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!("Config watcher shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    self.reload().await;
                }
            }
        }
    }
}
