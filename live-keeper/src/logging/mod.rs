//! Logging setup: console + daily-rolling file output with local timestamps,
//! and retention of old log files.

use chrono::{Local, NaiveDate};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::utils::fs;

/// Default log filter directive, overridable with `RUST_LOG`.
pub const DEFAULT_LOG_FILTER: &str = "live_keeper=info,process_utils=info";

/// Prefix of the daily log files (`live-keeper.log.YYYY-MM-DD`).
pub const LOG_FILE_PREFIX: &str = "live-keeper.log";

/// Log retention period in days.
const LOG_RETENTION_DAYS: i64 = 7;

/// Timestamps in the host's local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Keeps the file writer alive; dropping it flushes and stops file logging.
pub struct LoggingGuard {
    _guard: WorkerGuard,
    log_dir: PathBuf,
}

impl LoggingGuard {
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Spawn the daily task that deletes log files older than 7 days.
    ///
    /// One pass runs immediately.
    pub fn start_retention_cleanup(&self, cancel_token: CancellationToken) -> JoinHandle<()> {
        let log_dir = self.log_dir.clone();

        tokio::spawn(async move {
            let cleanup_interval = Duration::from_secs(24 * 60 * 60);

            loop {
                if let Err(e) = cleanup_old_logs(&log_dir, Local::now().date_naive()).await {
                    warn!(error = %e, "Failed to clean up old logs");
                }

                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Log retention task shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(cleanup_interval) => {}
                }
            }
        })
    }
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the lifetime of the process.
pub fn init_logging(log_dir: &Path) -> crate::Result<LoggingGuard> {
    fs::ensure_dir_all_sync_with_op("creating log directory", log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer),
        )
        .try_init()
        .map_err(|e| crate::Error::Other(format!("Failed to set global default subscriber: {e}")))?;

    Ok(LoggingGuard {
        _guard: guard,
        log_dir: log_dir.to_path_buf(),
    })
}

/// Date encoded in a rolled log file name, if it is one of ours.
fn log_file_date(file_name: &str) -> Option<NaiveDate> {
    let date = file_name.strip_prefix(LOG_FILE_PREFIX)?.strip_prefix('.')?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Delete rolled log files dated before the retention window. Returns the count.
async fn cleanup_old_logs(log_dir: &Path, today: NaiveDate) -> std::io::Result<usize> {
    let cutoff = today - chrono::Duration::days(LOG_RETENTION_DAYS);

    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted_count = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() {
            continue;
        }

        let Some(file_date) = path.file_name().and_then(|n| n.to_str()).and_then(log_file_date)
        else {
            continue;
        };

        if file_date < cutoff {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    deleted_count += 1;
                    debug!(path = %path.display(), "Deleted old log file");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete old log file"),
            }
        }
    }

    if deleted_count > 0 {
        info!(count = deleted_count, "Cleaned up old log files");
    }

    Ok(deleted_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_filter() {
        assert!(DEFAULT_LOG_FILTER.contains("live_keeper=info"));
    }

    #[test]
    fn test_log_file_date() {
        assert_eq!(
            log_file_date("live-keeper.log.2024-03-01"),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
        assert_eq!(log_file_date("live-keeper.log"), None);
        assert_eq!(log_file_date("live-keeper.log.garbage"), None);
        assert_eq!(log_file_date("other.log.2024-03-01"), None);
    }

    #[tokio::test]
    async fn test_cleanup_old_logs_keeps_recent_and_foreign_files() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        for name in [
            "live-keeper.log.2024-03-01",
            "live-keeper.log.2024-03-05",
            "live-keeper.log.2024-03-10",
            "notes.txt",
        ] {
            std::fs::write(dir.join(name), b"x").unwrap();
        }

        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let deleted = cleanup_old_logs(dir, today).await.unwrap();

        assert_eq!(deleted, 1);
        assert!(!dir.join("live-keeper.log.2024-03-01").exists());
        assert!(dir.join("live-keeper.log.2024-03-05").exists());
        assert!(dir.join("live-keeper.log.2024-03-10").exists());
        assert!(dir.join("notes.txt").exists());
    }
}
