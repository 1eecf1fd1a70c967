//! Filesystem helpers shared across modules.
//!
//! These helpers provide consistent error context (operation + path) and
//! reduce duplicated `create_dir_all` boilerplate.

use std::path::Path;

use crate::{Error, Result};

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all_with_op(op: &'static str, path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| io_error(op, path, e))
}

/// Ensure a directory exists (synchronous variant) with a custom operation label.
pub fn ensure_dir_all_sync_with_op(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| io_error(op, path, e))
}

/// Check that a directory accepts new files by creating and removing a probe file.
///
/// The directory is created first if it does not exist.
pub async fn probe_writable_dir(path: &Path) -> Result<()> {
    ensure_dir_all_with_op("creating directory", path).await?;

    let probe = path.join(format!(".live-keeper-probe-{}", std::process::id()));
    tokio::fs::write(&probe, b"")
        .await
        .map_err(|e| io_error("probing write access to", path, e))?;
    tokio::fs::remove_file(&probe)
        .await
        .map_err(|e| io_error("removing write probe", &probe, e))
}
