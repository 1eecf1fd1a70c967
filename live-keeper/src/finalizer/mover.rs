//! Moving stable scratch files into their destination directory.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;
use tokio::time::Instant;
use tracing::debug;

use crate::config::CollisionPolicy;
use crate::utils::filename::numbered_name;
use crate::utils::fs::{ensure_dir_all_with_op, io_error};
use crate::{Error, Result};

/// Upper bound on `<stem> (n)` candidates tried for one file.
const MAX_RENAME_ATTEMPTS: u32 = 10_000;

/// Move `src` into `dest_dir`, keeping its file name.
///
/// An existing destination file is never overwritten: under
/// [`CollisionPolicy::Rename`] the first free `<stem> (n)<ext>` is used,
/// under [`CollisionPolicy::Fail`] an `AlreadyExists` error is returned.
/// Returns the final destination path.
pub async fn move_file(src: &Path, dest_dir: &Path, policy: CollisionPolicy) -> Result<PathBuf> {
    let file_name = src
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::validation(format!("not a movable file: {}", src.display())))?;

    ensure_dir_all_with_op("creating destination directory", dest_dir).await?;
    let target = resolve_target(dest_dir, file_name, policy).await?;

    match fs::rename(src, &target).await {
        Ok(()) => Ok(target),
        Err(e) if is_cross_device(&e) => {
            debug!(src = %src.display(), dest = %target.display(), "Cross-device move, copying");
            copy_then_remove(src, &target).await?;
            Ok(target)
        }
        Err(e) => Err(io_error("moving", src, e)),
    }
}

async fn resolve_target(dest_dir: &Path, file_name: &str, policy: CollisionPolicy) -> Result<PathBuf> {
    let target = dest_dir.join(file_name);
    if !exists(&target).await? {
        return Ok(target);
    }

    match policy {
        CollisionPolicy::Fail => Err(io_error(
            "moving to",
            &target,
            io::Error::new(io::ErrorKind::AlreadyExists, "destination file exists"),
        )),
        CollisionPolicy::Rename => {
            for n in 1..=MAX_RENAME_ATTEMPTS {
                let candidate = dest_dir.join(numbered_name(file_name, n));
                if !exists(&candidate).await? {
                    return Ok(candidate);
                }
            }
            Err(io_error(
                "moving to",
                &target,
                io::Error::new(io::ErrorKind::AlreadyExists, "no free numbered name"),
            ))
        }
    }
}

async fn exists(path: &Path) -> Result<bool> {
    fs::try_exists(path)
        .await
        .map_err(|e| io_error("checking", path, e))
}

fn is_cross_device(e: &io::Error) -> bool {
    if e.kind() == io::ErrorKind::CrossesDevices {
        return true;
    }
    // EXDEV on unix, ERROR_NOT_SAME_DEVICE on windows
    if cfg!(windows) {
        e.raw_os_error() == Some(17)
    } else {
        e.raw_os_error() == Some(18)
    }
}

/// Copy `src` to `target`, verify the size, then remove `src`.
///
/// On any failure the partial copy is removed and `src` is left in place.
pub(crate) async fn copy_then_remove(src: &Path, target: &Path) -> Result<()> {
    let src_size = fs::metadata(src)
        .await
        .map_err(|e| io_error("reading metadata of", src, e))?
        .len();

    if let Err(e) = fs::copy(src, target).await {
        let _ = fs::remove_file(target).await;
        return Err(io_error("copying", src, e));
    }

    let dest_size = match fs::metadata(target).await {
        Ok(meta) => meta.len(),
        Err(e) => {
            let _ = fs::remove_file(target).await;
            return Err(io_error("reading metadata of", target, e));
        }
    };
    if dest_size != src_size {
        let _ = fs::remove_file(target).await;
        return Err(Error::Other(format!(
            "size mismatch after copying {}: source {src_size} bytes, destination {dest_size} bytes",
            src.display()
        )));
    }

    if let Err(e) = fs::remove_file(src).await {
        // Keep a single copy so the next attempt does not duplicate it.
        let _ = fs::remove_file(target).await;
        return Err(io_error("removing moved file", src, e));
    }
    Ok(())
}

/// Rate limit for repeated failure logs of the same path.
#[derive(Debug)]
pub struct FailureThrottle {
    interval: Duration,
    last_logged: HashMap<PathBuf, Instant>,
}

impl FailureThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_logged: HashMap::new(),
        }
    }

    /// Whether a failure for `path` at `now` should be logged loudly.
    pub fn should_warn(&mut self, path: &Path, now: Instant) -> bool {
        match self.last_logged.get(path) {
            Some(last) if now.duration_since(*last) < self.interval => false,
            _ => {
                self.last_logged.insert(path.to_path_buf(), now);
                true
            }
        }
    }

    /// Forget `path` after it succeeded or disappeared.
    pub fn clear(&mut self, path: &Path) {
        self.last_logged.remove(path);
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&Path) -> bool) {
        self.last_logged.retain(|path, _| keep(path));
    }
}
