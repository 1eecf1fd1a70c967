//! Size observations of scratch files across finalizer scans.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tokio::time::Instant;

/// Last observation of one scratch file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileObservation {
    pub size: u64,
    /// When `size` was first seen.
    pub seen_at: Instant,
    /// Same size on two consecutive scans.
    pub stable: bool,
}

/// What a scan learned about a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observed {
    /// First sighting.
    New,
    /// Size differs from the previous scan.
    Changed { previous: u64 },
    /// Size unchanged since the previous scan.
    Stable,
}

/// Observations keyed by scratch path.
///
/// Owned by the finalizer loop alone, so one path is never evaluated twice
/// at the same time.
#[derive(Debug, Default)]
pub struct FileObservationTable {
    entries: HashMap<PathBuf, FileObservation>,
}

impl FileObservationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the size of `path` seen at `now`.
    pub fn observe(&mut self, path: &Path, size: u64, now: Instant) -> Observed {
        match self.entries.get_mut(path) {
            None => {
                self.entries.insert(
                    path.to_path_buf(),
                    FileObservation {
                        size,
                        seen_at: now,
                        stable: false,
                    },
                );
                Observed::New
            }
            Some(entry) if entry.size == size => {
                entry.stable = true;
                Observed::Stable
            }
            Some(entry) => {
                let previous = entry.size;
                *entry = FileObservation {
                    size,
                    seen_at: now,
                    stable: false,
                };
                Observed::Changed { previous }
            }
        }
    }

    pub fn get(&self, path: &Path) -> Option<&FileObservation> {
        self.entries.get(path)
    }

    /// Forget `path`, typically after it was moved.
    pub fn remove(&mut self, path: &Path) -> Option<FileObservation> {
        self.entries.remove(path)
    }

    /// Observed paths directly under `dir`.
    pub fn paths_in<'a>(&'a self, dir: &'a Path) -> impl Iterator<Item = &'a PathBuf> + 'a {
        self.entries
            .keys()
            .filter(move |path| path.parent() == Some(dir))
    }

    /// Drop observations of paths not in `seen`. Returns how many were dropped.
    pub fn retain_seen(&mut self, seen: &HashSet<PathBuf>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|path, _| seen.contains(path));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_stable_on_second_equal_reading() {
        let mut table = FileObservationTable::new();
        let path = Path::new("/scratch/A/x.mp4");
        let t0 = Instant::now();

        assert_eq!(table.observe(path, 100, t0), Observed::New);
        assert!(!table.get(path).unwrap().stable);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(table.observe(path, 100, Instant::now()), Observed::Stable);
        let entry = table.get(path).unwrap();
        assert!(entry.stable);
        assert_eq!(entry.seen_at, t0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_growth_resets_observation() {
        let mut table = FileObservationTable::new();
        let path = Path::new("/scratch/A/x.mp4");

        table.observe(path, 100, Instant::now());
        tokio::time::advance(Duration::from_secs(30)).await;
        let t1 = Instant::now();
        assert_eq!(
            table.observe(path, 250, t1),
            Observed::Changed { previous: 100 }
        );
        let entry = table.get(path).unwrap();
        assert!(!entry.stable);
        assert_eq!(entry.size, 250);
        assert_eq!(entry.seen_at, t1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stable_file_that_changes_is_unstable_again() {
        let mut table = FileObservationTable::new();
        let path = Path::new("/scratch/A/x.mp4");
        let now = Instant::now();

        table.observe(path, 100, now);
        table.observe(path, 100, now);
        assert!(table.get(path).unwrap().stable);

        table.observe(path, 120, now);
        assert!(!table.get(path).unwrap().stable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retain_seen_drops_vanished_paths() {
        let mut table = FileObservationTable::new();
        let now = Instant::now();
        let kept = PathBuf::from("/scratch/A/a.mp4");
        let gone = PathBuf::from("/scratch/B/b.mp4");
        table.observe(&kept, 1, now);
        table.observe(&gone, 2, now);

        let seen: HashSet<PathBuf> = [kept.clone()].into_iter().collect();
        assert_eq!(table.retain_seen(&seen), 1);
        assert_eq!(table.len(), 1);
        assert!(table.get(&kept).is_some());
        assert!(table.get(&gone).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_paths_in_matches_direct_children_only() {
        let mut table = FileObservationTable::new();
        let now = Instant::now();
        table.observe(Path::new("/scratch/A/a.mp4"), 1, now);
        table.observe(Path::new("/scratch/AB/b.mp4"), 1, now);
        table.observe(Path::new("/scratch/A/sub/c.mp4"), 1, now);

        let paths: Vec<_> = table.paths_in(Path::new("/scratch/A")).collect();
        assert_eq!(paths, vec![&PathBuf::from("/scratch/A/a.mp4")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_path_is_fresh_on_next_sighting() {
        let mut table = FileObservationTable::new();
        let path = Path::new("/scratch/A/x.mp4");
        let now = Instant::now();
        table.observe(path, 100, now);
        table.observe(path, 100, now);

        assert!(table.remove(path).is_some());
        assert!(table.is_empty());
        assert_eq!(table.observe(path, 100, now), Observed::New);
    }
}
