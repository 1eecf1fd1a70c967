//! Source list loading and validation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{AuthMethod, Source};
use crate::utils::filename::is_safe_component;
use crate::utils::fs::probe_writable_dir;
use crate::{Error, Result};

/// One entry of the source list file, as written by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEntry {
    pub name: String,
    /// Destination directory.
    pub target: PathBuf,
    #[serde(default, rename = "members-only")]
    pub members_only: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelListFile {
    #[serde(default)]
    channels: Vec<ChannelEntry>,
}

/// A configured source that was excluded, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedSource {
    pub name: String,
    pub reason: String,
}

/// Validated sources, ordered by name, plus the entries that were excluded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceList {
    pub sources: Vec<Source>,
    pub rejected: Vec<RejectedSource>,
}

impl SourceList {
    pub fn get(&self, name: &str) -> Option<&Source> {
        self.sources
            .binary_search_by(|s| s.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.sources[i])
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|s| s.name.as_str())
    }
}

/// Parse the YAML source list.
///
/// An empty document is an empty list.
pub fn parse_channel_list(text: &str) -> Result<Vec<ChannelEntry>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let file: ChannelListFile = serde_yaml::from_str(text)?;
    Ok(file.channels)
}

/// Read and parse the source list file.
pub async fn load_channel_list(path: &Path) -> Result<Vec<ChannelEntry>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::io_path("reading source list", path, e))?;
    parse_channel_list(&text)
}

/// Turn raw entries into sources, excluding invalid ones.
///
/// Exclusions: empty or unsafe names, duplicate names (the first entry wins),
/// members-only sources without credentials, and destinations that cannot be
/// created or written. Creates the destination directories as a side effect.
pub async fn build_sources(
    entries: &[ChannelEntry],
    scratch_root: &Path,
    auth: &AuthMethod,
) -> SourceList {
    let mut seen = HashSet::new();
    let mut list = SourceList::default();

    for entry in entries {
        let name = entry.name.trim();
        if let Err(e) = validate_entry(entry, name, auth, &seen).await {
            warn!(source = %entry.name, error = %e, "Excluding source");
            list.rejected.push(RejectedSource {
                name: entry.name.clone(),
                reason: e.to_string(),
            });
            continue;
        }
        seen.insert(name.to_string());
        list.sources.push(Source::new(
            name,
            entry.target.clone(),
            scratch_root,
            entry.members_only,
        ));
    }

    list.sources.sort_by(|a, b| a.name.cmp(&b.name));
    list
}

async fn validate_entry(
    entry: &ChannelEntry,
    name: &str,
    auth: &AuthMethod,
    seen: &HashSet<String>,
) -> Result<()> {
    if name.is_empty() {
        return Err(Error::config("source name is empty"));
    }
    if !is_safe_component(name) {
        return Err(Error::config(format!(
            "source name {name:?} cannot be used as a directory name"
        )));
    }
    if seen.contains(name) {
        return Err(Error::config(format!("duplicate source name {name:?}")));
    }
    if entry.members_only && !auth.is_authenticated() {
        return Err(Error::config(
            "members-only source requires --cookies or --cookies-from-browser",
        ));
    }
    if entry.target.as_os_str().is_empty() {
        return Err(Error::config("destination path is empty"));
    }
    probe_writable_dir(&entry.target).await
}
