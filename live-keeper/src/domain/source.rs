//! A monitored live channel and how captures authenticate against it.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One monitored channel.
///
/// Immutable once built from configuration; a reload replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Channel handle, also used as the scratch directory name.
    pub name: String,
    /// Permanent storage for finished captures.
    pub destination: PathBuf,
    /// Per-source write area for in-progress captures.
    pub scratch_dir: PathBuf,
    /// Captures need an authenticated session.
    pub members_only: bool,
}

impl Source {
    pub fn new(
        name: impl Into<String>,
        destination: impl Into<PathBuf>,
        scratch_root: &Path,
        members_only: bool,
    ) -> Self {
        let name = name.into();
        let scratch_dir = scratch_root.join(&name);
        Self {
            name,
            destination: destination.into(),
            scratch_dir,
            members_only,
        }
    }

    /// The page the status probe and the capture tool are pointed at.
    pub fn live_url(&self) -> String {
        format!("https://www.youtube.com/@{}/live", self.name)
    }

    /// The channel's streams tab, which lists scheduled events.
    pub fn streams_url(&self) -> String {
        format!("https://www.youtube.com/@{}/streams", self.name)
    }
}

/// How capture and probe invocations authenticate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    #[default]
    None,
    /// Netscape-format cookie file.
    CookieFile(PathBuf),
    /// Browser whose cookie store the capture tool reads directly.
    Browser(String),
}

impl AuthMethod {
    /// Pick the authentication method; a browser wins over a cookie file.
    pub fn from_options(cookies: Option<PathBuf>, browser: Option<String>) -> Self {
        match (browser, cookies) {
            (Some(browser), _) if !browser.trim().is_empty() => Self::Browser(browser),
            (_, Some(path)) => Self::CookieFile(path),
            _ => Self::None,
        }
    }

    /// Drop a cookie file that does not exist, so captures run unauthenticated.
    pub fn resolve(self) -> Self {
        match self {
            Self::CookieFile(path) if !path.is_file() => {
                tracing::warn!(
                    path = %path.display(),
                    "Cookie file not found, continuing without cookies"
                );
                Self::None
            }
            other => other,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Command-line arguments passed to the capture tool unchanged.
    pub fn args(&self) -> Vec<OsString> {
        match self {
            Self::None => Vec::new(),
            Self::CookieFile(path) => vec!["--cookies".into(), path.clone().into_os_string()],
            Self::Browser(browser) => vec!["--cookies-from-browser".into(), browser.into()],
        }
    }
}
