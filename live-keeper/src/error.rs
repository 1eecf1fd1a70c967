//! Application-wide error types.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error while {op} {}: {source}", path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn spawn(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// The underlying IO error kind, if this error wraps one.
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            Self::IoPath { source, .. } => Some(source.kind()),
            Self::Io(e) => Some(e.kind()),
            Self::Spawn { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}
