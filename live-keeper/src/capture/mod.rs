//! Capture tool boundary: status probing and capture process launching.

pub mod command;
pub mod launcher;
pub mod probe;

pub use launcher::{CaptureLauncher, YtDlpLauncher};
pub use probe::{CheckError, LiveEvent, LiveStatus, StatusProbe, YtDlpProbe};
