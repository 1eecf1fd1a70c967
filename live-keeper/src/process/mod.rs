//! Capture child-process management.

pub mod handle;

pub use handle::{CaptureKind, ChildProcessHandle, ExitOutcome};
