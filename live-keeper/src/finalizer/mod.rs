//! Relocation of finished captures from scratch to destination.
//!
//! The scratch directory is the only hand-off between capture and
//! finalization: a file is finished once its size holds across two scans.

pub mod mover;
pub mod render;
pub mod service;
pub mod table;

pub use mover::{FailureThrottle, move_file};
pub use render::{RenderOutcome, RenderTrigger};
pub use service::{Finalizer, ScanReport};
pub use table::{FileObservation, FileObservationTable, Observed};
