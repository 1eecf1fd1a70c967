//! Per-source capture supervisors and the pool that owns them.
//!
//! Each configured source gets one [`ChannelSupervisor`] actor. The actor
//! polls the source, starts the media and chat captures when it goes live,
//! and respawns crashed captures with backoff. [`SupervisorPool`] keeps the
//! set of actors in line with the source list.

pub mod channel;
pub mod handle;
pub mod messages;
pub mod pool;
pub mod state;

pub use channel::{ChannelSupervisor, SupervisorConfig};
pub use handle::{SendError, SupervisorHandle};
pub use messages::{ActorError, ActorOutcome, ActorResult, SupervisorMessage};
pub use pool::{ReconcileReport, ShutdownReport, SupervisorExit, SupervisorPool};
pub use state::{CrashDecision, Phase, SourceSnapshot, SourceState};
