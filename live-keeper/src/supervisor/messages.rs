//! Supervisor mailbox messages and run outcomes.

use tokio::sync::oneshot;

use super::state::SourceSnapshot;

/// Messages accepted by a channel supervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Stop polling. With `force`, running captures are terminated; otherwise
    /// they are left to finish on their own before the supervisor exits.
    Stop { force: bool },
    /// Query current state (response sent via oneshot channel).
    GetState(oneshot::Sender<SourceSnapshot>),
}

/// Outcome of a supervisor's run loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorOutcome {
    /// Stopped through its mailbox.
    Stopped,
    /// Stopped through its cancellation token.
    Cancelled,
}

/// Error type for supervisor runs.
#[derive(Debug, Clone)]
pub struct ActorError {
    pub message: String,
    /// Whether restarting the supervisor may help.
    pub recoverable: bool,
}

impl ActorError {
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            recoverable: true,
        }
    }
}

impl std::fmt::Display for ActorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ActorError {}

impl From<crate::Error> for ActorError {
    fn from(err: crate::Error) -> Self {
        ActorError::recoverable(err.to_string())
    }
}

pub type ActorResult = Result<ActorOutcome, ActorError>;
