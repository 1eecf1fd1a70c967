//! Handle for sending messages to a channel supervisor.

use std::fmt;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::messages::SupervisorMessage;
use super::state::SourceSnapshot;
use crate::domain::Source;

/// Default mailbox capacity for supervisors.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 32;

/// Default timeout for send operations when the mailbox is full.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(100);

/// Error type for send operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The supervisor has stopped and is no longer accepting messages.
    ActorStopped,
    /// The mailbox stayed full for the whole send timeout.
    Timeout,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::ActorStopped => write!(f, "Supervisor has stopped"),
            SendError::Timeout => write!(f, "Send operation timed out"),
        }
    }
}

impl std::error::Error for SendError {}

/// A handle to one running channel supervisor.
#[derive(Clone)]
pub struct SupervisorHandle {
    sender: mpsc::Sender<SupervisorMessage>,
    cancellation_token: CancellationToken,
    /// Definition the supervisor was started with.
    pub source: Source,
}

impl fmt::Debug for SupervisorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorHandle")
            .field("source", &self.source.name)
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl SupervisorHandle {
    pub fn new(
        sender: mpsc::Sender<SupervisorMessage>,
        cancellation_token: CancellationToken,
        source: Source,
    ) -> Self {
        Self {
            sender,
            cancellation_token,
            source,
        }
    }

    pub fn name(&self) -> &str {
        &self.source.name
    }

    /// Send a message, waiting up to [`DEFAULT_SEND_TIMEOUT`] if the mailbox is full.
    pub async fn send(&self, msg: SupervisorMessage) -> Result<(), SendError> {
        match self.sender.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(msg)) => {
                match tokio::time::timeout(DEFAULT_SEND_TIMEOUT, self.sender.reserve()).await {
                    Ok(Ok(permit)) => {
                        permit.send(msg);
                        Ok(())
                    }
                    Ok(Err(_)) => Err(SendError::ActorStopped),
                    Err(_) => Err(SendError::Timeout),
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::ActorStopped),
        }
    }

    pub async fn stop(&self, force: bool) -> Result<(), SendError> {
        self.send(SupervisorMessage::Stop { force }).await
    }

    /// Ask the supervisor for a snapshot of its state.
    pub async fn get_state(&self) -> Result<SourceSnapshot, SendError> {
        let (tx, rx) = oneshot::channel();
        self.send(SupervisorMessage::GetState(tx)).await?;
        rx.await.map_err(|_| SendError::ActorStopped)
    }

    /// Cancel the supervisor; running captures are terminated.
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
