use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::events::{ConnectionId, ServerEvent};

/// Default number of queued outbound events per connection (prevents memory
/// exhaustion from slow clients).
pub const MAX_OUTBOUND_QUEUE: usize = 1024;

/// Why an event could not be handed to a connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("outbound queue full")]
    QueueFull,
    #[error("connection closed")]
    Closed,
}

/// Delivery handle for one connected client. The socket itself belongs to the
/// transport task; the engine only holds the sending half of its queue.
#[derive(Debug)]
pub struct UserSession {
    pub id: ConnectionId,
    outbound: mpsc::Sender<ServerEvent>,
}

impl UserSession {
    pub fn new(id: ConnectionId, outbound: mpsc::Sender<ServerEvent>) -> Self {
        Self { id, outbound }
    }

    /// Queue an event without waiting. A full queue drops the event rather than
    /// blocking the caller.
    pub fn send(&self, event: ServerEvent) -> Result<(), DeliveryError> {
        self.outbound.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::QueueFull,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}
