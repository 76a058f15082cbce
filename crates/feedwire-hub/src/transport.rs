//! What the hub needs from a session's connection.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::DeliveryError;

/// Outbound half of a session connection.
///
/// `send` must not block: the hub calls it while holding the registry lock.
pub trait SessionTransport: Send + Sync {
    /// Queue a serialized frame for the peer.
    fn send(&self, frame: Arc<String>) -> Result<(), DeliveryError>;
    /// Ask the connection to close. Idempotent.
    fn close(&self);
}

/// A [`SessionTransport`] backed by a bounded channel.
///
/// The connection task owns the receiver and the close token, and forwards
/// frames to the socket until the token is cancelled.
pub struct ChannelTransport {
    tx: mpsc::Sender<Arc<String>>,
    closed: CancellationToken,
}

impl ChannelTransport {
    /// Create a transport with a `buffer`-frame outbound queue.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Arc<String>>, CancellationToken) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let closed = CancellationToken::new();
        let transport = Self {
            tx,
            closed: closed.clone(),
        };
        (transport, rx, closed)
    }
}

impl SessionTransport for ChannelTransport {
    fn send(&self, frame: Arc<String>) -> Result<(), DeliveryError> {
        if self.closed.is_cancelled() {
            return Err(DeliveryError::Closed);
        }
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    fn close(&self) {
        self.closed.cancel();
    }
}
