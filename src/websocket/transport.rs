//! mpsc-backed `ConnectionTransport` for axum WebSocket sockets

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::connection_manager::{ConnectionState, ConnectionTransport, TransportError};

/// Hands payloads to the socket writer task through a bounded channel.
///
/// The writer owns the receiving end; once it exits the channel closes and
/// the transport reports `Closed`.
pub struct ChannelTransport {
    id: String,
    sender: mpsc::Sender<Vec<u8>>,
    closing: AtomicBool,
}

impl ChannelTransport {
    /// New transport with a random id
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Vec<u8>>) {
        Self::with_id(Uuid::new_v4().to_string(), capacity)
    }

    pub fn with_id(id: impl Into<String>, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Vec<u8>>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let transport = Arc::new(Self {
            id: id.into(),
            sender,
            closing: AtomicBool::new(false),
        });
        (transport, receiver)
    }

    /// Mark the connection as closing; further sends are refused
    pub fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectionTransport for ChannelTransport {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> ConnectionState {
        if self.sender.is_closed() {
            ConnectionState::Closed
        } else if self.closing.load(Ordering::SeqCst) {
            ConnectionState::Closing
        } else {
            ConnectionState::Connected
        }
    }

    async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        if self.state() != ConnectionState::Connected {
            return Err(TransportError::Closed);
        }
        self.sender
            .send(payload.to_vec())
            .await
            .map_err(|_| TransportError::Closed)
    }
}
