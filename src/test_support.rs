//! Test doubles shared by unit tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::connection_manager::{ConnectionState, ConnectionTransport, TransportError};

/// In-memory transport with a settable state and an optional failure switch
pub struct MockTransport {
    id: String,
    state: AtomicU8,
    fail_sends: AtomicBool,
    send_delay_ms: AtomicU64,
    sends: AtomicUsize,
    payloads: Mutex<Vec<Vec<u8>>>,
}

impl MockTransport {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            state: AtomicU8::new(0),
            fail_sends: AtomicBool::new(false),
            send_delay_ms: AtomicU64::new(0),
            sends: AtomicUsize::new(0),
            payloads: Mutex::new(Vec::new()),
        }
    }

    pub fn set_state(&self, state: ConnectionState) {
        let raw = match state {
            ConnectionState::Connected => 0,
            ConnectionState::Closing => 1,
            ConnectionState::Closed => 2,
        };
        self.state.store(raw, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Make every send sleep before completing
    pub fn set_send_delay(&self, delay: Duration) {
        self.send_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of send attempts, successful or not
    pub fn send_attempts(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ConnectionTransport for MockTransport {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::SeqCst) {
            0 => ConnectionState::Connected,
            1 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }

    async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        let delay = self.send_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Send("injected failure".into()));
        }
        if let Ok(mut payloads) = self.payloads.lock() {
            payloads.push(payload.to_vec());
        }
        Ok(())
    }
}
