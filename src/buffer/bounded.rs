//! Byte- and count-bounded FIFO staging buffer for outbound messages.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::config::BufferConfig;
use crate::metrics::BufferMetrics;

use super::compression::{compress, decompress};
use super::BufferedMessage;

/// Default size above which payloads are offered to the compressor
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024;

/// Snapshot of buffer occupancy and drop counters
#[derive(Debug, Clone, Serialize)]
pub struct BufferUsage {
    pub current_size: usize,
    pub max_size: usize,
    pub utilization_percent: f64,
    pub message_count: usize,
    pub max_messages: usize,
    pub total_processed: u64,
    pub messages_dropped: u64,
    pub messages_evicted: u64,
    pub messages_compressed: u64,
    /// Dropped / processed, in `0.0..=1.0`
    pub drop_rate: f64,
}

#[derive(Debug, Default)]
struct BufferState {
    messages: VecDeque<BufferedMessage>,
    /// Sum of `size()` over `messages`
    current_size: usize,
    total_processed: u64,
    messages_dropped: u64,
    messages_evicted: u64,
    messages_compressed: u64,
}

impl BufferState {
    fn pop_oldest(&mut self) -> Option<BufferedMessage> {
        let message = self.messages.pop_front()?;
        self.current_size -= message.size();
        self.messages_evicted += 1;
        Some(message)
    }

    /// Evict from the head until `needed` more bytes fit or nothing is left.
    /// Returns the number of bytes freed.
    fn free_memory_space(&mut self, needed: usize, max_size: usize) -> usize {
        let mut freed = 0;
        while self.current_size + needed > max_size {
            match self.pop_oldest() {
                Some(evicted) => freed += evicted.size(),
                None => break,
            }
        }
        freed
    }
}

/// Outbound staging area with a hard byte budget and a message-count cap.
///
/// Eviction is strictly oldest-first. Queue and byte total share one lock, so
/// concurrent producers cannot observe or create drift between them.
pub struct BoundedMessageBuffer {
    max_size_bytes: usize,
    max_messages: usize,
    compression_threshold_bytes: usize,
    compression_enabled: bool,
    state: Mutex<BufferState>,
}

impl BoundedMessageBuffer {
    pub fn new(max_size_bytes: usize, max_messages: usize) -> Self {
        Self::with_compression(
            max_size_bytes,
            max_messages,
            DEFAULT_COMPRESSION_THRESHOLD,
            true,
        )
    }

    pub fn with_compression(
        max_size_bytes: usize,
        max_messages: usize,
        compression_threshold_bytes: usize,
        compression_enabled: bool,
    ) -> Self {
        Self {
            max_size_bytes,
            max_messages,
            compression_threshold_bytes,
            compression_enabled,
            state: Mutex::new(BufferState::default()),
        }
    }

    pub fn from_config(config: &BufferConfig) -> Self {
        Self::with_compression(
            config.max_size_bytes,
            config.max_messages,
            config.compression_threshold_bytes,
            config.compression_enabled,
        )
    }

    /// Serialize `content` once as JSON and stage it.
    ///
    /// Returns false when the message cannot be held (backpressure).
    pub fn add_message<T: Serialize + ?Sized>(&self, content: &T, compress: bool) -> bool {
        match serde_json::to_vec(content) {
            Ok(bytes) => self.add_bytes(bytes, compress),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize message for buffering");
                if let Some(mut state) = self.lock() {
                    state.total_processed += 1;
                    state.messages_dropped += 1;
                }
                BufferMetrics::record_dropped();
                false
            }
        }
    }

    /// Stage an already-serialized payload.
    pub fn add_bytes(&self, payload: Vec<u8>, compress: bool) -> bool {
        // Compression runs outside the lock
        let message = self.prepare(payload, compress);
        let size = message.size();
        let compressed = message.is_compressed();

        let Some(mut state) = self.lock() else {
            return false;
        };
        state.total_processed += 1;

        if self.max_messages == 0 {
            state.messages_dropped += 1;
            BufferMetrics::record_dropped();
            tracing::warn!(size = size, "Buffer holds no messages, dropped");
            return false;
        }

        let evicted_before = state.messages_evicted;
        if state.current_size + size > self.max_size_bytes {
            let freed = state.free_memory_space(size, self.max_size_bytes);
            tracing::debug!(
                freed = freed,
                needed = size,
                current_size = state.current_size,
                "Evicted oldest buffered messages to make room"
            );
        }

        // Buffer is empty here; the message alone exceeds the budget
        if state.current_size + size > self.max_size_bytes {
            state.messages_dropped += 1;
            BufferMetrics::record_dropped();
            BufferMetrics::record_evicted(state.messages_evicted - evicted_before);
            BufferMetrics::set_usage(state.current_size, state.messages.len());
            tracing::warn!(
                size = size,
                max_size = self.max_size_bytes,
                "Message larger than buffer capacity, dropped"
            );
            return false;
        }

        if state.messages.len() >= self.max_messages {
            state.pop_oldest();
        }

        state.messages.push_back(message);
        state.current_size += size;
        if compressed {
            state.messages_compressed += 1;
        }

        BufferMetrics::record_evicted(state.messages_evicted - evicted_before);
        BufferMetrics::set_usage(state.current_size, state.messages.len());
        true
    }

    /// Drain up to `count` messages (all when `None`), oldest first.
    pub fn get_messages(&self, count: Option<usize>, decompress_content: bool) -> Vec<Vec<u8>> {
        let drained: Vec<BufferedMessage> = {
            let Some(mut state) = self.lock() else {
                return Vec::new();
            };
            let take = count
                .unwrap_or(state.messages.len())
                .min(state.messages.len());
            let drained: Vec<BufferedMessage> = state.messages.drain(..take).collect();
            let drained_bytes: usize = drained.iter().map(BufferedMessage::size).sum();
            state.current_size -= drained_bytes;
            BufferMetrics::set_usage(state.current_size, state.messages.len());
            drained
        };

        drained
            .into_iter()
            .map(|message| {
                if decompress_content && message.is_compressed() {
                    match decompress(message.content()) {
                        Ok(content) => content,
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to decompress buffered message, returning raw content");
                            message.into_content()
                        }
                    }
                } else {
                    message.into_content()
                }
            })
            .collect()
    }

    /// Drop everything. Returns the number of messages discarded.
    pub fn clear(&self) -> usize {
        let Some(mut state) = self.lock() else {
            return 0;
        };
        let cleared = state.messages.len();
        state.messages.clear();
        state.current_size = 0;
        BufferMetrics::set_usage(0, 0);

        if cleared > 0 {
            tracing::info!(cleared = cleared, "Message buffer cleared");
        }
        cleared
    }

    /// Release spare queue capacity. Returns an estimate of bytes freed.
    pub fn reclaim(&self) -> usize {
        let Some(mut state) = self.lock() else {
            return 0;
        };
        let before = state.messages.capacity();
        state.messages.shrink_to_fit();
        let after = state.messages.capacity();
        (before - after) * std::mem::size_of::<BufferedMessage>()
    }

    pub fn memory_usage(&self) -> BufferUsage {
        let state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };

        let utilization_percent = if self.max_size_bytes > 0 {
            state.current_size as f64 / self.max_size_bytes as f64 * 100.0
        } else {
            0.0
        };
        let drop_rate = if state.total_processed > 0 {
            state.messages_dropped as f64 / state.total_processed as f64
        } else {
            0.0
        };

        BufferUsage {
            current_size: state.current_size,
            max_size: self.max_size_bytes,
            utilization_percent,
            message_count: state.messages.len(),
            max_messages: self.max_messages,
            total_processed: state.total_processed,
            messages_dropped: state.messages_dropped,
            messages_evicted: state.messages_evicted,
            messages_compressed: state.messages_compressed,
            drop_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map(|state| state.messages.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current_size(&self) -> usize {
        self.lock().map(|state| state.current_size).unwrap_or(0)
    }

    fn prepare(&self, payload: Vec<u8>, compress_requested: bool) -> BufferedMessage {
        if compress_requested
            && self.compression_enabled
            && payload.len() > self.compression_threshold_bytes
        {
            match compress(&payload) {
                // Keep the compressed form only if it actually saves space
                Ok(packed) if packed.len() < payload.len() => {
                    return BufferedMessage::new(packed, true);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "Compression failed, storing uncompressed");
                }
            }
        }
        BufferedMessage::new(payload, false)
    }

    fn lock(&self) -> Option<MutexGuard<'_, BufferState>> {
        match self.state.lock() {
            Ok(state) => Some(state),
            Err(_) => {
                tracing::error!("Message buffer lock poisoned");
                None
            }
        }
    }
}
