//! Bounded outbound message staging.
//!
//! Messages are serialized once, optionally deflated when that saves space,
//! and held in strict FIFO order under a byte budget and a count cap.

mod bounded;
mod compression;
mod message;

pub use bounded::{BoundedMessageBuffer, BufferUsage, DEFAULT_COMPRESSION_THRESHOLD};
pub use compression::{compress, decompress};
pub use message::BufferedMessage;
