mod handler;
mod message;
mod transport;

pub use handler::{ws_handler, USER_ID_HEADER};
pub use message::{ClientMessage, ServerMessage};
pub use transport::ChannelTransport;
