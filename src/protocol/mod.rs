//! Command channel: typed wire messages and framed transport.

pub mod channel;
pub mod message;

pub use channel::{read_message, write_message, Channel};
pub use message::{Message, MessageCode, MAX_FRAME_SIZE, PROTOCOL_VERSION};
