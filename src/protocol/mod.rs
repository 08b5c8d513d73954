//! Wire protocol: the message type and its codec.

pub mod codec;
mod message;

pub use codec::{read_message, FramingError, MessageCodec, HEADER_LEN, TERMINATOR};
pub use message::Message;
