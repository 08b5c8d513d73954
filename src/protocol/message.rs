//! The decoded message value.

use bytes::Bytes;
use std::fmt;

/// A single decoded message.
///
/// Only the codec builds messages off the wire, and only from a complete
/// field set: a header plus a NUL-terminated payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Message {
    version: i8,
    message_type: i16,
    user_id: i32,
    payload: Bytes,
}

impl Message {
    /// Create a message from its fields.
    ///
    /// The payload must not contain the NUL terminator; the encoder rejects
    /// such messages.
    pub fn new(version: i8, message_type: i16, user_id: i32, payload: impl Into<Bytes>) -> Self {
        Self {
            version,
            message_type,
            user_id,
            payload: payload.into(),
        }
    }

    pub fn version(&self) -> i8 {
        self.version
    }

    pub fn message_type(&self) -> i16 {
        self.message_type
    }

    pub fn user_id(&self) -> i32 {
        self.user_id
    }

    /// Raw payload bytes, terminator excluded.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload rendered as text. Non-ASCII bytes are replaced.
    pub fn payload_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message {{ version: {}, message_type: {}, user_id: {}, payload: {:?} }}",
            self.version,
            self.message_type,
            self.user_id,
            self.payload_lossy()
        )
    }
}
