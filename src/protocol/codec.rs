//! Codec for the NUL-terminated binary message format.
//!
//! ```text
//! +---------+--------------+---------+-----------------+------+
//! | version | message type | user id | payload (ASCII) | 0x00 |
//! |  i8     |  i16 BE      |  i32 BE |  variable       |      |
//! +---------+--------------+---------+-----------------+------+
//! ```
//!
//! End-of-stream handling is asymmetric: a stream that ends before the
//! first byte of a message is a clean close, a stream that ends anywhere
//! after it is a truncation error.

use crate::protocol::Message;
use bytes::{Buf, BufMut, BytesMut};
use std::io::{self, Read};
use tokio_util::codec::{Decoder, Encoder};

/// Bytes before the payload: version (1) + message type (2) + user id (4).
pub const HEADER_LEN: usize = 7;

/// Payload terminator.
pub const TERMINATOR: u8 = 0x00;

/// Framing errors.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// The stream ended after part of a message was read.
    #[error("stream ended mid-message after {buffered} byte(s)")]
    Truncated { buffered: usize },

    /// A payload handed to the encoder contains the terminator byte.
    #[error("payload contains the 0x00 terminator at offset {offset}")]
    TerminatorInPayload { offset: usize },

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

impl FramingError {
    /// Whether this error came from the transport rather than the byte stream.
    pub fn is_transport(&self) -> bool {
        matches!(self, FramingError::Io(_))
    }
}

/// Decoder/encoder for [`Message`].
///
/// The only state is the payload scan offset of a partially buffered
/// message, so each connection works on its own clone.
#[derive(Debug, Clone, Default)]
pub struct MessageCodec {
    /// Payload bytes already scanned for the terminator.
    scanned: usize,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, FramingError> {
        // Header plus at least the terminator
        if src.len() <= HEADER_LEN {
            return Ok(None);
        }

        let scan_from = HEADER_LEN + self.scanned;
        let payload_len = match src[scan_from..].iter().position(|&b| b == TERMINATOR) {
            Some(pos) => self.scanned + pos,
            None => {
                self.scanned = src.len() - HEADER_LEN;
                return Ok(None);
            }
        };
        self.scanned = 0;

        let mut frame = src.split_to(HEADER_LEN + payload_len + 1);
        let version = frame.get_i8();
        let message_type = frame.get_i16();
        let user_id = frame.get_i32();
        frame.truncate(payload_len);

        Ok(Some(Message::new(
            version,
            message_type,
            user_id,
            frame.freeze(),
        )))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Message>, FramingError> {
        match self.decode(buf)? {
            Some(message) => Ok(Some(message)),
            None if buf.is_empty() => Ok(None),
            None => Err(FramingError::Truncated {
                buffered: buf.len(),
            }),
        }
    }
}

impl<'a> Encoder<&'a Message> for MessageCodec {
    type Error = FramingError;

    fn encode(&mut self, message: &'a Message, dst: &mut BytesMut) -> Result<(), FramingError> {
        let payload = message.payload();
        if let Some(offset) = payload.iter().position(|&b| b == TERMINATOR) {
            return Err(FramingError::TerminatorInPayload { offset });
        }

        dst.reserve(HEADER_LEN + payload.len() + 1);
        dst.put_i8(message.version());
        dst.put_i16(message.message_type());
        dst.put_i32(message.user_id());
        dst.put_slice(payload);
        dst.put_u8(TERMINATOR);
        Ok(())
    }
}

/// Read one message from a blocking reader.
///
/// Returns `Ok(None)` when the reader is exhausted before the first byte
/// of a message. The payload is read a byte at a time, so wrap sockets in
/// a `BufReader`.
pub fn read_message<R: Read>(reader: &mut R) -> Result<Option<Message>, FramingError> {
    let mut header = [0u8; HEADER_LEN];
    let filled = read_up_to(reader, &mut header)?;
    if filled == 0 {
        return Ok(None);
    }
    if filled < HEADER_LEN {
        return Err(FramingError::Truncated { buffered: filled });
    }

    let mut payload = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if read_up_to(reader, &mut byte)? == 0 {
            return Err(FramingError::Truncated {
                buffered: HEADER_LEN + payload.len(),
            });
        }
        if byte[0] == TERMINATOR {
            break;
        }
        payload.push(byte[0]);
    }

    let mut header = &header[..];
    Ok(Some(Message::new(
        header.get_i8(),
        header.get_i16(),
        header.get_i32(),
        payload,
    )))
}

/// Fill `buf` until it is full or the reader hits end-of-stream.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
