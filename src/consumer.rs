//! Message consumers.
//!
//! A consumer receives every decoded message on the task of the connection
//! it arrived on. One consumer instance is shared by all connections, so it
//! must tolerate concurrent calls.

use crate::error::ConsumerError;
use crate::protocol::Message;
use std::io::Write;
use std::sync::Mutex;

/// Receives decoded messages.
///
/// Calls for one connection arrive in receipt order. There is no ordering
/// across connections. Returning an error closes the connection that
/// delivered the message.
pub trait MessageConsumer<M>: Send + Sync + 'static {
    fn consume(&self, message: M) -> Result<(), ConsumerError>;
}

impl<M, F> MessageConsumer<M> for F
where
    F: Fn(M) -> Result<(), ConsumerError> + Send + Sync + 'static,
{
    fn consume(&self, message: M) -> Result<(), ConsumerError> {
        self(message)
    }
}

/// Writes each message as four labelled lines.
///
/// ```text
/// Version: 15
/// Message Type: 2342
/// User ID: 3453456
/// Payload: Hello world
/// ```
pub struct PrintingConsumer<W> {
    output: Mutex<W>,
}

impl<W: Write + Send + 'static> PrintingConsumer<W> {
    pub fn new(output: W) -> Self {
        Self {
            output: Mutex::new(output),
        }
    }

    /// Take the writer back.
    pub fn into_inner(self) -> W {
        self.output
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PrintingConsumer<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send + 'static> MessageConsumer<Message> for PrintingConsumer<W> {
    fn consume(&self, message: Message) -> Result<(), ConsumerError> {
        // Hold the lock for all four lines so concurrent messages don't interleave
        let mut out = self
            .output
            .lock()
            .map_err(|_| "printing consumer output lock poisoned")?;

        writeln!(out, "Version: {}", message.version())?;
        writeln!(out, "Message Type: {}", message.message_type())?;
        writeln!(out, "User ID: {}", message.user_id())?;
        writeln!(out, "Payload: {}", message.payload_lossy())?;
        out.flush()?;
        Ok(())
    }
}
