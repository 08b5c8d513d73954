//! Per-connection read loop.
//!
//! One task owns one connection for its whole life: decode the next
//! message, hand it to the consumer, repeat. The stream is moved into
//! [`handle_connection`] and dropped on every exit path, which closes it.

use crate::consumer::MessageConsumer;
use crate::error::{ConnectionError, ConsumerError};
use crate::protocol::FramingError;
use bytes::BytesMut;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Read buffer size
const BUFFER_SIZE: usize = 4 * 1024;

/// How a connection ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Closed {
    /// Peer closed the stream on a message boundary.
    EndOfStream,
    /// Server shutdown.
    Cancelled,
}

/// Run the decode/consume loop until the stream ends, fails, or `cancel` fires.
pub(crate) async fn handle_connection<S, C, K>(
    mut stream: S,
    mut codec: C,
    consumer: &K,
    cancel: &CancellationToken,
) -> Result<Closed, ConnectionError>
where
    S: AsyncRead + Unpin,
    C: Decoder<Error = FramingError>,
    K: MessageConsumer<C::Item> + ?Sized,
{
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);
    let mut messages = 0usize;

    loop {
        // Drain whatever is already buffered before touching the socket
        while let Some(message) = codec.decode(&mut buffer)? {
            if cancel.is_cancelled() {
                return Ok(Closed::Cancelled);
            }
            deliver(consumer, message).map_err(ConnectionError::Consumer)?;
            messages += 1;
        }

        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Closed::Cancelled),
            read = stream.read_buf(&mut buffer) => read.map_err(FramingError::from)?,
        };

        if n == 0 {
            while let Some(message) = codec.decode_eof(&mut buffer)? {
                deliver(consumer, message).map_err(ConnectionError::Consumer)?;
                messages += 1;
            }
            trace!(messages, "Connection closed by client");
            return Ok(Closed::EndOfStream);
        }
    }
}

/// Invoke the consumer on this task.
///
/// On the multi-threaded runtime the call is wrapped in `block_in_place`,
/// so a slow consumer holds up only its own connection. A panicking
/// consumer is reported as a consumer error.
fn deliver<K, M>(consumer: &K, message: M) -> Result<(), ConsumerError>
where
    K: MessageConsumer<M> + ?Sized,
{
    let consume = || {
        panic::catch_unwind(AssertUnwindSafe(|| consumer.consume(message)))
            .unwrap_or_else(|payload| Err(panic_message(payload).into()))
    };

    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(consume),
        _ => consume(),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string payload".to_string());
    format!("consumer panicked: {detail}")
}
