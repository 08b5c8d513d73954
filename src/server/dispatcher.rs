//! Accept loop with admission control.
//!
//! The dispatcher runs on its own task and only accepts: every accepted
//! connection either gets a permit and its own task, or is closed on the
//! spot when all permits are taken. Connections are never queued.

use crate::consumer::MessageConsumer;
use crate::error::ConnectionError;
use crate::protocol::FramingError;
use crate::server::connection::{handle_connection, Closed};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Everything the accept loop hands out to connection tasks.
pub(crate) struct Dispatcher<C, K> {
    pub(crate) codec: C,
    pub(crate) consumer: Arc<K>,
    pub(crate) connection_limit: Arc<Semaphore>,
    pub(crate) max_connections: usize,
    pub(crate) cancel: CancellationToken,
    pub(crate) tracker: TaskTracker,
}

impl<C, K> Dispatcher<C, K>
where
    C: Decoder<Error = FramingError> + Clone + Send + 'static,
    C::Item: Send,
    K: MessageConsumer<C::Item>,
{
    /// Accept until cancelled or until `accept()` fails.
    pub(crate) async fn run(self, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!(address = %addr, max_connections = self.max_connections, "Accepting connections");
        }

        let listener = &listener;
        self.accept_loop(move || listener.accept()).await;
        // listener dropped on return, which closes the socket
    }

    async fn accept_loop<F, Fut>(self, mut accept: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = io::Result<(TcpStream, SocketAddr)>>,
    {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Dispatcher cancelled");
                    break;
                }
                accepted = accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(e) => {
                    // Already admitted connections keep running
                    error!(error = %e, "Failed to accept client connection, no longer accepting");
                    break;
                }
            }
        }
    }

    fn admit(&self, stream: TcpStream, peer: SocketAddr) {
        let permit = match Arc::clone(&self.connection_limit).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    peer = %peer,
                    max_connections = self.max_connections,
                    "Capacity exceeded, connection aborted"
                );
                drop(stream);
                return;
            }
        };

        debug!(peer = %peer, "New connection");

        let codec = self.codec.clone();
        let consumer = Arc::clone(&self.consumer);
        let cancel = self.cancel.clone();

        self.tracker.spawn(async move {
            let result = handle_connection(stream, codec, consumer.as_ref(), &cancel).await;
            log_outcome(peer, result);
            drop(permit);
        });
    }
}

fn log_outcome(peer: SocketAddr, result: Result<Closed, ConnectionError>) {
    match result {
        Ok(Closed::EndOfStream) => debug!(peer = %peer, "Connection closed"),
        Ok(Closed::Cancelled) => debug!(peer = %peer, "Connection cancelled by shutdown"),
        Err(ConnectionError::Framing(e)) if e.is_transport() => {
            warn!(peer = %peer, error = %e, "Connection transport error")
        }
        Err(ConnectionError::Framing(e)) => {
            warn!(peer = %peer, error = %e, "Failed to decode message")
        }
        Err(ConnectionError::Consumer(e)) => {
            error!(peer = %peer, error = %e, "Message consumer failed, connection closed")
        }
    }
}
