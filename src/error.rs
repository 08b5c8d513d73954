//! Server error types.

use crate::protocol::FramingError;
use std::net::SocketAddr;

/// Errors surfaced by [`Server`](crate::Server) construction and startup.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Invalid construction argument.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The listening socket could not be opened.
    #[error("failed to open server socket at {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The worker pool could not be created.
    #[error("failed to build worker runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// Failure raised by a message consumer.
pub type ConsumerError = Box<dyn std::error::Error + Send + Sync>;

/// Why a connection ended abnormally. Never leaves the connection's task.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error("consumer failed: {0}")]
    Consumer(#[source] ConsumerError),
}
