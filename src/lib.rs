//! frame-ingest: a TCP server for NUL-terminated binary messages.
//!
//! Each accepted connection carries a stream of messages:
//! - version (i8)
//! - message type (i16, big-endian)
//! - user id (i32, big-endian)
//! - ASCII payload terminated by a single 0x00 byte
//!
//! Messages are decoded per connection and handed, in order, to a
//! [`MessageConsumer`] supplied by the embedder. The number of connections
//! served at once is capped; connections beyond the cap are closed as soon
//! as they are accepted.
//!
//! ```no_run
//! use frame_ingest::{ConsumerError, Message, MessageCodec, Server, ServerOptions};
//! use std::time::Duration;
//!
//! let consumer = |message: Message| -> Result<(), ConsumerError> {
//!     println!("{message}");
//!     Ok(())
//! };
//! let server = Server::new(ServerOptions::new(8087, 16), MessageCodec::new(), consumer)?;
//! server.start()?;
//! // ...
//! server.stop(Duration::from_secs(3));
//! # Ok::<(), frame_ingest::ServerError>(())
//! ```

pub mod config;
pub mod consumer;
pub mod error;
pub mod protocol;
pub mod server;

pub use consumer::{MessageConsumer, PrintingConsumer};
pub use error::{ConnectionError, ConsumerError, ServerError};
pub use protocol::{FramingError, Message, MessageCodec};
pub use server::{Server, ServerOptions};
