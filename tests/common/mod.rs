//! Shared helpers for integration tests: port discovery, a blocking test
//! client and a consumer that records what it receives.

#![allow(dead_code)]

use bytes::BytesMut;
use frame_ingest::{ConsumerError, Message, MessageCodec, MessageConsumer};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tokio_util::codec::Encoder;

/// Find a port that is free right now.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().unwrap().port()
}

/// Blocking client speaking the wire format.
pub struct TestClient {
    stream: TcpStream,
    codec: MessageCodec,
}

impl TestClient {
    pub fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            codec: MessageCodec::new(),
        })
    }

    pub fn send(&mut self, message: &Message) -> io::Result<()> {
        let mut buf = BytesMut::new();
        self.codec
            .encode(message, &mut buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.send_raw(&buf)
    }

    pub fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes)?;
        self.stream.flush()
    }

    /// Whether the server closes this connection within `timeout`.
    ///
    /// The server never writes, so any read result other than a timeout
    /// means the connection is gone.
    pub fn closed_by_server(&mut self, timeout: Duration) -> bool {
        self.stream
            .set_read_timeout(Some(timeout))
            .expect("set read timeout");
        let mut buf = [0u8; 1];
        match self.stream.read(&mut buf) {
            Ok(0) => true,
            Ok(_) => false,
            Err(e) => !matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
        }
    }
}

/// Consumer that records every message and lets tests wait for a count.
#[derive(Default)]
pub struct CollectingConsumer {
    messages: Mutex<Vec<Message>>,
    arrived: Condvar,
    reject_type: Option<i16>,
    delay: Option<Duration>,
    delay_type: Option<i16>,
}

impl CollectingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail on messages of this type instead of recording them.
    pub fn rejecting(message_type: i16) -> Self {
        Self {
            reject_type: Some(message_type),
            ..Self::default()
        }
    }

    /// Sleep this long inside every call.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Sleep this long, but only for messages of this type.
    pub fn slow_type(message_type: i16, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            delay_type: Some(message_type),
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    /// Wait until at least `count` messages were recorded.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut messages = self.messages.lock().unwrap();
        while messages.len() < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            messages = self.arrived.wait_timeout(messages, remaining).unwrap().0;
        }
        true
    }
}

impl MessageConsumer<Message> for CollectingConsumer {
    fn consume(&self, message: Message) -> Result<(), ConsumerError> {
        if let Some(delay) = self.delay {
            if self.delay_type.map_or(true, |t| t == message.message_type()) {
                std::thread::sleep(delay);
            }
        }
        if self.reject_type == Some(message.message_type()) {
            return Err(format!("message type {} rejected", message.message_type()).into());
        }
        self.messages.lock().unwrap().push(message);
        self.arrived.notify_all();
        Ok(())
    }
}

/// Deterministic pseudo-random messages.
pub fn generate_messages(count: usize, seed: u64) -> Vec<Message> {
    let mut state = seed;
    let mut next = move || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        state >> 16
    };

    (0..count)
        .map(|_| {
            let version = next() as i8;
            let message_type = (next() % 1000) as i16 - 500;
            let user_id = next() as i32;
            let payload = (next() as u32).to_string();
            Message::new(version, message_type, user_id, payload)
        })
        .collect()
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
