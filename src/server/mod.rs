//! TCP server lifecycle.
//!
//! `start()` binds the listening socket, builds the worker runtime and
//! spawns the dispatcher. `stop()` cancels everything, waits a bounded time
//! for connection tasks to wind down, then tears the runtime down. Both are
//! idempotent and the server may be restarted after a stop.

mod connection;
mod dispatcher;
mod listener;

use crate::consumer::MessageConsumer;
use crate::error::ServerError;
use crate::protocol::FramingError;
use dispatcher::Dispatcher;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::Semaphore;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Default time `Drop` gives connection tasks to finish.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Server construction parameters. Validated by [`Server::new`].
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Address to bind to
    pub host: IpAddr,
    /// Port to listen on (0 picks an ephemeral port)
    pub port: u16,
    /// Accept backlog of the listening socket
    pub backlog: u32,
    /// Connections served at once; further connections are closed on accept
    pub max_connections: usize,
    /// Runtime worker threads
    pub workers: usize,
    /// Grace period used when the server is dropped while running
    pub shutdown_timeout: Duration,
}

impl ServerOptions {
    pub fn new(port: u16, max_connections: usize) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
            backlog: max_connections.try_into().unwrap_or(u32::MAX),
            max_connections,
            workers: default_workers(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.backlog > i32::MAX as u32 {
            return Err(ServerError::Configuration(format!(
                "illegal socket backlog value {}",
                self.backlog
            )));
        }
        if self.max_connections < 1 {
            return Err(ServerError::Configuration(format!(
                "illegal max connections value {}",
                self.max_connections
            )));
        }
        if self.workers < 1 {
            return Err(ServerError::Configuration(format!(
                "illegal worker count {}",
                self.workers
            )));
        }
        Ok(())
    }

    fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Number of CPU cores, falling back to one.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Resources that exist only while the server is running.
struct Running {
    runtime: Runtime,
    cancel: CancellationToken,
    tracker: TaskTracker,
    connection_limit: Arc<Semaphore>,
    local_addr: SocketAddr,
}

/// A TCP server that decodes messages with `C` and hands them to `K`.
pub struct Server<C, K> {
    options: ServerOptions,
    codec: C,
    consumer: Arc<K>,
    started: AtomicBool,
    state: Mutex<Option<Running>>,
}

impl<C, K> Server<C, K>
where
    C: Decoder<Error = FramingError> + Clone + Send + 'static,
    C::Item: Send,
    K: MessageConsumer<C::Item>,
{
    /// Create a stopped server. Fails on invalid options.
    pub fn new(options: ServerOptions, codec: C, consumer: K) -> Result<Self, ServerError> {
        Self::with_shared_consumer(options, codec, Arc::new(consumer))
    }

    /// Like [`Server::new`], for a consumer the caller keeps a handle to.
    pub fn with_shared_consumer(
        options: ServerOptions,
        codec: C,
        consumer: Arc<K>,
    ) -> Result<Self, ServerError> {
        options.validate()?;
        Ok(Self {
            options,
            codec,
            consumer,
            started: AtomicBool::new(false),
            state: Mutex::new(None),
        })
    }

    /// Start accepting connections. No-op if already running.
    pub fn start(&self) -> Result<(), ServerError> {
        if self.started.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut state = self.lock_state();
        if state.is_some() {
            return Ok(());
        }

        *state = Some(self.launch()?);
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    /// Stop the server, giving in-flight connections up to `timeout` to
    /// finish. No-op if already stopped.
    ///
    /// Blocks the calling thread for at most about `timeout`, also when
    /// called from async code.
    pub fn stop(&self, timeout: Duration) {
        if !self.started.load(Ordering::Acquire) {
            return;
        }
        let mut state = self.lock_state();
        let Some(running) = state.take() else {
            return;
        };

        shutdown(running, timeout);
        self.started.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.lock_state().is_some()
    }

    /// Bound address while running. Resolves port 0 to the actual port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_state().as_ref().map(|running| running.local_addr)
    }

    /// Connections currently holding a slot.
    pub fn active_connections(&self) -> usize {
        self.lock_state().as_ref().map_or(0, |running| {
            self.options.max_connections - running.connection_limit.available_permits()
        })
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    fn launch(&self) -> Result<Running, ServerError> {
        let addr = self.options.addr();
        info!(address = %addr, "Attempting to start TCP server");

        // Backlog was validated to fit in an i32
        let backlog = self.options.backlog as i32;
        let std_listener =
            listener::bind(addr, backlog).map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = std_listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.options.workers)
            .thread_name("ingest-worker")
            .enable_all()
            .build()
            .map_err(ServerError::Runtime)?;

        let listener = {
            let _guard = runtime.enter();
            tokio::net::TcpListener::from_std(std_listener)
        };
        let listener = match listener {
            Ok(listener) => listener,
            Err(source) => {
                runtime.shutdown_background();
                return Err(ServerError::Bind { addr, source });
            }
        };

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let connection_limit = Arc::new(Semaphore::new(self.options.max_connections));

        let dispatcher = Dispatcher {
            codec: self.codec.clone(),
            consumer: Arc::clone(&self.consumer),
            connection_limit: Arc::clone(&connection_limit),
            max_connections: self.options.max_connections,
            cancel: cancel.clone(),
            tracker: tracker.clone(),
        };
        tracker.spawn_on(dispatcher.run(listener), runtime.handle());

        info!(
            address = %local_addr,
            max_connections = self.options.max_connections,
            workers = self.options.workers,
            "Server started"
        );

        Ok(Running {
            runtime,
            cancel,
            tracker,
            connection_limit,
            local_addr,
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, Option<Running>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn shutdown(running: Running, timeout: Duration) {
    if Handle::try_current().is_ok() {
        // Blocking on or dropping a runtime is not allowed from a runtime
        // thread, so an async caller waits on a helper thread instead
        std::thread::scope(|scope| {
            scope.spawn(move || shutdown_blocking(running, timeout));
        });
    } else {
        shutdown_blocking(running, timeout);
    }
}

fn shutdown_blocking(running: Running, timeout: Duration) {
    info!(address = %running.local_addr, "Attempting to stop TCP server");
    let deadline = Instant::now() + timeout;

    running.cancel.cancel();
    running.tracker.close();

    let tracker = running.tracker.clone();
    let finished = running
        .runtime
        .block_on(async move { tokio::time::timeout(timeout, tracker.wait()).await.is_ok() });
    if !finished {
        warn!(
            pending = running.tracker.len(),
            "Tasks still running after shutdown timeout"
        );
    }

    // Drops every remaining task, the listener included if the dispatcher
    // never got to run again
    running
        .runtime
        .shutdown_timeout(deadline.saturating_duration_since(Instant::now()));

    info!("Server stopped");
}

impl<C, K> Drop for Server<C, K> {
    fn drop(&mut self) {
        let running = match self.state.get_mut() {
            Ok(state) => state.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(running) = running {
            shutdown(running, self.options.shutdown_timeout);
        }
    }
}
