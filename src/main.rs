//! frame-ingest: accepts TCP connections carrying NUL-terminated binary
//! messages and prints every decoded message to stdout.
//!
//! Features:
//! - Bounded number of concurrent connections, extra ones closed on accept
//! - Graceful shutdown on Ctrl-C
//! - Configuration via CLI arguments or TOML file

use frame_ingest::config::Config;
use frame_ingest::{MessageCodec, PrintingConsumer, Server};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        backlog = config.backlog,
        max_connections = config.max_connections,
        workers = config.workers,
        "Starting frame-ingest server"
    );

    let server = Server::new(
        config.server_options(),
        MessageCodec::new(),
        PrintingConsumer::stdout(),
    )?;
    server.start()?;

    wait_for_shutdown_signal()?;

    info!("Shutdown signal received");
    server.stop(config.shutdown_timeout);
    Ok(())
}

/// Block until Ctrl-C (SIGINT) is delivered.
fn wait_for_shutdown_signal() -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(tokio::signal::ctrl_c())
}
