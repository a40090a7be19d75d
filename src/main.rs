//! slow-digest: a concurrent TCP digest server
//!
//! Clients send `get <text> <delay_ms>`; the server replies with the MD5
//! hex digest of `<text>` after sleeping `<delay_ms>` milliseconds.
//!
//! Features:
//! - Single-threaded readiness loop with a fixed table of client slots
//! - One detached worker thread per request
//! - Bounded FIFO record of recent digests
//! - `SIGUSR1` clears the record, `SIGTERM` drains and exits
//! - Configuration via CLI arguments or TOML file

mod cache;
mod config;
mod digest;
mod request;
mod runtime;
mod shutdown;
mod signals;

use config::Config;
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
        .init();

    // Before any thread exists, so all of them inherit the mask.
    let signal_set = signals::block()?;

    let server = runtime::start(&config)?;

    info!(
        port = server.local_addr().port(),
        pid = std::process::id(),
        cache_capacity = config.cache_capacity,
        "Server on port"
    );

    let _signals = signals::spawn(signal_set, server.controller())?;

    server.join()?;
    info!("Server stopped");
    Ok(())
}
