//! hello-bench: a TCP benchmark server
//!
//! Accepts connections and answers every read, whatever it contains, with
//! the same canned `HTTP/1.1 200 OK` keep-alive response. Meant as a target
//! for HTTP load generators comparing runtime and socket overhead.
//!
//! Features:
//! - One tokio task per connection, on a shared multi-threaded runtime or
//!   on per-core shards each owning a SO_REUSEPORT listener
//! - Optional idle timeout and connection limit
//! - Configuration via CLI arguments or TOML file

mod config;
mod connection;
mod listener;
mod response;
mod runtime;
mod server;

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

    info!(
        listen = %config.listen,
        runtime = ?config.runtime,
        workers = ?config.workers,
        backlog = config.backlog,
        reuse_port = config.reuse_port,
        max_connections = ?config.max_connections,
        buffer_size = config.buffer_size,
        nodelay = config.nodelay,
        idle_timeout = ?config.idle_timeout,
        "Starting hello-bench server"
    );

    runtime::run(config)?;

    Ok(())
}
