//! Runtime layouts.
//!
//! - `Shared`: one multi-threaded tokio runtime running a single accept loop;
//!   the scheduler moves connection tasks between worker threads.
//! - `Sharded`: one OS thread per worker, each with a current-thread runtime
//!   and its own SO_REUSEPORT listener on the same address. The kernel
//!   spreads incoming connections over the listeners and a connection never
//!   leaves the thread that accepted it.

use crate::config::{Config, RuntimeType};
use crate::listener::bind_std_listener;
use crate::server::Server;
use std::io;
use std::net::SocketAddr;
use std::thread::{self, JoinHandle};
use tokio::net::TcpListener;
use tracing::{error, info};

/// Run the server with the configured runtime layout.
pub fn run(config: Config) -> io::Result<()> {
    match config.runtime {
        RuntimeType::Shared => run_shared(config),
        RuntimeType::Sharded => run_sharded(config),
    }
}

fn run_shared(config: Config) -> io::Result<()> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.enable_all().build()?;

    info!(workers = ?config.workers, "Using shared multi-threaded runtime");

    runtime.block_on(async move {
        let server = Server::bind(config)?;
        server.run().await
    })
}

fn run_sharded(config: Config) -> io::Result<()> {
    let num_workers = config.workers.unwrap_or_else(num_cpus);
    let (addr, handles) = spawn_shards(config, num_workers)?;

    info!(workers = num_workers, addr = %addr, "Using sharded runtime");

    // Wait for all workers
    for handle in handles {
        let _ = handle.join();
    }

    Ok(())
}

/// Bind `num_workers` listeners on one address and start a worker thread
/// for each.
///
/// All listeners are bound before any thread starts, so a bind failure is
/// reported to the caller. When the configured port is 0 the first listener
/// picks it and the rest share that port. Returns the bound address.
pub fn spawn_shards(
    config: Config,
    num_workers: usize,
) -> io::Result<(SocketAddr, Vec<JoinHandle<()>>)> {
    let num_workers = num_workers.max(1);

    let first = bind_std_listener(config.listen, config.backlog, true)?;
    let addr = first.local_addr()?;

    let mut listeners = Vec::with_capacity(num_workers);
    listeners.push(first);
    for _ in 1..num_workers {
        listeners.push(bind_std_listener(addr, config.backlog, true)?);
    }

    let mut handles = Vec::with_capacity(num_workers);

    for (worker_id, listener) in listeners.into_iter().enumerate() {
        let config = config.clone();

        let handle = thread::Builder::new()
            .name(format!("worker-{worker_id}"))
            .spawn(move || {
                if let Err(e) = worker_loop(config, listener) {
                    error!(worker = worker_id, error = %e, "Worker failed");
                }
            })?;

        handles.push(handle);
    }

    Ok((addr, handles))
}

fn worker_loop(config: Config, listener: std::net::TcpListener) -> io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let listener = TcpListener::from_std(listener)?;
        let server = Server::from_listener(config, listener);
        server.run().await
    })
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::RESPONSE;
    use std::io::{Read, Write};
    use std::time::Duration;

    fn test_config() -> Config {
        Config {
            listen: "127.0.0.1:0".parse().unwrap(),
            runtime: RuntimeType::Sharded,
            ..Config::default()
        }
    }

    fn round_trip(addr: SocketAddr) -> Vec<u8> {
        let mut client = std::net::TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();

        let mut buf = vec![0u8; RESPONSE.len()];
        client.read_exact(&mut buf).unwrap();
        buf
    }

    #[cfg(unix)]
    #[test]
    fn test_two_shards_share_one_port() {
        let (addr, handles) = spawn_shards(test_config(), 2).unwrap();
        assert_eq!(handles.len(), 2);
        assert_ne!(addr.port(), 0);

        let names: Vec<_> = handles
            .iter()
            .map(|h| h.thread().name().unwrap().to_string())
            .collect();
        assert_eq!(names, ["worker-0", "worker-1"]);

        // Spread over many connections so both listeners take some.
        for _ in 0..32 {
            assert_eq!(round_trip(addr), RESPONSE);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_shard_connection_stays_open() {
        let (addr, _handles) = spawn_shards(test_config(), 2).unwrap();

        let mut client = std::net::TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        for _ in 0..5 {
            client.write_all(b"x").unwrap();
            let mut buf = vec![0u8; RESPONSE.len()];
            client.read_exact(&mut buf).unwrap();
            assert_eq!(buf, RESPONSE);
        }
    }

    #[test]
    fn test_zero_workers_still_spawns_one() {
        let (addr, handles) = spawn_shards(test_config(), 0).unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(round_trip(addr), RESPONSE);
    }

    #[test]
    fn test_shard_bind_conflict_is_reported() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = Config {
            listen: taken.local_addr().unwrap(),
            ..test_config()
        };

        assert!(spawn_shards(config, 2).is_err());
    }
}
