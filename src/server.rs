//! TCP server for the benchmark.
//!
//! One accept loop owns the listener and spawns a tokio task per accepted
//! connection. Handler tasks share nothing mutable: the response is a
//! `'static` constant and each task owns its socket outright.

use crate::config::Config;
use crate::connection::ConnectionHandler;
use crate::listener::{bind_listener, classify_accept_error};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, debug_span, error, info, trace, Instrument};

/// Server instance
pub struct Server {
    config: Config,
    listener: TcpListener,
    handler: ConnectionHandler,
    connection_limit: Option<Arc<Semaphore>>,
    active: Arc<AtomicUsize>,
    next_id: AtomicU64,
}

impl Server {
    /// Bind the listening socket described by `config`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(config: Config) -> io::Result<Self> {
        let listener = bind_listener(config.listen, config.backlog, config.reuse_port)?;
        Ok(Self::from_listener(config, listener))
    }

    /// Serve on an already bound listener.
    pub fn from_listener(config: Config, listener: TcpListener) -> Self {
        Server {
            handler: ConnectionHandler::from_config(&config),
            connection_limit: config
                .max_connections
                .map(|limit| Arc::new(Semaphore::new(limit))),
            config,
            listener,
            active: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(0),
        }
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Number of connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Accept connections forever.
    ///
    /// Accept errors never stop the loop. Errors tied to a single pending
    /// connection are retried at once; anything else waits
    /// `accept_backoff` first so a broken listener or descriptor exhaustion
    /// cannot turn the loop into a busy spin.
    pub async fn run(&self) -> io::Result<()> {
        info!(address = %self.local_addr()?, "Server listening");

        loop {
            // Wait for a connection slot
            let permit = match &self.connection_limit {
                Some(limit) => Some(
                    Arc::clone(limit)
                        .acquire_owned()
                        .await
                        .map_err(io::Error::other)?,
                ),
                None => None,
            };

            match self.listener.accept().await {
                Ok((stream, peer)) => self.spawn_handler(stream, peer, permit),
                Err(e) => {
                    if let Some(pause) = self.accept_pause(&e) {
                        tokio::time::sleep(pause).await;
                    }
                }
            }
        }
    }

    /// Log an accept error and decide how long to wait before retrying.
    fn accept_pause(&self, err: &io::Error) -> Option<Duration> {
        let kind = classify_accept_error(err);
        if kind.needs_backoff() {
            error!(error = %err, ?kind, "Failed to accept connection");
            Some(self.config.accept_backoff)
        } else {
            debug!(error = %err, "Pending connection failed before accept");
            None
        }
    }

    fn spawn_handler(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        permit: Option<OwnedSemaphorePermit>,
    ) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        if self.config.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                debug!(conn = id, error = %e, "Failed to set TCP_NODELAY");
            }
        }

        let guard = ActiveGuard::new(&self.active);
        let handler = self.handler;
        let span = debug_span!("conn", id, %peer);

        tokio::spawn(
            async move {
                trace!("New connection");
                match handler.serve(stream).await {
                    Ok(responses) => debug!(responses, "Connection closed"),
                    Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                        debug!("Connection idle, closing")
                    }
                    Err(e) => debug!(error = %e, "Connection error"),
                }
                drop(guard);
                drop(permit);
            }
            .instrument(span),
        );
    }
}

/// Counts a live handler; decrements on drop so every exit path is covered.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::Relaxed);
        ActiveGuard(Arc::clone(active))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}
