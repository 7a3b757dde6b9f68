//! TCP listener and accept loop.
//!
//! Every accepted connection becomes an independent session on its own task.
//! The listener stops accepting once the shutdown signal flips; sessions
//! already running see the same signal through their race.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn, Instrument};

use super::dial::{Dialer, TcpDialer};
use super::race::cancelled;
use super::relay::SplitDuplex;
use super::session::{run_session, SessionContext};

/// Default maximum concurrent sessions per listener.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10000;

/// Pause after a non-fatal accept error.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Configuration for a listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent sessions.
    pub max_connections: usize,
    /// Exit the accept loop on the first accept error.
    pub fatal_accept_errors: bool,
}

impl ListenerConfig {
    /// Create a new listener configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            fatal_accept_errors: false,
        }
    }
}

/// Statistics for a listener.
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Total connections accepted.
    pub connections_accepted: AtomicU64,
    /// Total connections currently active.
    pub connections_active: AtomicU64,
    /// Total connections closed.
    pub connections_closed: AtomicU64,
    /// Connections rejected due to max limit.
    pub connections_rejected: AtomicU64,
    /// Sessions that won a backend.
    pub backend_connected: AtomicU64,
    /// Sessions closed without a backend.
    pub backend_unavailable: AtomicU64,
    /// Bytes relayed to backends.
    pub bytes_to_backend: AtomicU64,
    /// Bytes relayed from backends.
    pub bytes_from_backend: AtomicU64,
}

/// A TCP listener that races and relays every accepted connection.
pub struct Listener<D = TcpDialer> {
    /// Listener configuration.
    config: ListenerConfig,
    /// The TCP listener.
    listener: TcpListener,
    /// Shared session state.
    ctx: Arc<SessionContext<D>>,
    /// Connection semaphore for limiting concurrent sessions.
    conn_semaphore: Arc<Semaphore>,
    /// Statistics.
    stats: Arc<ListenerStats>,
}

impl<D> Listener<D>
where
    D: Dialer,
    D::Conn: SplitDuplex,
{
    /// Bind a new listener.
    pub async fn bind(config: ListenerConfig, ctx: Arc<SessionContext<D>>) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        info!(
            bind_addr = %local_addr,
            max_connections = config.max_connections,
            backends = ctx.backends.len(),
            "Listener bound"
        );

        Ok(Self {
            conn_semaphore: Arc::new(Semaphore::new(config.max_connections)),
            listener,
            config,
            ctx,
            stats: Arc::new(ListenerStats::default()),
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Get listener statistics.
    pub fn stats(&self) -> &ListenerStats {
        &self.stats
    }

    /// Get the shared session context.
    pub fn context(&self) -> &SessionContext<D> {
        &self.ctx
    }

    /// Accept connections until `shutdown` flips to `true`.
    ///
    /// Returns an error only when `fatal_accept_errors` is set and accept fails.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> io::Result<()> {
        let local_addr = self.listener.local_addr()?;
        info!(bind_addr = %local_addr, "Listener started");

        loop {
            let accepted = tokio::select! {
                _ = cancelled(&mut shutdown) => {
                    info!(bind_addr = %local_addr, "Listener stopping");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    let permit = match self.conn_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            self.stats
                                .connections_rejected
                                .fetch_add(1, Ordering::Relaxed);
                            warn!(
                                peer_addr = %peer_addr,
                                "Connection rejected: max connections reached"
                            );
                            continue;
                        }
                    };

                    self.stats
                        .connections_accepted
                        .fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .connections_active
                        .fetch_add(1, Ordering::Relaxed);

                    let listener = Arc::clone(&self);
                    let cancel = shutdown.clone();

                    tokio::spawn(
                        async move {
                            debug!("Session started");
                            listener.handle_connection(stream, cancel).await;

                            let stats = &listener.stats;
                            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                            stats.connections_closed.fetch_add(1, Ordering::Relaxed);
                            drop(permit);
                        }
                        .instrument(tracing::info_span!("session", peer = %peer_addr)),
                    );
                }
                Err(e) => self.on_accept_error(e).await?,
            }
        }
    }

    /// Apply the accept-error policy: stop with `Err` or back off and continue.
    async fn on_accept_error(&self, e: io::Error) -> io::Result<()> {
        if self.config.fatal_accept_errors {
            error!(error = %e, "Accept error, stopping listener");
            return Err(e);
        }

        error!(error = %e, "Accept error");
        // Brief sleep to avoid tight loop on persistent errors
        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
        Ok(())
    }

    /// Run a session for one accepted connection and record its outcome.
    async fn handle_connection(&self, stream: TcpStream, cancel: watch::Receiver<bool>) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY on inbound connection");
        }

        let report = run_session(stream, &self.ctx, cancel).await;

        match &report.relay {
            Some(outcome) => {
                self.stats.backend_connected.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .bytes_to_backend
                    .fetch_add(outcome.a_to_b.bytes, Ordering::Relaxed);
                self.stats
                    .bytes_from_backend
                    .fetch_add(outcome.b_to_a.bytes, Ordering::Relaxed);
            }
            None => {
                self.stats
                    .backend_unavailable
                    .fetch_add(1, Ordering::Relaxed);
            }
        }

        debug!(path = ?report.path, backend = ?report.backend, "Session closed");
    }
}
