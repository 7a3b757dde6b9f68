//! Outbound dialing.
//!
//! The race coordinator is written against the [`Dialer`] trait so that it
//! does not care how a connection is established. [`TcpDialer`] is the
//! production implementation: it resolves the backend host, connects, and
//! applies the shared keep-alive setting to the resulting socket.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::backend::BackendAddr;

/// Default TCP keep-alive idle time for outbound connections.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(15);

/// Dial configuration shared by every session.
#[derive(Debug, Clone)]
pub struct DialConfig {
    /// Keep-alive idle time, `None` disables keep-alive.
    pub keepalive: Option<Duration>,
    /// Per-attempt connect timeout, `None` leaves it to the OS.
    pub connect_timeout: Option<Duration>,
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            keepalive: Some(DEFAULT_KEEPALIVE),
            connect_timeout: None,
        }
    }
}

/// Establishes outbound connections to backends.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Connection type produced by a successful dial.
    type Conn: Send + 'static;

    /// Attempt one connection to `addr`.
    async fn dial(&self, addr: &BackendAddr) -> io::Result<Self::Conn>;
}

/// Dials backends over TCP.
#[derive(Debug, Clone, Default)]
pub struct TcpDialer {
    config: DialConfig,
}

impl TcpDialer {
    /// Create a dialer with the given configuration.
    pub fn new(config: DialConfig) -> Self {
        Self { config }
    }

    /// Get the dial configuration.
    pub fn config(&self) -> &DialConfig {
        &self.config
    }

    async fn connect(&self, addr: &BackendAddr) -> io::Result<TcpStream> {
        let mut last_err = None;

        for resolved in tokio::net::lookup_host((addr.host.as_str(), addr.port)).await? {
            match TcpStream::connect(resolved).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(
                        backend = %addr,
                        resolved = %resolved,
                        error = %e,
                        "Resolved address failed"
                    );
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{addr} did not resolve to any address"),
            )
        }))
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    type Conn = TcpStream;

    async fn dial(&self, addr: &BackendAddr) -> io::Result<TcpStream> {
        let stream = match self.config.connect_timeout {
            Some(limit) => match timeout(limit, self.connect(addr)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "connect timeout",
                    ))
                }
            },
            None => self.connect(addr).await?,
        };

        if let Some(idle) = self.config.keepalive {
            SockRef::from(&stream).set_tcp_keepalive(&TcpKeepalive::new().with_time(idle))?;
        }
        stream.set_nodelay(true)?;

        Ok(stream)
    }
}
