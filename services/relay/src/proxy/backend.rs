//! Backend addresses.
//!
//! A backend is an opaque `host:port` endpoint. The list is parsed once at
//! startup and shared read-only between sessions. Duplicate entries are kept:
//! each one is dialed independently.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

/// Errors produced while parsing backend addresses.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackendAddrError {
    /// Entry is empty (e.g. `a:1,,b:2`).
    #[error("empty backend entry")]
    Empty,

    /// Entry has no `:port` suffix.
    #[error("missing port in backend address: {0}")]
    MissingPort(String),

    /// Entry has an empty host part.
    #[error("missing host in backend address: {0}")]
    MissingHost(String),

    /// Port is not a valid u16.
    #[error("invalid port in backend address: {0}")]
    InvalidPort(String),
}

/// A single backend endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendAddr {
    /// Hostname or IP literal, without IPv6 brackets.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl BackendAddr {
    /// Create a new backend address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for BackendAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for BackendAddr {
    type Err = BackendAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(BackendAddrError::Empty);
        }

        let Some((host, port)) = s.rsplit_once(':') else {
            return Err(BackendAddrError::MissingPort(s.to_string()));
        };

        // Bracketed IPv6 literal: "[::1]:8080"
        let host = match host.strip_prefix('[') {
            Some(inner) => inner
                .strip_suffix(']')
                .ok_or_else(|| BackendAddrError::MissingPort(s.to_string()))?,
            None if host.contains(':') => {
                return Err(BackendAddrError::MissingPort(s.to_string()));
            }
            None => host,
        };

        if host.is_empty() {
            return Err(BackendAddrError::MissingHost(s.to_string()));
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| BackendAddrError::InvalidPort(s.to_string()))?;

        Ok(Self::new(host, port))
    }
}

/// Immutable, shareable list of backends.
pub type BackendList = Arc<[BackendAddr]>;

/// Parse a comma-separated list of `host:port` entries.
pub fn parse_backend_list(raw: &str) -> Result<BackendList, BackendAddrError> {
    raw.split(',')
        .map(BackendAddr::from_str)
        .collect::<Result<Vec<_>, _>>()
        .map(Into::into)
}
