//! Relay configuration.
//!
//! Flags take precedence over environment variables. The parsed [`Config`] is
//! immutable and handed to the listener at startup.

use std::net::{Ipv6Addr, SocketAddr};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use thiserror::Error;

use crate::proxy::{BackendAddrError, BackendList, DialConfig, DEFAULT_MAX_CONNECTIONS};

/// Default listen port.
pub const DEFAULT_PORT: u16 = 6442;

/// Startup configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("--targets is mandatory (or set RELAY_TARGETS)")]
    MissingTargets,

    #[error("invalid --targets: {0}")]
    InvalidTarget(#[from] BackendAddrError),

    #[error("--max-connections must be at least 1")]
    ZeroMaxConnections,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Race-then-relay TCP proxy.
#[derive(Debug, Parser)]
#[command(name = "race-relay")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Port to listen on.
    #[arg(long, env = "RELAY_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Comma separated host:port targets.
    #[arg(long, env = "RELAY_TARGETS")]
    pub targets: Option<String>,

    /// TCP keep-alive idle time for backend connections (0 disables).
    #[arg(long, env = "RELAY_KEEPALIVE_SECS", default_value_t = 15)]
    pub keepalive_secs: u64,

    /// Per-attempt dial timeout in milliseconds.
    #[arg(long, env = "RELAY_CONNECT_TIMEOUT_MS")]
    pub connect_timeout_ms: Option<u64>,

    /// Per-direction read idle timeout in seconds.
    #[arg(long, env = "RELAY_IDLE_TIMEOUT_SECS")]
    pub idle_timeout_secs: Option<u64>,

    /// Maximum concurrent sessions.
    #[arg(long, env = "RELAY_MAX_CONNECTIONS", default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: usize,

    /// Exit the process when accepting a connection fails.
    #[arg(long, env = "RELAY_FATAL_ACCEPT_ERRORS")]
    pub fatal_accept_errors: bool,

    /// Log level used when RUST_LOG is unset.
    #[arg(long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, env = "RELAY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

/// Validated relay configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the listener binds to.
    pub bind_addr: SocketAddr,

    /// Backends raced for every session.
    pub backends: BackendList,

    /// Dial settings shared by every race.
    pub dial: DialConfig,

    /// Optional per-direction read idle timeout.
    pub idle_timeout: Option<Duration>,

    /// Maximum concurrent sessions.
    pub max_connections: usize,

    /// Whether accept errors stop the process.
    pub fatal_accept_errors: bool,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,
}

impl Config {
    /// Parse flags and environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_args(Args::parse())
    }

    /// Validate parsed arguments.
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let targets = args
            .targets
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingTargets)?;
        let backends = crate::proxy::parse_backend_list(&targets)?;

        if args.max_connections == 0 {
            return Err(ConfigError::ZeroMaxConnections);
        }

        let keepalive = (args.keepalive_secs > 0).then(|| Duration::from_secs(args.keepalive_secs));

        Ok(Self {
            bind_addr: SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), args.port),
            backends,
            dial: DialConfig {
                keepalive,
                connect_timeout: args.connect_timeout_ms.map(Duration::from_millis),
            },
            idle_timeout: args.idle_timeout_secs.map(Duration::from_secs),
            max_connections: args.max_connections,
            fatal_accept_errors: args.fatal_accept_errors,
            log_level: args.log_level,
            log_format: args.log_format,
        })
    }
}
