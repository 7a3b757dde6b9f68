//! Race-then-relay TCP proxy.
//!
//! This module provides:
//! - Backend address parsing
//! - Concurrent dial racing with loser cleanup
//! - Bidirectional relaying with half-close propagation
//! - The per-connection session lifecycle and the accept loop
//!
//! ## Architecture
//!
//! ```text
//! Client -> Listener -> Session -> race(backend_1 .. backend_n) -> winner
//!                          |                                        |
//!                          +--------------- relay <-----------------+
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use proxy::{parse_backend_list, Listener, ListenerConfig, SessionContext, TcpDialer};
//!
//! let backends = parse_backend_list("10.0.0.1:5432,10.0.0.2:5432")?;
//! let ctx = Arc::new(SessionContext::new(TcpDialer::default(), backends));
//!
//! let config = ListenerConfig::new("[::]:6442".parse()?);
//! let listener = Arc::new(Listener::bind(config, ctx).await?);
//! listener.run(shutdown_rx).await?;
//! ```

mod backend;
mod dial;
mod listener;
mod race;
mod relay;
mod session;

pub use backend::{parse_backend_list, BackendAddr, BackendAddrError, BackendList};
pub use dial::{DialConfig, Dialer, TcpDialer, DEFAULT_KEEPALIVE};
pub use listener::{Listener, ListenerConfig, ListenerStats, DEFAULT_MAX_CONNECTIONS};
pub use race::{cancelled, race, RaceError, RaceStats, RaceWinner};
pub use relay::{relay, DirectionOutcome, RelayOutcome, ShutdownRead, SplitDuplex};
pub use session::{run_session, SessionContext, SessionReport, SessionState};
