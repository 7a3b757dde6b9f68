//! Per-connection session lifecycle.
//!
//! ```text
//! Init -> Racing -> NoBackend -> Closed
//!               \-> Connected -> Relaying -> Closed
//! ```
//!
//! A session never retries: once the race is lost, the inbound connection is
//! closed and the session ends.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use super::backend::{BackendAddr, BackendList};
use super::dial::Dialer;
use super::race::{race, RaceError, RaceStats};
use super::relay::{relay, RelayOutcome, SplitDuplex};

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Racing,
    NoBackend,
    Connected,
    Relaying,
    Closed,
}

impl SessionState {
    /// Whether `next` directly follows `self`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Init, Racing)
                | (Racing, NoBackend)
                | (Racing, Connected)
                | (NoBackend, Closed)
                | (Connected, Relaying)
                | (Relaying, Closed)
        )
    }
}

/// Read-only state shared by every session.
pub struct SessionContext<D> {
    /// Dialer used for racing.
    pub dialer: Arc<D>,
    /// Backends to race, fixed for the process lifetime.
    pub backends: BackendList,
    /// Optional per-direction read idle timeout.
    pub idle_timeout: Option<Duration>,
    /// Race counters.
    pub race_stats: Arc<RaceStats>,
}

impl<D> SessionContext<D> {
    /// Create a session context.
    pub fn new(dialer: D, backends: BackendList) -> Self {
        Self {
            dialer: Arc::new(dialer),
            backends,
            idle_timeout: None,
            race_stats: Arc::new(RaceStats::default()),
        }
    }

    /// Set the relay idle timeout.
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

/// What happened during a session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// Every state the session passed through, in order.
    pub path: Vec<SessionState>,
    /// Backend the session relayed to.
    pub backend: Option<BackendAddr>,
    /// Why no backend was obtained.
    pub race_error: Option<RaceError>,
    /// Relay result, if the relay ran.
    pub relay: Option<RelayOutcome>,
}

impl SessionReport {
    fn new() -> Self {
        Self {
            path: vec![SessionState::Init],
            backend: None,
            race_error: None,
            relay: None,
        }
    }

    /// Current (last) state.
    pub fn state(&self) -> SessionState {
        self.path.last().copied().unwrap_or(SessionState::Init)
    }

    fn transition(&mut self, next: SessionState) {
        let current = self.state();
        debug_assert!(
            current.can_transition_to(next),
            "invalid session transition {current:?} -> {next:?}"
        );
        debug!(from = ?current, to = ?next, "Session transition");
        self.path.push(next);
    }
}

/// Run one session: race the backends, then relay `inbound` to the winner.
///
/// `inbound` is closed on every path before this returns.
pub async fn run_session<I, D>(
    inbound: I,
    ctx: &SessionContext<D>,
    cancel: watch::Receiver<bool>,
) -> SessionReport
where
    I: SplitDuplex,
    D: Dialer,
    D::Conn: SplitDuplex,
{
    let mut report = SessionReport::new();

    report.transition(SessionState::Racing);
    let winner = race(
        Arc::clone(&ctx.dialer),
        &ctx.backends,
        cancel,
        Arc::clone(&ctx.race_stats),
    )
    .await;

    let winner = match winner {
        Ok(winner) => winner,
        Err(e) => {
            report.transition(SessionState::NoBackend);
            warn!(error = %e, "No available backends, closing connection");
            drop(inbound);
            report.race_error = Some(e);
            report.transition(SessionState::Closed);
            return report;
        }
    };

    report.transition(SessionState::Connected);
    debug!(backend = %winner.addr, "Connected to backend");
    report.backend = Some(winner.addr);

    report.transition(SessionState::Relaying);
    let outcome = relay(inbound, winner.conn, ctx.idle_timeout).await;

    debug!(
        bytes_to_backend = outcome.a_to_b.bytes,
        bytes_from_backend = outcome.b_to_a.bytes,
        "Relay finished"
    );
    report.relay = Some(outcome);
    report.transition(SessionState::Closed);

    report
}
