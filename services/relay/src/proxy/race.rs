//! Dial racing.
//!
//! Every backend is dialed concurrently and the first connection to complete
//! wins. Losing attempts are never cancelled once the race resolves: a drain
//! task keeps the task group alive, joins every attempt, and drops any
//! connection that arrives after the winner. Only an explicit cancellation
//! signal aborts in-flight dials.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::backend::BackendAddr;
use super::dial::Dialer;

/// Why a race produced no backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RaceError {
    /// The backend list is empty.
    #[error("no backends configured")]
    NoBackends,

    /// Every dial attempt failed.
    #[error("all {attempted} backend dials failed")]
    AllBackendsFailed { attempted: usize },

    /// The race was cancelled before any dial succeeded.
    #[error("race cancelled")]
    Cancelled,
}

/// The connection that won a race.
#[derive(Debug)]
pub struct RaceWinner<C> {
    /// Position of the winning address in the backend list.
    pub index: usize,
    /// The winning address.
    pub addr: BackendAddr,
    /// The established connection.
    pub conn: C,
}

/// Counters shared across races.
#[derive(Debug, Default)]
pub struct RaceStats {
    /// Dial attempts launched.
    pub dials_attempted: AtomicU64,
    /// Dial attempts that failed or were cancelled.
    pub dials_failed: AtomicU64,
    /// Successful dials closed because another attempt won.
    pub losers_closed: AtomicU64,
}

/// Resolves once `cancel` reads `true`. Never resolves if the sender is gone.
pub async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Race dials to every address in `backends`, returning the first success.
pub async fn race<D: Dialer>(
    dialer: Arc<D>,
    backends: &[BackendAddr],
    cancel: watch::Receiver<bool>,
    stats: Arc<RaceStats>,
) -> Result<RaceWinner<D::Conn>, RaceError> {
    if backends.is_empty() {
        return Err(RaceError::NoBackends);
    }

    // One slot per attempt so no dial task ever blocks on hand-off.
    let (tx, mut rx) = mpsc::channel(backends.len());
    let mut attempts = JoinSet::new();

    for (index, addr) in backends.iter().cloned().enumerate() {
        let tx = tx.clone();
        let dialer = Arc::clone(&dialer);
        let mut cancel = cancel.clone();
        let stats = Arc::clone(&stats);

        stats.dials_attempted.fetch_add(1, Ordering::Relaxed);
        attempts.spawn(async move {
            let result = tokio::select! {
                result = dialer.dial(&addr) => result,
                _ = cancelled(&mut cancel) => {
                    stats.dials_failed.fetch_add(1, Ordering::Relaxed);
                    debug!(backend = %addr, "Dial cancelled");
                    return;
                }
            };

            match result {
                Ok(conn) => {
                    // The receiver outlives every sender, so this only fails
                    // if the drain task panicked; the connection is dropped.
                    let _ = tx.send(RaceWinner { index, addr, conn }).await;
                }
                Err(e) => {
                    stats.dials_failed.fetch_add(1, Ordering::Relaxed);
                    debug!(backend = %addr, error = %e, "Dial failed");
                }
            }
        });
    }
    drop(tx);

    // None means every sender is gone without delivering a connection.
    let winner = rx.recv().await;

    tokio::spawn(drain_losers(rx, attempts, stats));

    match winner {
        Some(winner) => {
            debug!(backend = %winner.addr, index = winner.index, "Dial race won");
            Ok(winner)
        }
        None if *cancel.borrow() => Err(RaceError::Cancelled),
        None => Err(RaceError::AllBackendsFailed {
            attempted: backends.len(),
        }),
    }
}

/// Close late winners and join every remaining dial task.
async fn drain_losers<C: Send + 'static>(
    mut rx: mpsc::Receiver<RaceWinner<C>>,
    mut attempts: JoinSet<()>,
    stats: Arc<RaceStats>,
) {
    let close_losers = async {
        while let Some(loser) = rx.recv().await {
            stats.losers_closed.fetch_add(1, Ordering::Relaxed);
            debug!(backend = %loser.addr, index = loser.index, "Closing losing connection");
            drop(loser.conn);
        }
    };

    let join_attempts = async {
        while let Some(joined) = attempts.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Dial task did not complete");
            }
        }
    };

    tokio::join!(close_losers, join_attempts);
}
