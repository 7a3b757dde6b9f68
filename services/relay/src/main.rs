//! race-relay
//!
//! Transparent TCP relay. For each inbound connection it:
//! - Dials every configured backend concurrently
//! - Keeps the first connection to complete and closes the rest
//! - Relays bytes both ways, propagating half-closes, until both sides finish

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use race_relay::{Config, Listener, ListenerConfig, LogFormat, SessionContext, TcpDialer};

/// How long to wait for active sessions after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to RELAY_LOG_LEVEL)
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into());
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    info!("Starting race-relay");
    let backends = config
        .backends
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    info!(
        bind_addr = %config.bind_addr,
        backends = %backends,
        keepalive = ?config.dial.keepalive,
        connect_timeout = ?config.dial.connect_timeout,
        idle_timeout = ?config.idle_timeout,
        "Configuration loaded"
    );

    let ctx = Arc::new(
        SessionContext::new(TcpDialer::new(config.dial.clone()), config.backends.clone())
            .with_idle_timeout(config.idle_timeout),
    );

    let mut listener_config = ListenerConfig::new(config.bind_addr);
    listener_config.max_connections = config.max_connections;
    listener_config.fatal_accept_errors = config.fatal_accept_errors;

    let listener = Listener::bind(listener_config, ctx)
        .await
        .with_context(|| format!("failed to listen on {}", config.bind_addr))?;
    let listener = Arc::new(listener);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut listener_handle = tokio::spawn(Arc::clone(&listener).run(shutdown_rx));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut listener_handle => {
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e).context("accept failed"),
                Err(e) => Err(e).context("listener task panicked"),
            };
        }
    }

    // Stop accepting and cancel in-flight races.
    let _ = shutdown_tx.send(true);
    if let Err(e) = listener_handle.await {
        error!(error = %e, "Listener task panicked");
    }

    info!("Waiting for active sessions to finish...");
    let deadline = Instant::now() + SHUTDOWN_GRACE;
    while listener.stats().connections_active.load(Ordering::Relaxed) > 0 {
        if Instant::now() >= deadline {
            warn!(
                active = listener.stats().connections_active.load(Ordering::Relaxed),
                "Shutdown grace period elapsed with sessions still active"
            );
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let stats = listener.stats();
    let race_stats = &listener.context().race_stats;
    info!(
        connections_accepted = stats.connections_accepted.load(Ordering::Relaxed),
        backend_connected = stats.backend_connected.load(Ordering::Relaxed),
        backend_unavailable = stats.backend_unavailable.load(Ordering::Relaxed),
        dials_attempted = race_stats.dials_attempted.load(Ordering::Relaxed),
        losers_closed = race_stats.losers_closed.load(Ordering::Relaxed),
        bytes_to_backend = stats.bytes_to_backend.load(Ordering::Relaxed),
        bytes_from_backend = stats.bytes_from_backend.load(Ordering::Relaxed),
        "race-relay shutdown complete"
    );
    Ok(())
}
