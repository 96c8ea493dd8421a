//! TCP accept loop: bounded accept rate, a global connection ceiling, and a
//! grace period on shutdown before forcibly dropping anything still open.
//! The per-connection work itself (protocol detection, frame loop, writer
//! task) is all `gw_core::ConnHandler`; this module only gates how fast and
//! how many connections reach it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gw_core::ConnHandler;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::TcpConfig;
use crate::error::{BootstrapError, RuntimeError};

/// Consecutive `accept()` failures tolerated before the loop gives up and
/// reports a fatal runtime error (§6 exit code 2).
const MAX_CONSECUTIVE_ACCEPT_ERRORS: u32 = 20;

pub struct Listener {
    max_connections: u32,
    accept_rate_per_sec: u32,
    shutdown_grace: Duration,
}

impl Listener {
    pub fn new(cfg: &TcpConfig, shutdown_grace: Duration) -> Self {
        Listener {
            max_connections: cfg.max_connections,
            accept_rate_per_sec: cfg.accept_rate_per_sec,
            shutdown_grace,
        }
    }

    /// Binds the socket. Kept separate from `run` so bootstrap can treat a
    /// bind failure as a step-8 `BootstrapError` (exit 1) and anything that
    /// goes wrong afterward as a `RuntimeError` (exit 2).
    pub async fn bind(addr: &str) -> Result<TcpListener, BootstrapError> {
        TcpListener::bind(addr).await.map_err(BootstrapError::ListenerBind)
    }

    /// Runs the accept loop until `shutdown` fires, then waits up to
    /// `shutdown_grace` for in-flight connections to drain before returning.
    pub async fn run(
        &self,
        listener: TcpListener,
        handler: ConnHandler,
        shutdown: CancellationToken,
        listener_ready: Arc<AtomicBool>,
    ) -> Result<(), RuntimeError> {
        let permits = Arc::new(Semaphore::new(self.max_connections as usize));
        let mut ticker = tokio::time::interval(Duration::from_secs(1) / self.accept_rate_per_sec.max(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        listener_ready.store(true, Ordering::Relaxed);
        info!(addr = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(), "tcp listener accepting");

        let mut consecutive_errors = 0u32;
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                        // At the connection ceiling; drop this tick's accept slot.
                        continue;
                    };
                    tokio::select! {
                        () = shutdown.cancelled() => { drop(permit); break; }
                        accepted = listener.accept() => {
                            match accepted {
                                Ok((stream, peer)) => {
                                    consecutive_errors = 0;
                                    let conn_handler = handler.clone();
                                    let conn_shutdown = shutdown.clone();
                                    tokio::spawn(async move {
                                        conn_handler.run(stream, conn_shutdown).await;
                                        drop(permit);
                                    });
                                    tracing::debug!(%peer, "accepted connection");
                                }
                                Err(err) => {
                                    consecutive_errors += 1;
                                    warn!(error = %err, consecutive_errors, "accept() failed");
                                    drop(permit);
                                    if consecutive_errors >= MAX_CONSECUTIVE_ACCEPT_ERRORS {
                                        return Err(RuntimeError::ListenerExhausted(consecutive_errors));
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        listener_ready.store(false, Ordering::Relaxed);
        info!("tcp listener shutting down, draining connections");
        let remaining = self.max_connections as usize - permits.available_permits();
        if remaining > 0 {
            let drained = tokio::time::timeout(self.shutdown_grace, async {
                let _ = permits.acquire_many(remaining as u32).await;
            })
            .await;
            if drained.is_err() {
                warn!(remaining, "shutdown grace period elapsed with connections still open");
            }
        }
        Ok(())
    }
}
