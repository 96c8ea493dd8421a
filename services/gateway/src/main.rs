use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Arg, Command};
use gateway::bootstrap::{bootstrap, shutdown_step_timeout};
use gateway::{admin, config};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn validate_log_level(value: &str) -> Result<String, String> {
    match value.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(value.to_owned()),
        _ => Err(format!("invalid log level '{value}', expected one of trace/debug/info/warn/error")),
    }
}

#[tokio::main]
async fn main() {
    let matches = Command::new("Charging Gateway")
        .version(env!("CARGO_PKG_VERSION"))
        .about("TCP gateway for charging-pile devices")
        .arg(
            Arg::new("config")
                .help("Path to the gateway's TOML config file")
                .short('c')
                .long("config")
                .default_value("/etc/gateway/gateway.toml"),
        )
        .arg(
            Arg::new("log_level")
                .help("Overrides RUST_LOG for this process")
                .short('l')
                .long("log-level")
                .value_parser(validate_log_level),
        )
        .get_matches();

    let log_level = matches.get_one::<String>("log_level").cloned();
    tracing_subscriber::fmt()
        .with_env_filter(match log_level {
            Some(level) => EnvFilter::new(level),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        })
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "gateway starting");

    let config_path = PathBuf::from(matches.get_one::<String>("config").expect("config has a default"));
    let cfg = match config::load_config_from_path(&config_path) {
        Ok(cfg) => cfg,
        Err(err) => {
            // `anyhow::Error`'s Debug impl prints the full source chain,
            // which plain `thiserror` Display doesn't; only used here and at
            // the bootstrap boundary, never inside a library signature.
            error!(error = ?anyhow::Error::from(err), path = %config_path.display(), "failed to load configuration");
            std::process::exit(1);
        }
    };

    let instance_id: Arc<str> = Arc::from(uuid::Uuid::new_v4().to_string());
    info!(%instance_id, "instance identity assigned");

    let bootstrapped = match bootstrap(&cfg, instance_id).await {
        Ok(b) => b,
        Err(err) => {
            error!(error = ?anyhow::Error::from(err), "bootstrap failed");
            std::process::exit(1);
        }
    };

    let admin_listener = match tokio::net::TcpListener::bind(&cfg.admin.bind)
        .await
        .map_err(gateway::BootstrapError::AdminBind)
    {
        Ok(l) => l,
        Err(err) => {
            error!(error = %err, addr = %cfg.admin.bind, "failed to bind admin HTTP listener");
            std::process::exit(1);
        }
    };
    info!(addr = %cfg.admin.bind, "admin HTTP listening");

    let admin_router = admin::build_router(bootstrapped.admin_state.clone());
    let admin_shutdown = bootstrapped.shutdown.clone();
    let admin_task = tokio::spawn(async move {
        axum::serve(admin_listener, admin_router)
            .with_graceful_shutdown(async move { admin_shutdown.cancelled().await })
            .await
    });

    // Step 7: cold-start scan runs once before the periodic scan loop takes
    // over, same ordering as `services/forwarder`'s replay engine re-arming
    // before its steady-state uplink loop starts.
    if let Err(err) = bootstrapped.outbound.cold_start_scan().await {
        warn!(error = %err, "cold-start scan failed, continuing with periodic scan only");
    }
    let outbound = bootstrapped.outbound.clone();
    let outbound_shutdown = bootstrapped.shutdown.clone();
    let scan_interval = bootstrapped.outbound_config.scan_interval;
    let outbound_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(scan_interval);
        loop {
            tokio::select! {
                biased;
                () = outbound_shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = outbound.scan_once().await {
                        warn!(error = %err, "outbound scan_once failed");
                    }
                }
            }
        }
    });

    // Step 8: the TCP listener, last.
    let listener_shutdown = bootstrapped.shutdown.clone();
    let listener_ready = bootstrapped.admin_state.listener_ready.clone();
    let conn_handler = bootstrapped.conn_handler.clone();
    let main_shutdown = bootstrapped.shutdown.clone();
    let listener_task = tokio::spawn(async move {
        bootstrapped
            .listener
            .run(bootstrapped.tcp_listener, conn_handler, listener_shutdown, listener_ready)
            .await
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining in reverse startup order");
    bootstrapped_shutdown(admin_task, outbound_task, listener_task, main_shutdown).await;
}

/// Reverse-order shutdown of steps 8, 7, 6 (§4.9 step 9): the listener
/// drains its own connections internally and is given the longest budget,
/// then the outbound scan loop, then the admin HTTP server.
async fn bootstrapped_shutdown(
    admin_task: tokio::task::JoinHandle<std::io::Result<()>>,
    outbound_task: tokio::task::JoinHandle<()>,
    listener_task: tokio::task::JoinHandle<Result<(), gateway::RuntimeError>>,
    shutdown: tokio_util::sync::CancellationToken,
) {
    shutdown.cancel();

    let mut exit_code = 0;
    match tokio::time::timeout(Duration::from_secs(35), listener_task).await {
        Ok(Ok(Ok(()))) => info!("listener shut down cleanly"),
        Ok(Ok(Err(err))) => {
            error!(error = %err, "listener reported a fatal runtime error");
            exit_code = 2;
        }
        Ok(Err(err)) => {
            error!(error = %err, "listener task panicked");
            exit_code = 2;
        }
        Err(_) => {
            error!("listener did not shut down within its grace period");
            exit_code = 2;
        }
    }

    if tokio::time::timeout(shutdown_step_timeout(), outbound_task).await.is_err() {
        warn!("outbound scan loop did not stop within its shutdown timeout");
    }

    if tokio::time::timeout(shutdown_step_timeout(), admin_task).await.is_err() {
        warn!("admin HTTP server did not stop within its shutdown timeout");
    }

    info!("gateway shut down");
    std::process::exit(exit_code);
}

/// Waits for SIGTERM or Ctrl-C (SIGINT), racing both signal futures.
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
