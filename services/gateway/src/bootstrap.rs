//! Ordered startup (§4.9): nothing that could hand a frame to a device
//! starts before the things it depends on are up, and nothing shuts down
//! before what depends on it has stopped.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use gw_core::{BusinessHandlers, ConnConfig, ConnHandler, ConnRegistry, Metrics, OutboundConfig, OutboundWorker, ProtoRouter};
use gw_repo::{create_pool, run_migrations, Repository};
use gw_session::{InMemorySessionStore, RedisSessionStore, SessionStore};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::admin::AdminState;
use crate::config::GatewayConfig;
use crate::error::BootstrapError;
use crate::listener::Listener;

/// How long each shutdown step is given before bootstrap gives up on it and
/// moves to the next one anyway.
const SHUTDOWN_STEP_TIMEOUT: Duration = Duration::from_secs(10);
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// The async pool size for `ProtoRouter`'s per-device worker loops. Not a
/// config key in §6; it bounds in-process concurrency, not an external
/// resource, so it's a fixed constant rather than a tunable.
const ASYNC_HANDLER_POOL_SIZE: usize = 256;

pub struct Bootstrapped {
    pub metrics: Arc<Metrics>,
    pub repo: Repository,
    pub session_store: Arc<dyn SessionStore>,
    pub conn_handler: ConnHandler,
    pub outbound: Arc<OutboundWorker>,
    pub tcp_listener: TcpListener,
    pub admin_state: AdminState,
    pub shutdown: CancellationToken,
    pub listener: Listener,
    pub outbound_config: gw_core::OutboundConfig,
}

/// Runs steps 1-8 of §4.9. Step 9 (signal handling) is the caller's job,
/// since it needs to observe the running system, not just build it.
pub async fn bootstrap(config: &GatewayConfig, instance_id: Arc<str>) -> Result<Bootstrapped, BootstrapError> {
    // Step 1: metrics sink + structured logger is done by `main` before this
    // runs, installing `tracing_subscriber::fmt` first thing.
    let metrics = Arc::new(Metrics::default());

    let shutdown = CancellationToken::new();

    // Step 2 + 3: distributed session store, verified reachable, then wrap
    // it as the session manager the rest of the gateway talks to.
    let session_store: Arc<dyn SessionStore> = if config.session_store.addr.is_empty() {
        info!("session_store.addr unset, running single-instance in-memory session store");
        let mem_store = Arc::new(InMemorySessionStore::new());
        spawn_session_reaper(mem_store.clone(), config.session.ttl, shutdown.clone());
        mem_store
    } else {
        let ttl = chrono::Duration::from_std(config.session.ttl).unwrap_or(chrono::Duration::seconds(900));
        // Redis expires its own keys on that same TTL, so no reaper task is
        // needed for this backend.
        let store = RedisSessionStore::connect(&config.session_store.addr, config.session_store.pool_size, ttl).await?;
        // Verify reachability before declaring this step done.
        store.lookup("__bootstrap_probe__").await?;
        info!(addr = %config.session_store.addr, "connected to distributed session store");
        Arc::new(store)
    };
    warn_if_weights_diverge(config);

    // Step 4: database pool, migrations, fail fast.
    let pool = create_pool(&config.database.dsn, config.database.max_open, config.database.max_idle).await?;
    run_migrations(&pool).await?;
    info!("database migrations applied");
    let repo = Repository::new(pool);

    // Step 5: repositories + business handlers.
    let registry = ConnRegistry::new();
    let outbound_config = gw_core::OutboundConfig {
        scan_interval: config.outbound.scan_interval,
        retry_backoff_base: config.outbound.retry_backoff_base,
        retry_backoff_cap: config.outbound.retry_backoff_cap,
        max_tries: config.outbound.max_tries,
        batch_size: config.outbound.batch_size,
        high_watermark: config.outbound.high_watermark,
    };
    let outbound = Arc::new(OutboundWorker::new(
        repo.clone(),
        session_store.clone(),
        registry.clone(),
        instance_id.clone(),
        outbound_config.clone(),
        metrics.clone(),
    ));
    let handlers = Arc::new(BusinessHandlers::new(repo.clone(), session_store.clone(), outbound.clone()));
    let router = Arc::new(ProtoRouter::new(handlers, outbound.clone(), ASYNC_HANDLER_POOL_SIZE, metrics.clone()));
    let conn_config = ConnConfig {
        detect_timeout: config.tcp.detect_timeout,
        read_timeout: config.tcp.read_timeout,
        write_timeout: config.tcp.write_timeout,
        ..ConnConfig::default()
    };
    let conn_handler = ConnHandler::new(
        repo.clone(),
        session_store.clone(),
        router,
        registry,
        metrics.clone(),
        conn_config,
        instance_id,
    );

    // Step 6: admin HTTP (health, metrics), its own bind address.
    let listener_ready = Arc::new(AtomicBool::new(false));
    let admin_state = AdminState {
        metrics: metrics.clone(),
        repo: repo.clone(),
        session_store: session_store.clone(),
        listener_ready: listener_ready.clone(),
    };

    // Step 8: bind the TCP listener last (accepting starts only once the
    // caller finishes wiring steps 6-7 and calls `Listener::run`).
    let tcp_listener = Listener::bind(&config.tcp.addr).await?;

    let listener = Listener::new(&config.tcp, SHUTDOWN_GRACE_PERIOD);

    Ok(Bootstrapped {
        metrics,
        repo,
        session_store,
        conn_handler,
        outbound,
        tcp_listener,
        admin_state,
        shutdown,
        listener,
        outbound_config,
    })
}

/// `gw_session::scoring` uses fixed weight constants rather than
/// configurable ones (its S5 testable-property vectors are pinned to those
/// exact numbers); a config file that names different weights can't
/// actually change scoring behavior, so warn rather than silently ignore.
fn warn_if_weights_diverge(config: &GatewayConfig) {
    let w = &config.session.weights;
    if (w.heartbeat - gw_session::scoring::W_HB).abs() > f64::EPSILON
        || (w.drop - gw_session::scoring::W_DROP).abs() > f64::EPSILON
        || (w.ack - gw_session::scoring::W_ACK).abs() > f64::EPSILON
    {
        warn!(
            configured_heartbeat = w.heartbeat,
            configured_drop = w.drop,
            configured_ack = w.ack,
            "session.weights in config differ from the built-in scoring weights; the built-in weights are what actually apply"
        );
    }
    if (config.session.online_threshold - gw_session::scoring::ONLINE_THRESHOLD).abs() > f64::EPSILON {
        warn!(
            configured = config.session.online_threshold,
            "session.online_threshold in config differs from the built-in threshold; the built-in threshold is what actually applies"
        );
    }
}

pub const fn shutdown_step_timeout() -> Duration {
    SHUTDOWN_STEP_TIMEOUT
}

/// Periodic reaper for the single-instance in-memory session store, same
/// loop shape as `main`'s outbound scan task. The distributed (Redis) store
/// relies on key TTL instead and never needs this.
fn spawn_session_reaper(store: Arc<InMemorySessionStore>, ttl: Duration, shutdown: CancellationToken) {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(900));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let reaped = store.reap_expired(chrono::Utc::now(), ttl);
                    if reaped > 0 {
                        info!(reaped, "session reaper removed expired in-memory sessions");
                    }
                }
            }
        }
    });
}
