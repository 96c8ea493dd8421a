//! Gateway configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides except
//! `RUST_LOG`, which `main` reads directly for the tracing filter.
//! Default config path: `/etc/gateway/gateway.toml`.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

// ---------------------------------------------------------------------------
// Config types (what the rest of the binary consumes)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub tcp: TcpConfig,
    pub outbound: OutboundConfig,
    pub session: SessionConfig,
    pub database: DatabaseConfig,
    pub session_store: SessionStoreConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone)]
pub struct TcpConfig {
    pub addr: String,
    pub max_connections: u32,
    pub accept_rate_per_sec: u32,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub detect_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct OutboundConfig {
    pub scan_interval: Duration,
    pub retry_backoff_base: Duration,
    pub retry_backoff_cap: Duration,
    pub max_tries: i32,
    pub batch_size: i64,
    pub high_watermark: i64,
}

#[derive(Debug, Clone)]
pub struct SessionWeights {
    pub heartbeat: f64,
    pub drop: f64,
    pub ack: f64,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub online_threshold: f64,
    pub ttl: Duration,
    pub weights: SessionWeights,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub dsn: String,
    pub max_open: u32,
    pub max_idle: u32,
    pub conn_max_lifetime: Duration,
}

/// `addr` empty means "no distributed store" — bootstrap runs
/// `InMemorySessionStore` instead of dialing Redis.
#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    pub addr: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub bind: String,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    tcp: Option<RawTcpConfig>,
    outbound: Option<RawOutboundConfig>,
    session: Option<RawSessionConfig>,
    database: Option<RawDatabaseConfig>,
    session_store: Option<RawSessionStoreConfig>,
    admin: Option<RawAdminConfig>,
}

#[derive(Debug, Deserialize)]
struct RawTcpConfig {
    addr: Option<String>,
    max_connections: Option<u32>,
    accept_rate_per_sec: Option<u32>,
    read_timeout_secs: Option<u64>,
    write_timeout_secs: Option<u64>,
    detect_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawOutboundConfig {
    scan_interval_secs: Option<u64>,
    retry_backoff_base_secs: Option<u64>,
    retry_backoff_cap_secs: Option<u64>,
    max_tries: Option<i32>,
    batch_size: Option<i64>,
    high_watermark: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawSessionWeights {
    heartbeat: Option<f64>,
    drop: Option<f64>,
    ack: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawSessionConfig {
    online_threshold: Option<f64>,
    ttl_secs: Option<u64>,
    weights: Option<RawSessionWeights>,
}

#[derive(Debug, Deserialize)]
struct RawDatabaseConfig {
    dsn: Option<String>,
    max_open: Option<u32>,
    max_idle: Option<u32>,
    conn_max_lifetime_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawSessionStoreConfig {
    addr: Option<String>,
    pool_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawAdminConfig {
    bind: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub fn load_config_from_path(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

pub fn load_config() -> Result<GatewayConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/gateway/gateway.toml"))
}

/// `database.dsn` is the only field with no built-in default — every other
/// section falls back to its documented defaults when omitted, or when the
/// whole section is missing.
pub fn load_config_from_str(toml_str: &str) -> Result<GatewayConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let tcp = match raw.tcp {
        Some(t) => TcpConfig {
            addr: t.addr.unwrap_or_else(|| "0.0.0.0:7000".to_owned()),
            max_connections: t.max_connections.unwrap_or(50_000),
            accept_rate_per_sec: t.accept_rate_per_sec.unwrap_or(500),
            read_timeout: Duration::from_secs(t.read_timeout_secs.unwrap_or(90)),
            write_timeout: Duration::from_secs(t.write_timeout_secs.unwrap_or(10)),
            detect_timeout: Duration::from_secs(t.detect_timeout_secs.unwrap_or(5)),
        },
        None => TcpConfig {
            addr: "0.0.0.0:7000".to_owned(),
            max_connections: 50_000,
            accept_rate_per_sec: 500,
            read_timeout: Duration::from_secs(90),
            write_timeout: Duration::from_secs(10),
            detect_timeout: Duration::from_secs(5),
        },
    };

    let outbound = match raw.outbound {
        Some(o) => OutboundConfig {
            scan_interval: Duration::from_secs(o.scan_interval_secs.unwrap_or(5)),
            retry_backoff_base: Duration::from_secs(o.retry_backoff_base_secs.unwrap_or(2)),
            retry_backoff_cap: Duration::from_secs(o.retry_backoff_cap_secs.unwrap_or(120)),
            max_tries: o.max_tries.unwrap_or(3),
            batch_size: o.batch_size.unwrap_or(50),
            high_watermark: o.high_watermark.unwrap_or(10_000),
        },
        None => OutboundConfig {
            scan_interval: Duration::from_secs(5),
            retry_backoff_base: Duration::from_secs(2),
            retry_backoff_cap: Duration::from_secs(120),
            max_tries: 3,
            batch_size: 50,
            high_watermark: 10_000,
        },
    };

    let session = match raw.session {
        Some(s) => SessionConfig {
            online_threshold: s.online_threshold.unwrap_or(0.5),
            ttl: Duration::from_secs(s.ttl_secs.unwrap_or(900)),
            weights: match s.weights {
                Some(w) => SessionWeights {
                    heartbeat: w.heartbeat.unwrap_or(1.0),
                    drop: w.drop.unwrap_or(-0.2),
                    ack: w.ack.unwrap_or(-0.3),
                },
                None => default_weights(),
            },
        },
        None => SessionConfig {
            online_threshold: 0.5,
            ttl: Duration::from_secs(900),
            weights: default_weights(),
        },
    };

    let database = {
        let raw_db = raw.database.ok_or_else(|| ConfigError::MissingField("database".to_owned()))?;
        let dsn = raw_db.dsn.ok_or_else(|| ConfigError::MissingField("database.dsn".to_owned()))?;
        DatabaseConfig {
            dsn,
            max_open: raw_db.max_open.unwrap_or(50),
            max_idle: raw_db.max_idle.unwrap_or(10),
            conn_max_lifetime: Duration::from_secs(raw_db.conn_max_lifetime_secs.unwrap_or(1800)),
        }
    };

    let session_store = match raw.session_store {
        Some(s) => SessionStoreConfig {
            addr: s.addr.unwrap_or_default(),
            pool_size: s.pool_size.unwrap_or(16),
        },
        None => SessionStoreConfig { addr: String::new(), pool_size: 16 },
    };

    let admin = match raw.admin {
        Some(a) => AdminConfig { bind: a.bind.unwrap_or_else(|| "0.0.0.0:7055".to_owned()) },
        None => AdminConfig { bind: "0.0.0.0:7055".to_owned() },
    };

    Ok(GatewayConfig { tcp, outbound, session, database, session_store, admin })
}

fn default_weights() -> SessionWeights {
    SessionWeights { heartbeat: 1.0, drop: -0.2, ack: -0.3 }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {s}"),
            ConfigError::Parse(s) => write!(f, "Parse error: {s}"),
            ConfigError::MissingField(s) => write!(f, "Missing required field: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_database_section_is_an_error() {
        let err = load_config_from_str("").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(f) if f == "database"));
    }

    #[test]
    fn minimal_config_applies_documented_defaults() {
        let cfg = load_config_from_str("[database]\ndsn = \"postgres://x\"\n").unwrap();
        assert_eq!(cfg.tcp.addr, "0.0.0.0:7000");
        assert_eq!(cfg.tcp.max_connections, 50_000);
        assert_eq!(cfg.tcp.accept_rate_per_sec, 500);
        assert_eq!(cfg.outbound.max_tries, 3);
        assert_eq!(cfg.session.online_threshold, 0.5);
        assert_eq!(cfg.session_store.addr, "");
        assert_eq!(cfg.admin.bind, "0.0.0.0:7055");
    }

    #[test]
    fn overrides_take_effect() {
        let toml_str = r#"
[tcp]
addr = "127.0.0.1:9000"
max_connections = 100

[database]
dsn = "postgres://x"
max_open = 5

[session_store]
addr = "redis://localhost:6379"
pool_size = 4
"#;
        let cfg = load_config_from_str(toml_str).unwrap();
        assert_eq!(cfg.tcp.addr, "127.0.0.1:9000");
        assert_eq!(cfg.tcp.max_connections, 100);
        assert_eq!(cfg.database.max_open, 5);
        assert_eq!(cfg.session_store.addr, "redis://localhost:6379");
        assert_eq!(cfg.session_store.pool_size, 4);
    }
}
