use thiserror::Error;

/// Failures that can occur while bringing the gateway up, before it's ever
/// accepted a connection. Every variant maps to exit code 1 (§6).
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("session store unreachable: {0}")]
    SessionStore(#[from] gw_session::SessionStoreError),

    #[error("database error: {0}")]
    Database(#[from] gw_repo::RepoError),

    #[error("failed to bind TCP listener: {0}")]
    ListenerBind(std::io::Error),

    #[error("failed to bind admin HTTP listener: {0}")]
    AdminBind(std::io::Error),
}

/// A failure severe enough that the gateway can't continue running. Maps to
/// exit code 2 (§6) — distinct from `BootstrapError`, which fires before
/// anything has started serving traffic.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("accept loop failed {0} times consecutively, giving up")]
    ListenerExhausted(u32),
}
