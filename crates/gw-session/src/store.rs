use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SessionStoreError;
use crate::record::{ConnHandle, RegisterOutcome, SessionRecord};

/// Distributed `phy_id -> session record` map, usable for O(1) lookup from
/// any gateway instance. `InMemorySessionStore` backs single-instance
/// deployments; `RedisSessionStore` is the multi-instance production
/// backend. Both implement the same five operations — the only
/// backend-specific concept either exposes is TTL.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn register(
        &self,
        phy_id: &str,
        instance_id: &str,
        conn_handle: ConnHandle,
        now: DateTime<Utc>,
    ) -> Result<RegisterOutcome, SessionStoreError>;

    async fn touch_heartbeat(&self, phy_id: &str, at: DateTime<Utc>) -> Result<(), SessionStoreError>;

    async fn record_tcp_drop(&self, phy_id: &str, at: DateTime<Utc>) -> Result<(), SessionStoreError>;

    async fn record_ack_timeout(&self, phy_id: &str, at: DateTime<Utc>) -> Result<(), SessionStoreError>;

    async fn lookup(&self, phy_id: &str) -> Result<Option<SessionRecord>, SessionStoreError>;

    async fn is_online(&self, phy_id: &str, now: DateTime<Utc>) -> Result<bool, SessionStoreError>;
}
