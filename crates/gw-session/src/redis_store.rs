use async_trait::async_trait;
use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use chrono::{DateTime, Duration, Utc};
use redis::AsyncCommands;

use crate::error::SessionStoreError;
use crate::record::{ConnHandle, RegisterOutcome, SessionRecord};
use crate::scoring;
use crate::store::SessionStore;

fn key(phy_id: &str) -> String {
    format!("gw:session:{phy_id}")
}

/// Multi-instance production backend. Every instance connects to the same
/// Redis (`session_store.addr`), through a pooled connection manager sized
/// by `session_store.pool_size`.
///
/// Each record is a JSON blob under `gw:session:<phy_id>` with a TTL refreshed
/// on every write; a crashed instance's records expire on their own, which is
/// what the in-memory store's `reap_expired` has to do by hand.
pub struct RedisSessionStore {
    pool: Pool<RedisConnectionManager>,
    ttl: Duration,
}

impl RedisSessionStore {
    pub async fn connect(addr: &str, pool_size: u32, ttl: Duration) -> Result<Self, SessionStoreError> {
        let manager = RedisConnectionManager::new(addr)?;
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .await?;
        Ok(RedisSessionStore { pool, ttl })
    }

    async fn read(&self, phy_id: &str) -> Result<Option<SessionRecord>, SessionStoreError> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = conn.get(key(phy_id)).await?;
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    async fn write(&self, record: &SessionRecord) -> Result<(), SessionStoreError> {
        let mut conn = self.pool.get().await?;
        let raw = serde_json::to_string(record)?;
        let ttl_secs = self.ttl.num_seconds().max(1) as u64;
        conn.set_ex(key(&record.phy_id), raw, ttl_secs).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn register(
        &self,
        phy_id: &str,
        instance_id: &str,
        conn_handle: ConnHandle,
        now: DateTime<Utc>,
    ) -> Result<RegisterOutcome, SessionStoreError> {
        let existing = self.read(phy_id).await?;
        let outcome = match &existing {
            Some(rec) if rec.instance_id != instance_id => RegisterOutcome::TookOver {
                previous_instance_id: rec.instance_id.clone(),
            },
            _ => RegisterOutcome::Fresh,
        };
        let record = SessionRecord::new(phy_id, instance_id, conn_handle, now);
        self.write(&record).await?;
        Ok(outcome)
    }

    async fn touch_heartbeat(&self, phy_id: &str, at: DateTime<Utc>) -> Result<(), SessionStoreError> {
        if let Some(mut rec) = self.read(phy_id).await? {
            rec.last_heartbeat_at = Some(at);
            self.write(&rec).await?;
        }
        Ok(())
    }

    async fn record_tcp_drop(&self, phy_id: &str, at: DateTime<Utc>) -> Result<(), SessionStoreError> {
        if let Some(mut rec) = self.read(phy_id).await? {
            rec.push_tcp_drop(at);
            self.write(&rec).await?;
        }
        Ok(())
    }

    async fn record_ack_timeout(&self, phy_id: &str, at: DateTime<Utc>) -> Result<(), SessionStoreError> {
        if let Some(mut rec) = self.read(phy_id).await? {
            rec.push_ack_timeout(at);
            self.write(&rec).await?;
        }
        Ok(())
    }

    async fn lookup(&self, phy_id: &str) -> Result<Option<SessionRecord>, SessionStoreError> {
        self.read(phy_id).await
    }

    async fn is_online(&self, phy_id: &str, now: DateTime<Utc>) -> Result<bool, SessionStoreError> {
        Ok(self
            .read(phy_id)
            .await?
            .map(|rec| scoring::is_online(&rec, now))
            .unwrap_or(false))
    }
}
