use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::error::SessionStoreError;
use crate::record::{ConnHandle, RegisterOutcome, SessionRecord};
use crate::scoring;
use crate::store::SessionStore;

/// Single-process session map, an `Arc<RwLock<HashMap<String, _>>>`
/// registry. Suitable for a single-instance gateway deployment that leaves
/// `session_store.addr` unset; a multi-instance
/// deployment needs `RedisSessionStore` instead since this type has no
/// notion of other processes.
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    records: Arc<RwLock<HashMap<String, SessionRecord>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove records whose last activity is older than `ttl`. Call this
    /// from a periodic task owned by bootstrap; a crashed instance's
    /// sessions are otherwise never cleaned up.
    pub async fn reap_expired(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, rec| now - rec.last_activity_at() < ttl);
        before - records.len()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn register(
        &self,
        phy_id: &str,
        instance_id: &str,
        conn_handle: ConnHandle,
        now: DateTime<Utc>,
    ) -> Result<RegisterOutcome, SessionStoreError> {
        let mut records = self.records.write().await;
        let outcome = match records.get(phy_id) {
            Some(existing) if existing.instance_id != instance_id => RegisterOutcome::TookOver {
                previous_instance_id: existing.instance_id.clone(),
            },
            _ => RegisterOutcome::Fresh,
        };
        records.insert(
            phy_id.to_string(),
            SessionRecord::new(phy_id, instance_id, conn_handle, now),
        );
        Ok(outcome)
    }

    async fn touch_heartbeat(&self, phy_id: &str, at: DateTime<Utc>) -> Result<(), SessionStoreError> {
        if let Some(rec) = self.records.write().await.get_mut(phy_id) {
            rec.last_heartbeat_at = Some(at);
        }
        Ok(())
    }

    async fn record_tcp_drop(&self, phy_id: &str, at: DateTime<Utc>) -> Result<(), SessionStoreError> {
        if let Some(rec) = self.records.write().await.get_mut(phy_id) {
            rec.push_tcp_drop(at);
        }
        Ok(())
    }

    async fn record_ack_timeout(&self, phy_id: &str, at: DateTime<Utc>) -> Result<(), SessionStoreError> {
        if let Some(rec) = self.records.write().await.get_mut(phy_id) {
            rec.push_ack_timeout(at);
        }
        Ok(())
    }

    async fn lookup(&self, phy_id: &str) -> Result<Option<SessionRecord>, SessionStoreError> {
        Ok(self.records.read().await.get(phy_id).cloned())
    }

    async fn is_online(&self, phy_id: &str, now: DateTime<Utc>) -> Result<bool, SessionStoreError> {
        Ok(self
            .records
            .read()
            .await
            .get(phy_id)
            .map(|rec| scoring::is_online(rec, now))
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_lookup_round_trips() {
        let store = InMemorySessionStore::new();
        let now = Utc::now();
        let outcome = store.register("dev-1", "inst-a", ConnHandle(1), now).await.unwrap();
        assert_eq!(outcome, RegisterOutcome::Fresh);
        let rec = store.lookup("dev-1").await.unwrap().unwrap();
        assert_eq!(rec.instance_id, "inst-a");
    }

    #[tokio::test]
    async fn second_instance_registering_is_a_takeover() {
        let store = InMemorySessionStore::new();
        let now = Utc::now();
        store.register("dev-1", "inst-a", ConnHandle(1), now).await.unwrap();
        let outcome = store.register("dev-1", "inst-b", ConnHandle(2), now).await.unwrap();
        assert_eq!(
            outcome,
            RegisterOutcome::TookOver {
                previous_instance_id: "inst-a".to_string()
            }
        );
        let rec = store.lookup("dev-1").await.unwrap().unwrap();
        assert_eq!(rec.instance_id, "inst-b");
    }

    #[tokio::test]
    async fn same_instance_reregistering_is_not_a_takeover() {
        let store = InMemorySessionStore::new();
        let now = Utc::now();
        store.register("dev-1", "inst-a", ConnHandle(1), now).await.unwrap();
        let outcome = store.register("dev-1", "inst-a", ConnHandle(2), now).await.unwrap();
        assert_eq!(outcome, RegisterOutcome::Fresh);
    }

    #[tokio::test]
    async fn heartbeat_then_is_online() {
        let store = InMemorySessionStore::new();
        let now = Utc::now();
        store.register("dev-1", "inst-a", ConnHandle(1), now).await.unwrap();
        store.touch_heartbeat("dev-1", now).await.unwrap();
        assert!(store.is_online("dev-1", now).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_device_is_offline_not_an_error() {
        let store = InMemorySessionStore::new();
        assert!(!store.is_online("ghost", Utc::now()).await.unwrap());
        assert!(store.lookup("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reap_expired_removes_stale_records_only() {
        let store = InMemorySessionStore::new();
        let now = Utc::now();
        store
            .register("stale", "inst-a", ConnHandle(1), now - Duration::minutes(20))
            .await
            .unwrap();
        store.register("fresh", "inst-a", ConnHandle(2), now).await.unwrap();

        let removed = store.reap_expired(now, Duration::minutes(15)).await;
        assert_eq!(removed, 1);
        assert!(store.lookup("stale").await.unwrap().is_none());
        assert!(store.lookup("fresh").await.unwrap().is_some());
    }
}
