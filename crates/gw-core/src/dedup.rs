use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub phy_id: String,
    pub command_code: u16,
    pub sequence: u32,
}

/// Bounded, LRU, 10-minute-TTL cache of `(phy_id, command_code, sequence) ->
/// previously sent ACK bytes`, per §4.6: a retransmitted frame short-circuits
/// straight to re-sending the original ACK instead of re-running the
/// business handler.
pub struct DedupCache {
    inner: Mutex<LruCache<DedupKey, (DateTime<Utc>, Vec<u8>)>>,
    ttl: Duration,
}

impl DedupCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        DedupCache {
            inner: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).unwrap(),
            )),
            ttl,
        }
    }

    pub fn default_with_ttl_minutes(minutes: i64) -> Self {
        Self::new(100_000, Duration::minutes(minutes))
    }

    /// If `key` was seen within the TTL, returns the cached ACK bytes to
    /// re-send. Otherwise records nothing and returns `None` — the caller is
    /// expected to call [`DedupCache::store`] once it has actually produced
    /// an ACK for this key.
    pub fn lookup(&self, key: &DedupKey, now: DateTime<Utc>) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        match inner.get(key) {
            Some((seen_at, ack)) if now - *seen_at < self.ttl => Some(ack.clone()),
            Some(_) => {
                inner.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn store(&self, key: DedupKey, now: DateTime<Utc>, ack: Vec<u8>) {
        self.inner.lock().unwrap().put(key, (now, ack));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seq: u32) -> DedupKey {
        DedupKey {
            phy_id: "dev-1".into(),
            command_code: 0x0007,
            sequence: seq,
        }
    }

    #[test]
    fn fresh_key_is_not_a_duplicate() {
        let cache = DedupCache::new(16, Duration::minutes(10));
        assert!(cache.lookup(&key(1), Utc::now()).is_none());
    }

    #[test]
    fn stored_key_short_circuits_within_ttl() {
        let cache = DedupCache::new(16, Duration::minutes(10));
        let now = Utc::now();
        cache.store(key(1), now, vec![0xAA]);
        assert_eq!(cache.lookup(&key(1), now + Duration::minutes(5)), Some(vec![0xAA]));
    }

    #[test]
    fn entry_expires_after_ttl() {
        let cache = DedupCache::new(16, Duration::minutes(10));
        let now = Utc::now();
        cache.store(key(1), now, vec![0xAA]);
        assert_eq!(cache.lookup(&key(1), now + Duration::minutes(11)), None);
    }
}
