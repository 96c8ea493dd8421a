use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

/// `phy_id -> this instance's write channel for the connection currently
/// serving it`. Distinct from `ProtoRouter`'s device-keyed job queues: this
/// is what `OutboundWorker` consults to find a live socket to write a
/// queued command into, for a device whose session this instance owns.
#[derive(Clone, Default)]
pub struct ConnRegistry {
    inner: Arc<RwLock<HashMap<String, mpsc::Sender<Vec<u8>>>>>,
}

impl ConnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, phy_id: &str, write_tx: mpsc::Sender<Vec<u8>>) {
        self.inner.write().await.insert(phy_id.to_string(), write_tx);
    }

    /// Only removes the entry if it still belongs to `write_tx` — a
    /// superseded connection's cleanup must not evict the new owner's entry
    /// if a takeover already replaced it.
    pub async fn unregister_if_current(&self, phy_id: &str, write_tx: &mpsc::Sender<Vec<u8>>) {
        let mut inner = self.inner.write().await;
        if let Some(current) = inner.get(phy_id) {
            if current.same_channel(write_tx) {
                inner.remove(phy_id);
            }
        }
    }

    pub async fn get(&self, phy_id: &str) -> Option<mpsc::Sender<Vec<u8>>> {
        self.inner.read().await.get(phy_id).cloned()
    }
}
