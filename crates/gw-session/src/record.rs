use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque reference to a local connection resource. `gw-session` never looks
/// inside this value — it's whatever `gw-core`'s `ConnHandler` registry uses
/// to find the connection again (in practice a per-connection generation
/// counter), kept here only so a `lookup` can hand it back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnHandle(pub u64);

/// How many recent negative signals of one kind we keep for scoring. A
/// second drop shortly after the first should pull the score down further
/// than a single drop would — see `scoring::score` — but unbounded history
/// would never shrink for a flapping device, so we cap it.
pub(crate) const MAX_SIGNAL_HISTORY: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub phy_id: String,
    pub instance_id: String,
    pub conn_handle: ConnHandle,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub tcp_drops: VecDeque<DateTime<Utc>>,
    pub ack_timeouts: VecDeque<DateTime<Utc>>,
}

impl SessionRecord {
    pub fn new(phy_id: impl Into<String>, instance_id: impl Into<String>, conn_handle: ConnHandle, now: DateTime<Utc>) -> Self {
        SessionRecord {
            phy_id: phy_id.into(),
            instance_id: instance_id.into(),
            conn_handle,
            registered_at: now,
            last_heartbeat_at: None,
            tcp_drops: VecDeque::new(),
            ack_timeouts: VecDeque::new(),
        }
    }

    pub fn push_tcp_drop(&mut self, at: DateTime<Utc>) {
        push_bounded(&mut self.tcp_drops, at);
    }

    pub fn push_ack_timeout(&mut self, at: DateTime<Utc>) {
        push_bounded(&mut self.ack_timeouts, at);
    }

    /// The most recent timestamp of any activity on this record, used by the
    /// TTL reaper to decide if a crashed instance's session is stale.
    pub fn last_activity_at(&self) -> DateTime<Utc> {
        [
            Some(self.registered_at),
            self.last_heartbeat_at,
            self.tcp_drops.back().copied(),
            self.ack_timeouts.back().copied(),
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(self.registered_at)
    }
}

fn push_bounded(deque: &mut VecDeque<DateTime<Utc>>, at: DateTime<Utc>) {
    deque.push_back(at);
    while deque.len() > MAX_SIGNAL_HISTORY {
        deque.pop_front();
    }
}

/// Result of a `register` call: whether it created a fresh record or
/// dislodged a different instance's claim on the same `phy_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    Fresh,
    TookOver { previous_instance_id: String },
}
