use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use gw_protocol::{self, Direction, Frame, GatewayId, Variant};
use gw_repo::models::priority;
use gw_repo::{devices, outbound, Repository};
use gw_session::SessionStore;
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::OutboundError;
use crate::metrics::Metrics;
use crate::registry::ConnRegistry;

#[derive(Debug, Clone)]
pub struct OutboundConfig {
    pub scan_interval: StdDuration,
    pub retry_backoff_base: StdDuration,
    pub retry_backoff_cap: StdDuration,
    pub max_tries: i32,
    pub batch_size: i64,
    pub high_watermark: i64,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        OutboundConfig {
            scan_interval: StdDuration::from_secs(5),
            retry_backoff_base: StdDuration::from_secs(2),
            retry_backoff_cap: StdDuration::from_secs(120),
            max_tries: 3,
            batch_size: 50,
            high_watermark: 10_000,
        }
    }
}

fn backoff_for(tries: i32, base: StdDuration, cap: StdDuration) -> Duration {
    let exp = 2u64.saturating_pow(tries.max(0) as u32);
    let raw = base.saturating_mul(exp as u32).min(cap);
    let jitter_ms = rand::thread_rng().gen_range(0..=100);
    Duration::milliseconds(raw.as_millis() as i64 + jitter_ms)
}

/// Durable, priority-ordered outbound queue. Two loops per instance, both
/// owned by bootstrap: a one-shot cold-start scan (messages stuck in `sent`
/// from a previous instance's crash, re-armed without bumping `tries`) and a
/// periodic scan that actually drains the due-queue, modeled on the
/// teacher's uplink-session-loop + replay-engine pairing in
/// `services/forwarder`.
pub struct OutboundWorker {
    repo: Repository,
    session_store: Arc<dyn SessionStore>,
    conn_registry: ConnRegistry,
    instance_id: Arc<str>,
    config: OutboundConfig,
    metrics: Arc<Metrics>,
}

impl OutboundWorker {
    pub fn new(
        repo: Repository,
        session_store: Arc<dyn SessionStore>,
        conn_registry: ConnRegistry,
        instance_id: Arc<str>,
        config: OutboundConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        OutboundWorker {
            repo,
            session_store,
            conn_registry,
            instance_id,
            config,
            metrics,
        }
    }

    /// Persists a command for delivery; returns its id. Rejects low-priority
    /// (below `priority::SAFETY`) enqueues once the active-row count exceeds
    /// the configured high watermark, rather than letting the queue grow
    /// without bound under sustained back-pressure.
    pub async fn enqueue(
        &self,
        _phy_id: &str,
        device_id: Uuid,
        command_code: u16,
        payload: &[u8],
        priority: i32,
    ) -> Result<i64, OutboundError> {
        let mut ctx = self.repo.ctx();
        if priority < priority::SAFETY {
            let active = outbound::count_active(&mut ctx).await?;
            if active > self.config.high_watermark {
                self.metrics.outbound_rejected_overloaded.fetch_add(1, Ordering::Relaxed);
                return Err(OutboundError::Overloaded);
            }
        }
        let id = outbound::enqueue_outbound(&mut ctx, device_id, i32::from(command_code), 0, payload, priority, self.config.max_tries).await?;
        outbound::set_sequence(&mut ctx, id, id).await?;
        self.metrics.outbound_enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    pub async fn ack(&self, phy_id: &str, sequence: i64) -> Result<(), OutboundError> {
        let mut ctx = self.repo.ctx();
        if let Some(device) = gw_repo::devices::find_by_phy_id(&mut ctx, phy_id).await? {
            let affected = outbound::ack(&mut ctx, device.id, sequence).await?;
            if affected > 0 {
                self.metrics.outbound_acked.fetch_add(1, Ordering::Relaxed);
                self.metrics.outbound_in_flight.fetch_sub(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Run once at startup, before the periodic scan. Messages left in
    /// `sent` with a past `not_before` were being delivered by an instance
    /// that died before the ACK arrived; re-arm them for immediate retry
    /// without counting it against `tries`, since the device may never have
    /// seen them.
    pub async fn cold_start_scan(&self) -> Result<usize, OutboundError> {
        let mut ctx = self.repo.ctx();
        let now = Utc::now();
        let stuck = outbound::list_stuck_since(&mut ctx, now).await?;
        for msg in &stuck {
            outbound::mark_offline_retry(&mut ctx, msg.id, now).await?;
        }
        info!(count = stuck.len(), "cold-start scan re-armed stuck outbound messages");
        Ok(stuck.len())
    }

    /// One pass of the periodic scan: dequeue due messages and attempt
    /// delivery. Intended to be called in a loop on `scan_interval` by
    /// bootstrap.
    pub async fn scan_once(&self) -> Result<(), OutboundError> {
        let mut ctx = self.repo.ctx();
        let now = Utc::now();
        let due = outbound::dequeue_due(&mut ctx, self.config.batch_size, now).await?;

        for msg in due {
            self.attempt_delivery(msg, now).await;
        }
        Ok(())
    }

    async fn attempt_delivery(&self, msg: gw_repo::models::OutboundMessage, now: DateTime<Utc>) {
        let mut ctx = self.repo.ctx();

        if msg.tries >= msg.max_tries {
            if let Err(err) = outbound::mark_dead(&mut ctx, msg.id, "max_retries_exceeded").await {
                warn!(outbound_id = msg.id, error = %err, "mark_dead failed");
            } else {
                self.metrics.outbound_dead.fetch_add(1, Ordering::Relaxed);
                self.metrics.outbound_in_flight.fetch_sub(1, Ordering::Relaxed);
            }
            return;
        }

        let phy_id = match devices::find_by_id(&mut ctx, msg.device_id).await {
            Ok(Some(device)) => device.phy_id,
            Ok(None) => {
                warn!(outbound_id = msg.id, "device for outbound message no longer exists, dropping");
                return;
            }
            Err(err) => {
                warn!(outbound_id = msg.id, error = %err, "find_by_id failed");
                return;
            }
        };

        let online = self.session_store.is_online(&phy_id, now).await.unwrap_or(false);
        if !online {
            let backoff = backoff_for(msg.tries, self.config.retry_backoff_base, self.config.retry_backoff_cap);
            let _ = outbound::mark_offline_retry(&mut ctx, msg.id, now + backoff).await;
            return;
        }

        let write_tx = match self.conn_registry.get(&phy_id).await {
            Some(tx) => tx,
            None => {
                // Another instance owns the live socket; it will pick this up
                // on its own periodic scan once the session store reflects reality.
                warn!(%phy_id, instance = %self.instance_id, "device online elsewhere, skipping delivery this instance");
                return;
            }
        };

        let frame = Frame {
            variant: Variant::Standard,
            direction: Direction::Downlink,
            command: msg.command_code as u16,
            sequence: msg.sequence as u32,
            gateway_id: GatewayId(hex_decode(&phy_id)),
            payload: msg.payload.clone(),
        };

        match gw_protocol::encode(&frame) {
            Ok(bytes) => {
                if write_tx.send(bytes).await.is_err() {
                    let _ = outbound::record_error(&mut ctx, msg.id, "write channel closed").await;
                    return;
                }
                let backoff = backoff_for(msg.tries, self.config.retry_backoff_base, self.config.retry_backoff_cap);
                if let Err(err) = outbound::mark_sent(&mut ctx, msg.id, now + backoff).await {
                    warn!(outbound_id = msg.id, error = %err, "mark_sent failed");
                    return;
                }
                self.metrics.outbound_sent.fetch_add(1, Ordering::Relaxed);
                if msg.tries == 0 {
                    self.metrics.outbound_in_flight.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(err) => {
                let _ = outbound::record_error(&mut ctx, msg.id, &err.to_string()).await;
            }
        }
    }
}

fn hex_decode(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .filter_map(|i| s.get(i..i + 2).and_then(|b| u8::from_str_radix(b, 16).ok()))
        .collect()
}
