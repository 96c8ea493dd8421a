use std::sync::Arc;

use chrono::Utc;
use gw_protocol::{command, Direction, Frame, GatewayId, TlvList};
use gw_repo::models::{priority, OrderStatus};
use gw_repo::{devices, orders, ports, Repository};
use gw_session::SessionStore;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::dedup::{DedupCache, DedupKey};
use crate::outbound_worker::OutboundWorker;

const ICCID_LEN: usize = 18;
const FIRMWARE_LEN: usize = 7;

/// Per-socket attribute cluster, one entry per physical jack in a status
/// report's TLV payload.
const TAG_PORT: u8 = 0x01;
const TAG_SOCKET_NO: u8 = 0x01;
const TAG_STATUS_BITS: u8 = 0x02;
const TAG_POWER: u8 = 0x03;
const TAG_VOLTAGE: u8 = 0x04;
const TAG_CURRENT: u8 = 0x05;
const TAG_ENERGY: u8 = 0x06;
const TAG_DURATION: u8 = 0x07;

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn ack_frame(request: &Frame, payload: Vec<u8>) -> Frame {
    Frame {
        variant: request.variant,
        direction: Direction::Downlink,
        command: request.command,
        sequence: request.sequence,
        gateway_id: GatewayId(request.gateway_id.0.clone()),
        payload,
    }
}

/// Implements the representative handlers from §4.6: heartbeat, status
/// report, charge-control ack, and settle. Every entry point goes through
/// [`BusinessHandlers::handle`], which enforces the
/// `(phy_id, command_code, sequence)` duplicate-suppression invariant before
/// any of these run.
pub struct BusinessHandlers {
    repo: Repository,
    session_store: Arc<dyn SessionStore>,
    outbound: Arc<OutboundWorker>,
    dedup: DedupCache,
}

impl BusinessHandlers {
    pub fn new(repo: Repository, session_store: Arc<dyn SessionStore>, outbound: Arc<OutboundWorker>) -> Self {
        BusinessHandlers {
            repo,
            session_store,
            outbound,
            dedup: DedupCache::default_with_ttl_minutes(10),
        }
    }

    pub async fn handle(&self, frame: &Frame, phy_id: &str, reply_tx: &mpsc::Sender<Vec<u8>>) {
        let now = Utc::now();
        let key = DedupKey {
            phy_id: phy_id.to_string(),
            command_code: frame.command,
            sequence: frame.sequence,
        };

        if let Some(cached_ack) = self.dedup.lookup(&key, now) {
            if !cached_ack.is_empty() {
                let _ = reply_tx.send(cached_ack).await;
            }
            return;
        }

        let ack = match frame.command {
            command::CMD_HEARTBEAT => self.handle_heartbeat(frame, phy_id, now).await,
            command::CMD_STATUS_REPORT => self.handle_status_report(frame, phy_id, now).await,
            command::CMD_CHARGE_CONTROL => self.handle_charge_control_ack(frame, phy_id, now).await,
            command::CMD_SETTLE => self.handle_settle(frame, phy_id, now).await,
            other => {
                info!(%phy_id, command = other, "unknown command code, silently acking");
                Some(ack_frame(frame, Vec::new()))
            }
        };

        let ack_bytes = ack.and_then(|f| match gw_protocol::encode(&f) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!(%phy_id, error = %err, "failed to encode ack frame");
                None
            }
        });

        self.dedup.store(key, now, ack_bytes.clone().unwrap_or_default());
        if let Some(bytes) = ack_bytes {
            let _ = reply_tx.send(bytes).await;
        }
    }

    async fn handle_heartbeat(&self, frame: &Frame, phy_id: &str, now: chrono::DateTime<Utc>) -> Option<Frame> {
        let payload = &frame.payload;
        if payload.len() < ICCID_LEN + FIRMWARE_LEN + 1 {
            warn!(%phy_id, "heartbeat payload too short");
            return Some(ack_frame(frame, Vec::new()));
        }
        let iccid = hex_encode(&payload[..ICCID_LEN]);
        let firmware = String::from_utf8_lossy(&payload[ICCID_LEN..ICCID_LEN + FIRMWARE_LEN]).to_string();
        let rssi = payload[ICCID_LEN + FIRMWARE_LEN] as i16;

        let mut ctx = self.repo.ctx();
        let device_id = match devices::ensure_device(&mut ctx, phy_id, "standard", now).await {
            Ok(id) => id,
            Err(err) => {
                warn!(%phy_id, error = %err, "ensure_device failed");
                return Some(ack_frame(frame, Vec::new()));
            }
        };
        if let Err(err) = devices::touch_device_last_seen(&mut ctx, phy_id, now).await {
            warn!(%phy_id, error = %err, "touch_device_last_seen failed");
        }
        if let Err(err) = devices::update_heartbeat_fields(&mut ctx, phy_id, &firmware, rssi, &iccid).await {
            warn!(%phy_id, error = %err, "update_heartbeat_fields failed");
        }
        if let Err(err) = self.session_store.touch_heartbeat(phy_id, now).await {
            warn!(%phy_id, error = %err, "touch_heartbeat failed");
        }

        let time_sync_payload = now.format("%Y%m%d%H%M%S").to_string().into_bytes();
        if let Err(err) = self
            .outbound
            .enqueue(phy_id, device_id, command::CMD_TIME_SYNC, &time_sync_payload, priority::SAFETY)
            .await
        {
            warn!(%phy_id, error = %err, "failed to enqueue time-sync downlink");
        }

        Some(ack_frame(frame, Vec::new()))
    }

    async fn handle_status_report(&self, frame: &Frame, phy_id: &str, now: chrono::DateTime<Utc>) -> Option<Frame> {
        let list = match TlvList::decode(&frame.payload) {
            Ok(l) => l,
            Err(err) => {
                warn!(%phy_id, error = %err, "malformed status report TLV");
                return Some(ack_frame(frame, Vec::new()));
            }
        };

        let mut ctx = self.repo.ctx();
        let device_id = match devices::ensure_device(&mut ctx, phy_id, "standard", now).await {
            Ok(id) => id,
            Err(err) => {
                warn!(%phy_id, error = %err, "ensure_device failed during status report");
                return Some(ack_frame(frame, Vec::new()));
            }
        };

        for port_bytes in list.get_all(TAG_PORT) {
            let port_tlv = match TlvList::decode(port_bytes) {
                Ok(t) => t,
                Err(err) => {
                    warn!(%phy_id, error = %err, "malformed per-port TLV, skipping");
                    continue;
                }
            };
            let port_no = port_tlv.get_u8(TAG_SOCKET_NO) as i16;
            let status_bits = port_tlv.get_u8(TAG_STATUS_BITS) as i16;
            let power = i32::from(port_tlv.get_u16_be(TAG_POWER));
            let voltage = i32::from(port_tlv.get_u16_be(TAG_VOLTAGE));
            let current = i32::from(port_tlv.get_u16_be(TAG_CURRENT));
            let energy = i64::from(port_tlv.get_u32_be(TAG_ENERGY));
            let duration = i64::from(port_tlv.get_u32_be(TAG_DURATION));

            if let Err(err) = ports::upsert_port_snapshot(
                &mut ctx, device_id, port_no, status_bits, power, voltage, current, energy, duration, now,
            )
            .await
            {
                warn!(%phy_id, port_no, error = %err, "upsert_port_snapshot failed");
            }
        }

        Some(ack_frame(frame, Vec::new()))
    }

    /// Layout `[0x07][result][socket][jack][business_no_u16_be]` — the
    /// leading byte echoes the sub-command tag (redundant with the frame's
    /// own command code) and is skipped rather than parsed.
    async fn handle_charge_control_ack(&self, frame: &Frame, phy_id: &str, now: chrono::DateTime<Utc>) -> Option<Frame> {
        let payload = &frame.payload;
        if payload.len() < 6 {
            warn!(%phy_id, "charge-control ack payload too short");
            return None;
        }
        let result = payload[1];
        let socket = payload[2] as i16;
        let _jack = payload[3];
        let business_no = u16::from_be_bytes([payload[4], payload[5]]) as i32;

        let mut ctx = self.repo.ctx();
        let device_id = match devices::ensure_device(&mut ctx, phy_id, "standard", now).await {
            Ok(id) => id,
            Err(err) => {
                warn!(%phy_id, error = %err, "ensure_device failed during charge-control ack");
                return None;
            }
        };

        let status = if result == 0x01 { OrderStatus::Charging } else { OrderStatus::Failed };
        if let Some(order) = orders::find_non_terminal_order(&mut ctx, device_id, socket).await.ok().flatten() {
            if let Err(err) = orders::set_order_status(&mut ctx, &order.order_no, status, Some(business_no)).await {
                warn!(%phy_id, error = %err, "failed to transition order after charge-control ack");
            }
        } else {
            warn!(%phy_id, socket, business_no, "charge-control ack with no pending order");
        }

        // This frame is itself the ACK to a downlink we sent; no reply needed.
        None
    }

    async fn handle_settle(&self, frame: &Frame, phy_id: &str, now: chrono::DateTime<Utc>) -> Option<Frame> {
        let payload = &frame.payload;
        if payload.len() < 1 + 2 + 4 + 4 + 1 {
            warn!(%phy_id, "settle payload too short");
            return Some(ack_frame(frame, Vec::new()));
        }
        let socket = payload[0] as i16;
        let business_no = u16::from_be_bytes([payload[1], payload[2]]) as i32;
        let duration_sec = i64::from(u32::from_be_bytes([payload[3], payload[4], payload[5], payload[6]]));
        let energy = i64::from(u32::from_be_bytes([payload[7], payload[8], payload[9], payload[10]]));
        let end_reason = match payload.get(11) {
            Some(0x00) => "normal_stop",
            Some(0x01) => "power_fault",
            Some(0x02) => "user_stop",
            _ => "unknown",
        };

        let mut ctx = self.repo.ctx();
        let device_id = match devices::ensure_device(&mut ctx, phy_id, "standard", now).await {
            Ok(id) => id,
            Err(err) => {
                warn!(%phy_id, error = %err, "ensure_device failed during settle");
                return Some(ack_frame(frame, Vec::new()));
            }
        };
        let order_no_fallback = format!("{phy_id}:{socket}:{business_no}");
        if let Err(err) = orders::settle_order(
            &mut ctx, device_id, socket, Some(business_no), &order_no_fallback, duration_sec, energy, end_reason,
        )
        .await
        {
            warn!(%phy_id, error = %err, "settle_order failed");
        }

        Some(ack_frame(frame, Vec::new()))
    }
}
