use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Documented priority bands for `OutboundMessage.priority`; it stays a
/// plain `i32` rather than an enum so future tiers slot in without a schema
/// change, but callers should pick from here instead of inventing numbers.
pub mod priority {
    pub const SYSTEM: i32 = 1000;
    pub const SAFETY: i32 = 500;
    pub const USER: i32 = 100;
    pub const BACKGROUND: i32 = 0;
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Device {
    pub id: Uuid,
    pub phy_id: String,
    pub protocol_kind: String,
    pub last_seen_at: DateTime<Utc>,
    pub firmware_version: Option<String>,
    pub rssi: Option<i16>,
    pub iccid: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Port {
    pub device_id: Uuid,
    pub port_no: i16,
    pub status_bits: i16,
    pub power_centiwatt: i32,
    pub voltage_decivolt: i32,
    pub current_centiamp: i32,
    pub energy_0p01kwh: i64,
    pub duration_sec: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Charging,
    Completed,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Charging => "charging",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Failed | OrderStatus::Cancelled)
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = RepoModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "charging" => Ok(OrderStatus::Charging),
            "completed" => Ok(OrderStatus::Completed),
            "failed" => Ok(OrderStatus::Failed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(RepoModelError::UnknownOrderStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Order {
    pub id: Uuid,
    pub order_no: String,
    pub device_id: Uuid,
    pub port_no: i16,
    pub business_no: Option<i32>,
    pub status: OrderStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub energy_0p01kwh: i64,
    pub end_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundStatus {
    Pending,
    Sent,
    Acked,
    Dead,
}

impl OutboundStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutboundStatus::Pending => "pending",
            OutboundStatus::Sent => "sent",
            OutboundStatus::Acked => "acked",
            OutboundStatus::Dead => "dead",
        }
    }
}

impl std::str::FromStr for OutboundStatus {
    type Err = RepoModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboundStatus::Pending),
            "sent" => Ok(OutboundStatus::Sent),
            "acked" => Ok(OutboundStatus::Acked),
            "dead" => Ok(OutboundStatus::Dead),
            other => Err(RepoModelError::UnknownOutboundStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub id: i64,
    pub device_id: Uuid,
    pub command_code: i32,
    pub sequence: i64,
    pub payload: Vec<u8>,
    pub priority: i32,
    pub status: OutboundStatus,
    pub tries: i32,
    pub max_tries: i32,
    pub not_before: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CmdLog {
    pub id: i64,
    pub device_id: Option<Uuid>,
    pub direction: String,
    pub command_code: i32,
    pub sequence: i64,
    pub payload_hex: String,
    pub parsed_ok: bool,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum RepoModelError {
    #[error("unknown order status: {0}")]
    UnknownOrderStatus(String),
    #[error("unknown outbound status: {0}")]
    UnknownOutboundStatus(String),
}
