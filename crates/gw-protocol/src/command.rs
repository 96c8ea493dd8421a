//! Known command codes. This list is the union of what the S1–S6 examples
//! exercise; an unrecognized code is not an error (see `ProtoRouter` in
//! `gw-core`) so this enum is intentionally not exhaustive over `u16`.

/// Heartbeat, confirmed by the S1 test vector.
pub const CMD_HEARTBEAT: u16 = 0x0000;
/// Gateway clock sync, request/ack pair.
pub const CMD_TIME_SYNC: u16 = 0x0001;
/// Periodic port/socket status report.
pub const CMD_STATUS_REPORT: u16 = 0x0002;
/// Start/stop a charge session on a socket; payload leads with
/// `[socket][jack]` per the S6 convention.
pub const CMD_CHARGE_CONTROL: u16 = 0x0007;
/// Final settlement of a charge session (energy, duration, amount due).
pub const CMD_SETTLE: u16 = 0x0008;
