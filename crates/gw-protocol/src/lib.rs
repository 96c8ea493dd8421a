//! Binary wire protocol for the charging-pile gateway.
//!
//! This crate is transport-free: it only ever turns `&[u8]` into owned
//! frame/TLV structs and back. Reading exactly one frame's worth of bytes
//! off a TCP stream is the caller's job (see `gw-core::conn`).

pub mod command;
mod error;
mod frame;
mod tlv;

pub use error::CodecError;
pub use frame::{
    decode, encode, frame_total_len, header_len, peek_variant_and_direction, Direction, Frame,
    GatewayId, Variant, MAX_FRAME_LEN, MIN_FRAME_LEN_COMPACT, MIN_FRAME_LEN_STANDARD,
};
pub use tlv::{TlvEntry, TlvList};
