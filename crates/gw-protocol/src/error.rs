use thiserror::Error;

/// Everything that can go wrong turning bytes into a [`crate::Frame`] or
/// back, or parsing a TLV payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("frame truncated: need at least {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("unrecognized header magic {0:02x?}")]
    BadHeader([u8; 2]),

    #[error("bad tail magic: expected {expected:02x?}, got {actual:02x?}")]
    BadTail { expected: [u8; 2], actual: [u8; 2] },

    #[error("checksum mismatch: expected {expected:#04x}, computed {actual:#04x}")]
    Checksum { expected: u8, actual: u8 },

    #[error("length field mismatch: declared {declared}, frame had {actual} bytes")]
    Length { declared: u16, actual: usize },

    #[error("direction byte {field:#04x} does not match header magic direction {magic:?}")]
    DirectionMismatch { magic: crate::Direction, field: u8 },

    #[error("gateway id length mismatch: expected {expected}, got {actual}")]
    GatewayIdLen { expected: usize, actual: usize },

    #[error("sequence number {0} does not fit this frame variant's sequence width")]
    SequenceOverflow(u32),

    #[error("TLV entry truncated at offset {offset}")]
    TlvTruncated { offset: usize },

    #[error("TLV entry at offset {offset} declares length {declared} but only {remaining} bytes remain")]
    TlvLength {
        offset: usize,
        declared: usize,
        remaining: usize,
    },
}
