use crate::error::CodecError;

/// Which way a frame is travelling. Carried both in the header magic and as
/// an explicit field inside the frame body; [`decode`] checks the two agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Downlink,
    Uplink,
}

impl Direction {
    fn from_field(byte: u8) -> Self {
        if byte & 0x01 == 0 {
            Direction::Downlink
        } else {
            Direction::Uplink
        }
    }

    fn to_field(self) -> u8 {
        match self {
            Direction::Downlink => 0x00,
            Direction::Uplink => 0x01,
        }
    }
}

/// The closed set of frame shapes this gateway understands. Each variant has
/// its own magic bytes, tail bytes, sequence width and gateway-id width, but
/// the same length/checksum *formula*. Dispatch is a `match`, never a trait
/// object — a new on-wire shape is a new variant added here, not a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    /// The primary pile protocol: 4-byte sequence, 7-byte gateway id.
    Standard,
    /// A leaner variant used by older field hardware: 2-byte sequence,
    /// 6-byte gateway id.
    Compact,
}

const MAGIC_STANDARD_DOWNLINK: [u8; 2] = [0xFC, 0xFF];
const MAGIC_STANDARD_UPLINK: [u8; 2] = [0xFC, 0xFE];
const TAIL_STANDARD: [u8; 2] = [0xFC, 0xEE];
const GATEWAY_ID_LEN_STANDARD: usize = 7;

const MAGIC_COMPACT_DOWNLINK: [u8; 2] = [0x68, 0x67];
const MAGIC_COMPACT_UPLINK: [u8; 2] = [0x68, 0x65];
const TAIL_COMPACT: [u8; 2] = [0x16, 0x0D];
const GATEWAY_ID_LEN_COMPACT: usize = 6;

/// Header (magic + length field) is 4 bytes for every variant.
pub const HEADER_LEN: usize = 4;

/// `magic(2) + length(2) + command(2) + sequence(4) + direction(1) +
/// gateway_id(7) + checksum(1) + tail(2)`, zero-length payload.
pub const MIN_FRAME_LEN_STANDARD: usize = 21;
/// `magic(2) + length(2) + command(2) + sequence(2) + direction(1) +
/// gateway_id(6) + checksum(1) + tail(2)`, zero-length payload.
pub const MIN_FRAME_LEN_COMPACT: usize = 18;

/// Largest frame this gateway will decode or produce, header through tail.
pub const MAX_FRAME_LEN: usize = 4096;

impl Variant {
    fn magic(self, direction: Direction) -> [u8; 2] {
        match (self, direction) {
            (Variant::Standard, Direction::Downlink) => MAGIC_STANDARD_DOWNLINK,
            (Variant::Standard, Direction::Uplink) => MAGIC_STANDARD_UPLINK,
            (Variant::Compact, Direction::Downlink) => MAGIC_COMPACT_DOWNLINK,
            (Variant::Compact, Direction::Uplink) => MAGIC_COMPACT_UPLINK,
        }
    }

    fn tail(self) -> [u8; 2] {
        match self {
            Variant::Standard => TAIL_STANDARD,
            Variant::Compact => TAIL_COMPACT,
        }
    }

    fn gateway_id_len(self) -> usize {
        match self {
            Variant::Standard => GATEWAY_ID_LEN_STANDARD,
            Variant::Compact => GATEWAY_ID_LEN_COMPACT,
        }
    }

    fn sequence_width(self) -> usize {
        match self {
            Variant::Standard => 4,
            Variant::Compact => 2,
        }
    }
}

/// Device identifier, carried on the wire as 6 or 7 raw bytes depending on
/// [`Variant`]. Kept as owned bytes rather than a fixed-size array so both
/// widths share one type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GatewayId(pub Vec<u8>);

impl GatewayId {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lowercase hex, the form used for the `phy_id` routing key.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// A fully decoded frame. `variant` and `direction` round-trip through
/// [`encode`] so a reply can reuse the same shape as the request it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub variant: Variant,
    pub direction: Direction,
    pub command: u16,
    pub sequence: u32,
    pub gateway_id: GatewayId,
    pub payload: Vec<u8>,
}

/// Look at the first two bytes of a stream and report which variant and
/// direction they declare, without consuming or validating anything else.
/// Used by the connection handler to decide how many more bytes to read.
pub fn peek_variant_and_direction(first_two: [u8; 2]) -> Option<(Variant, Direction)> {
    match first_two {
        MAGIC_STANDARD_DOWNLINK => Some((Variant::Standard, Direction::Downlink)),
        MAGIC_STANDARD_UPLINK => Some((Variant::Standard, Direction::Uplink)),
        MAGIC_COMPACT_DOWNLINK => Some((Variant::Compact, Direction::Downlink)),
        MAGIC_COMPACT_UPLINK => Some((Variant::Compact, Direction::Uplink)),
        _ => None,
    }
}

/// Bytes in the 2-byte length field that are *not* real payload: the tail
/// magic is counted in the declared length but trails the checksum, so the
/// declared value is always `17 + payload_len` (standard) or `14 +
/// payload_len` (compact) rather than matching the field names literally.
fn length_overhead(variant: Variant) -> u16 {
    // command(2) + sequence + direction(1) + gateway_id + checksum(1) + tail(2)
    (2 + variant.sequence_width() + 1 + variant.gateway_id_len() + 1 + 2) as u16
}

/// Read the 2-byte big-endian length field and return how many more bytes
/// the caller needs to read off the stream (that count equals the field's
/// value exactly, by construction — see [`length_overhead`]).
pub fn header_len() -> usize {
    HEADER_LEN
}

/// Given a variant and a declared length-field value, return the total
/// number of bytes the frame occupies on the wire (header included).
pub fn frame_total_len(declared: u16) -> usize {
    HEADER_LEN + declared as usize
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Decode exactly one frame from `buf`. `buf` must contain precisely one
/// frame's worth of bytes — magic through tail, no more, no less; the caller
/// (the connection handler's stream reader) is responsible for slicing the
/// stream using the length field before calling this.
pub fn decode(buf: &[u8]) -> Result<Frame, CodecError> {
    if buf.len() < HEADER_LEN {
        return Err(CodecError::Truncated {
            needed: HEADER_LEN,
            available: buf.len(),
        });
    }
    let magic = [buf[0], buf[1]];
    let (variant, magic_direction) = peek_variant_and_direction(magic)
        .ok_or(CodecError::BadHeader(magic))?;

    let declared_len = u16::from_be_bytes([buf[2], buf[3]]);
    let total_len = frame_total_len(declared_len);
    if total_len > MAX_FRAME_LEN {
        return Err(CodecError::Length {
            declared: declared_len,
            actual: buf.len(),
        });
    }
    if buf.len() != total_len {
        return Err(CodecError::Length {
            declared: declared_len,
            actual: buf.len(),
        });
    }
    let min_overhead = length_overhead(variant);
    if declared_len < min_overhead {
        return Err(CodecError::Length {
            declared: declared_len,
            actual: buf.len(),
        });
    }

    let mut cursor = HEADER_LEN;
    let command = u16::from_be_bytes([buf[cursor], buf[cursor + 1]]);
    cursor += 2;

    let seq_width = variant.sequence_width();
    let sequence = match seq_width {
        2 => u16::from_be_bytes([buf[cursor], buf[cursor + 1]]) as u32,
        4 => u32::from_be_bytes([buf[cursor], buf[cursor + 1], buf[cursor + 2], buf[cursor + 3]]),
        _ => unreachable!("variant sequence widths are 2 or 4"),
    };
    cursor += seq_width;

    let direction_field = buf[cursor];
    let direction = Direction::from_field(direction_field);
    if direction != magic_direction {
        return Err(CodecError::DirectionMismatch {
            magic: magic_direction,
            field: direction_field,
        });
    }
    cursor += 1;

    let gw_len = variant.gateway_id_len();
    let gateway_id = GatewayId(buf[cursor..cursor + gw_len].to_vec());
    cursor += gw_len;

    let payload_len = total_len - cursor - 1 /* checksum */ - 2 /* tail */;
    let payload = buf[cursor..cursor + payload_len].to_vec();
    cursor += payload_len;

    let expected_checksum = checksum(&buf[2..cursor]);
    let actual_checksum = buf[cursor];
    if expected_checksum != actual_checksum {
        return Err(CodecError::Checksum {
            expected: expected_checksum,
            actual: actual_checksum,
        });
    }
    cursor += 1;

    let tail = [buf[cursor], buf[cursor + 1]];
    let expected_tail = variant.tail();
    if tail != expected_tail {
        return Err(CodecError::BadTail {
            expected: expected_tail,
            actual: tail,
        });
    }

    Ok(Frame {
        variant,
        direction,
        command,
        sequence,
        gateway_id,
        payload,
    })
}

/// Encode a frame back to wire bytes, recomputing the length field and
/// checksum. Returns an error if the frame's fields don't fit the variant
/// it claims (sequence too wide, gateway id the wrong length).
pub fn encode(frame: &Frame) -> Result<Vec<u8>, CodecError> {
    let variant = frame.variant;
    let gw_len = variant.gateway_id_len();
    if frame.gateway_id.0.len() != gw_len {
        return Err(CodecError::GatewayIdLen {
            expected: gw_len,
            actual: frame.gateway_id.0.len(),
        });
    }
    let seq_width = variant.sequence_width();
    if seq_width == 2 && frame.sequence > u32::from(u16::MAX) {
        return Err(CodecError::SequenceOverflow(frame.sequence));
    }

    let declared_len = length_overhead(variant) + frame.payload.len() as u16;
    let total_len = frame_total_len(declared_len);
    if total_len > MAX_FRAME_LEN {
        return Err(CodecError::Length {
            declared: declared_len,
            actual: total_len,
        });
    }

    let mut out = Vec::with_capacity(total_len);
    out.extend_from_slice(&variant.magic(frame.direction));
    out.extend_from_slice(&declared_len.to_be_bytes());
    out.extend_from_slice(&frame.command.to_be_bytes());
    match seq_width {
        2 => out.extend_from_slice(&(frame.sequence as u16).to_be_bytes()),
        4 => out.extend_from_slice(&frame.sequence.to_be_bytes()),
        _ => unreachable!("variant sequence widths are 2 or 4"),
    }
    out.push(frame.direction.to_field());
    out.extend_from_slice(&frame.gateway_id.0);
    out.extend_from_slice(&frame.payload);
    let sum = checksum(&out[2..]);
    out.push(sum);
    out.extend_from_slice(&variant.tail());

    debug_assert_eq!(out.len(), total_len);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat_s1() -> Vec<u8> {
        hex::decode("fcff0018000000000000008220052000486920200730164545a7fcee").unwrap()
    }

    #[test]
    fn decodes_s1_heartbeat_vector() {
        let buf = heartbeat_s1();
        let frame = decode(&buf).expect("S1 vector must decode");
        assert_eq!(frame.variant, Variant::Standard);
        assert_eq!(frame.direction, Direction::Downlink);
        assert_eq!(frame.command, 0x0000);
        assert_eq!(frame.sequence, 0);
        assert_eq!(frame.gateway_id.as_bytes(), &[0x82, 0x20, 0x05, 0x20, 0x00, 0x48, 0x69]);
        assert_eq!(frame.payload.len(), 7);
    }

    #[test]
    fn round_trips_s1_heartbeat_vector() {
        let buf = heartbeat_s1();
        let frame = decode(&buf).unwrap();
        let re = encode(&frame).unwrap();
        assert_eq!(re, buf);
    }

    #[test]
    fn rejects_short_buffer() {
        let err = decode(&[0xFC]).unwrap_err();
        assert_eq!(
            err,
            CodecError::Truncated {
                needed: 4,
                available: 1
            }
        );
    }

    #[test]
    fn rejects_unknown_magic() {
        let buf = [0x00, 0x00, 0x00, 0x00];
        assert_eq!(decode(&buf).unwrap_err(), CodecError::BadHeader([0, 0]));
    }

    #[test]
    fn minimum_standard_frame_round_trips() {
        let frame = Frame {
            variant: Variant::Standard,
            direction: Direction::Downlink,
            command: 0x0000,
            sequence: 1,
            gateway_id: GatewayId(vec![1, 2, 3, 4, 5, 6, 7]),
            payload: vec![],
        };
        let buf = encode(&frame).unwrap();
        assert_eq!(buf.len(), MIN_FRAME_LEN_STANDARD);
        assert_eq!(decode(&buf).unwrap(), frame);
    }

    #[test]
    fn minimum_compact_frame_round_trips() {
        let frame = Frame {
            variant: Variant::Compact,
            direction: Direction::Uplink,
            command: 0x0001,
            sequence: 7,
            gateway_id: GatewayId(vec![9, 9, 9, 9, 9, 9]),
            payload: vec![],
        };
        let buf = encode(&frame).unwrap();
        assert_eq!(buf.len(), MIN_FRAME_LEN_COMPACT);
        assert_eq!(decode(&buf).unwrap(), frame);
    }

    #[test]
    fn maximum_size_frame_decodes() {
        let payload_len = MAX_FRAME_LEN - MIN_FRAME_LEN_STANDARD;
        let frame = Frame {
            variant: Variant::Standard,
            direction: Direction::Downlink,
            command: 0x0002,
            sequence: 42,
            gateway_id: GatewayId(vec![0xAA; 7]),
            payload: vec![0x5A; payload_len],
        };
        let buf = encode(&frame).unwrap();
        assert_eq!(buf.len(), MAX_FRAME_LEN);
        assert_eq!(decode(&buf).unwrap(), frame);
    }

    #[test]
    fn one_byte_over_max_is_rejected_at_encode() {
        let payload_len = MAX_FRAME_LEN - MIN_FRAME_LEN_STANDARD + 1;
        let frame = Frame {
            variant: Variant::Standard,
            direction: Direction::Downlink,
            command: 0x0002,
            sequence: 42,
            gateway_id: GatewayId(vec![0xAA; 7]),
            payload: vec![0x5A; payload_len],
        };
        assert!(matches!(encode(&frame), Err(CodecError::Length { .. })));
    }

    #[test]
    fn one_byte_over_max_is_rejected_at_decode() {
        let payload_len = MAX_FRAME_LEN - MIN_FRAME_LEN_STANDARD + 1;
        let frame = Frame {
            variant: Variant::Standard,
            direction: Direction::Downlink,
            command: 0x0002,
            sequence: 42,
            gateway_id: GatewayId(vec![0xAA; 7]),
            payload: vec![0x5A; payload_len],
        };
        // Bypass encode()'s own guard to exercise decode()'s length check directly.
        let declared_len = length_overhead(Variant::Standard) + payload_len as u16;
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC_STANDARD_DOWNLINK);
        buf.extend_from_slice(&declared_len.to_be_bytes());
        buf.extend_from_slice(&frame.command.to_be_bytes());
        buf.extend_from_slice(&frame.sequence.to_be_bytes());
        buf.push(0x00);
        buf.extend_from_slice(&frame.gateway_id.0);
        buf.extend_from_slice(&frame.payload);
        let sum = checksum(&buf[2..]);
        buf.push(sum);
        buf.extend_from_slice(&TAIL_STANDARD);
        assert_eq!(buf.len(), MAX_FRAME_LEN + 1);
        assert!(matches!(decode(&buf), Err(CodecError::Length { .. })));
    }

    #[test]
    fn checksum_off_by_one_is_rejected() {
        let mut buf = heartbeat_s1();
        let checksum_idx = buf.len() - 3;
        buf[checksum_idx] = buf[checksum_idx].wrapping_add(1);
        assert!(matches!(decode(&buf), Err(CodecError::Checksum { .. })));
    }

    #[test]
    fn bad_tail_is_rejected() {
        let mut buf = heartbeat_s1();
        let n = buf.len();
        buf[n - 1] = 0x00;
        assert!(matches!(decode(&buf), Err(CodecError::BadTail { .. })));
    }

    #[test]
    fn direction_mismatch_is_rejected() {
        let mut buf = heartbeat_s1();
        // direction field sits right after command+sequence: offset 4+2+4=10
        buf[10] = 0x01;
        assert!(matches!(
            decode(&buf),
            Err(CodecError::DirectionMismatch { .. })
        ));
    }
}
