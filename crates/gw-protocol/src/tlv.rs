use crate::error::CodecError;

/// One decoded `tag, length, value` entry. `value` is owned so a `TlvList`
/// can outlive the buffer it was parsed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvEntry {
    pub tag: u8,
    pub value: Vec<u8>,
}

/// An ordered list of TLV entries. Payload bodies that pack several typed
/// fields (status reports, charge-control acks) use this sub-codec; a tag
/// whose value is itself a TLV stream (a "container" tag) is handled by
/// calling [`TlvList::decode`] again on that entry's `value`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlvList(pub Vec<TlvEntry>);

impl TlvList {
    pub fn new() -> Self {
        TlvList(Vec::new())
    }

    /// Parse a buffer into TLV entries. Stops cleanly when no bytes remain;
    /// rejects a truncated tag/length header and a declared length that
    /// overruns what's left, rather than silently dropping bytes either way.
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut entries = Vec::new();
        let mut offset = 0;
        while offset < buf.len() {
            if buf.len() - offset < 2 {
                return Err(CodecError::TlvTruncated { offset });
            }
            let tag = buf[offset];
            let len = buf[offset + 1] as usize;
            let remaining = buf.len() - offset - 2;
            if len > remaining {
                return Err(CodecError::TlvLength {
                    offset,
                    declared: len,
                    remaining,
                });
            }
            let value = buf[offset + 2..offset + 2 + len].to_vec();
            entries.push(TlvEntry { tag, value });
            offset += 2 + len;
        }
        Ok(TlvList(entries))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in &self.0 {
            out.push(entry.tag);
            out.push(entry.value.len() as u8);
            out.extend_from_slice(&entry.value);
        }
        out
    }

    pub fn push(&mut self, tag: u8, value: Vec<u8>) {
        self.0.push(TlvEntry { tag, value });
    }

    /// First entry matching `tag`, if any. Entries are not deduplicated on
    /// decode; a repeated tag keeps the first occurrence here.
    pub fn get(&self, tag: u8) -> Option<&[u8]> {
        self.0.iter().find(|e| e.tag == tag).map(|e| e.value.as_slice())
    }

    /// All entries matching `tag`, in encounter order. Used for payloads
    /// that repeat the same container tag once per sub-item (e.g. one
    /// entry per socket in a multi-port status report), where [`get`]'s
    /// first-match semantics would silently drop the rest.
    pub fn get_all(&self, tag: u8) -> Vec<&[u8]> {
        self.0.iter().filter(|e| e.tag == tag).map(|e| e.value.as_slice()).collect()
    }

    /// Parse the value of `tag` as a nested TLV list (a "container" tag).
    /// Returns `None` if the tag is absent; a malformed nested value is
    /// surfaced as `Some(Err(_))`.
    pub fn get_nested(&self, tag: u8) -> Option<Result<TlvList, CodecError>> {
        self.get(tag).map(TlvList::decode)
    }

    /// `0` if the tag is absent or its value is empty.
    pub fn get_u8(&self, tag: u8) -> u8 {
        self.get(tag).and_then(|v| v.first()).copied().unwrap_or(0)
    }

    /// `0` if the tag is absent or its value has fewer than 2 bytes.
    pub fn get_u16_be(&self, tag: u8) -> u16 {
        match self.get(tag) {
            Some(v) if v.len() >= 2 => u16::from_be_bytes([v[0], v[1]]),
            _ => 0,
        }
    }

    /// `0` if the tag is absent or its value has fewer than 4 bytes.
    pub fn get_u32_be(&self, tag: u8) -> u32 {
        match self.get(tag) {
            Some(v) if v.len() >= 4 => u32::from_be_bytes([v[0], v[1], v[2], v[3]]),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s3_vector() -> Vec<u8> {
        hex::decode("4a01013e02ffff070125").unwrap()
    }

    #[test]
    fn decodes_s3_vector() {
        let list = TlvList::decode(&s3_vector()).unwrap();
        assert_eq!(list.0.len(), 3);
        assert_eq!(list.get(0x4A), Some(&[0x01][..]));
        assert_eq!(list.get(0x3E), Some(&[0xFF, 0xFF][..]));
        assert_eq!(list.get(0x07), Some(&[0x25][..]));
        assert_eq!(list.get_u16_be(0x3E), 0xFFFF);
    }

    #[test]
    fn encode_round_trips_s3_vector() {
        let list = TlvList::decode(&s3_vector()).unwrap();
        assert_eq!(list.encode(), s3_vector());
    }

    #[test]
    fn absent_tag_getters_return_zero() {
        let list = TlvList::new();
        assert_eq!(list.get_u8(0x01), 0);
        assert_eq!(list.get_u16_be(0x01), 0);
        assert_eq!(list.get_u32_be(0x01), 0);
        assert_eq!(list.get(0x01), None);
    }

    #[test]
    fn too_short_value_getters_return_zero() {
        let mut list = TlvList::new();
        list.push(0x01, vec![0xFF]);
        assert_eq!(list.get_u16_be(0x01), 0);
        assert_eq!(list.get_u32_be(0x01), 0);
    }

    #[test]
    fn empty_buffer_decodes_to_empty_list() {
        assert_eq!(TlvList::decode(&[]).unwrap(), TlvList::new());
    }

    #[test]
    fn truncated_header_is_rejected() {
        assert_eq!(
            TlvList::decode(&[0x01]).unwrap_err(),
            CodecError::TlvTruncated { offset: 0 }
        );
    }

    #[test]
    fn declared_length_exceeding_remainder_is_rejected() {
        let buf = [0x01, 0x05, 0xAA, 0xBB];
        assert_eq!(
            TlvList::decode(&buf).unwrap_err(),
            CodecError::TlvLength {
                offset: 0,
                declared: 5,
                remaining: 2,
            }
        );
    }

    #[test]
    fn nested_container_tag_parses() {
        let inner = {
            let mut l = TlvList::new();
            l.push(0x01, vec![0x42]);
            l
        };
        let mut outer = TlvList::new();
        outer.push(0x10, inner.encode());
        let nested = outer.get_nested(0x10).unwrap().unwrap();
        assert_eq!(nested.get_u8(0x01), 0x42);
    }

    #[test]
    fn missing_nested_tag_returns_none() {
        let outer = TlvList::new();
        assert!(outer.get_nested(0x10).is_none());
    }

    #[test]
    fn get_all_returns_every_matching_entry_in_order() {
        let mut list = TlvList::new();
        list.push(0x01, vec![1]);
        list.push(0x02, vec![9]);
        list.push(0x01, vec![2]);
        assert_eq!(list.get_all(0x01), vec![&[1u8][..], &[2u8][..]]);
        assert_eq!(list.get(0x01), Some(&[1u8][..]));
    }
}
