//! Primitive writers for the proto3 wire format.
//!
//! Everything here appends to a `Vec<u8>` and never fails. The only function
//! that writes anywhere other than the end of the buffer is [`put_varint`],
//! which the encoder uses to fill in a reserved length prefix.

use core::fmt;

/// The low three bits of every field key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WireType {
    /// Base-128 varint
    Varint = 0,
    /// Little-endian 8 bytes
    Fixed64 = 1,
    /// Varint length followed by that many bytes
    Bytes = 2,
    /// Deprecated group start
    StartGroup = 3,
    /// Deprecated group end
    EndGroup = 4,
    /// Little-endian 4 bytes
    Fixed32 = 5,
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WireType::Varint => "varint",
            WireType::Fixed64 => "fixed64",
            WireType::Bytes => "bytes",
            WireType::StartGroup => "start-group",
            WireType::EndGroup => "end-group",
            WireType::Fixed32 => "fixed32",
        };
        f.write_str(name)
    }
}

/// Largest field number proto3 allows.
pub const MAX_TAG: u32 = (1 << 29) - 1;

/// The maximum number of bytes a `u64` varint can occupy.
pub const MAX_VARINT_LEN: usize = 10;

/// Appends `value` as a base-128 varint.
#[inline]
pub fn encode_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Number of bytes [`encode_varint`] writes for `value`.
#[inline]
pub const fn size_varint(value: u64) -> usize {
    // ((bits needed) * 9 + 64) / 64 is ceil(bits / 7) for 1..=64 bits
    let bits = 64 - (value | 1).leading_zeros() as usize;
    (bits * 9 + 64) / 64
}

/// Writes `value` as a varint into the front of `dst`, which must be exactly
/// `size_varint(value)` bytes long.
#[inline]
pub fn put_varint(dst: &mut [u8], mut value: u64) {
    let last = dst.len() - 1;
    for (i, byte) in dst.iter_mut().enumerate() {
        if i == last {
            *byte = value as u8;
        } else {
            *byte = (value as u8) | 0x80;
            value >>= 7;
        }
    }
}

/// Maps a signed 32-bit integer onto the unsigned range so that small
/// magnitudes stay short.
#[inline]
pub const fn zigzag32(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

/// 64-bit counterpart of [`zigzag32`].
#[inline]
pub const fn zigzag64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Appends a zigzag-encoded 32-bit varint.
#[inline]
pub fn encode_zigzag32(buf: &mut Vec<u8>, value: i32) {
    encode_varint(buf, u64::from(zigzag32(value)));
}

/// Appends a zigzag-encoded 64-bit varint.
#[inline]
pub fn encode_zigzag64(buf: &mut Vec<u8>, value: i64) {
    encode_varint(buf, zigzag64(value));
}

/// Appends four little-endian bytes.
#[inline]
pub fn encode_fixed32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Appends eight little-endian bytes.
#[inline]
pub fn encode_fixed64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Appends a varint length followed by `bytes`.
#[inline]
pub fn encode_raw_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_varint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Appends a length-prefixed UTF-8 string.
#[inline]
pub fn encode_string(buf: &mut Vec<u8>, s: &str) {
    encode_raw_bytes(buf, s.as_bytes());
}

/// The varint encoding of `(tag << 3) | wire_type`, computed once per field.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TagCode {
    bytes: [u8; 5],
    len: u8,
}

impl TagCode {
    /// Encodes the key for `tag` with `wire_type`. `tag` must not exceed [`MAX_TAG`].
    pub fn new(tag: u32, wire_type: WireType) -> Self {
        let key = (u64::from(tag) << 3) | wire_type as u64;
        let len = size_varint(key);
        let mut bytes = [0u8; 5];
        put_varint(&mut bytes[..len], key);
        Self {
            bytes,
            len: len as u8,
        }
    }

    /// The encoded key bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// Appends the key bytes to `buf`.
    #[inline]
    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.as_bytes());
    }
}

impl fmt::Debug for TagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TagCode({:02x?})", self.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn varint(value: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_varint(&mut buf, value);
        buf
    }

    #[facet_testhelpers::test]
    fn varint_boundaries() {
        assert_eq!(varint(0), [0x00]);
        assert_eq!(varint(1), [0x01]);
        assert_eq!(varint(127), [0x7f]);
        assert_eq!(varint(128), [0x80, 0x01]);
        assert_eq!(varint(300), [0xac, 0x02]);
        assert_eq!(varint(16_383), [0xff, 0x7f]);
        assert_eq!(varint(16_384), [0x80, 0x80, 0x01]);
        assert_eq!(varint(u64::MAX).len(), MAX_VARINT_LEN);
        assert_eq!(*varint(u64::MAX).last().unwrap(), 0x01);
    }

    #[facet_testhelpers::test]
    fn size_varint_agrees_with_encoder() {
        let mut value = 1u64;
        for _ in 0..64 {
            for candidate in [value - 1, value, value + 1] {
                assert_eq!(size_varint(candidate), varint(candidate).len(), "value {candidate}");
            }
            value = value.wrapping_shl(1).max(1);
        }
        assert_eq!(size_varint(u64::MAX), 10);
    }

    #[facet_testhelpers::test]
    fn put_varint_in_place() {
        let mut buf = [0u8; 2];
        put_varint(&mut buf, 300);
        assert_eq!(buf, [0xac, 0x02]);

        let mut one = [0xffu8; 1];
        put_varint(&mut one, 5);
        assert_eq!(one, [0x05]);
    }

    #[facet_testhelpers::test]
    fn zigzag_mapping() {
        assert_eq!(zigzag32(0), 0);
        assert_eq!(zigzag32(-1), 1);
        assert_eq!(zigzag32(1), 2);
        assert_eq!(zigzag32(-2), 3);
        assert_eq!(zigzag32(i32::MAX), u32::MAX - 1);
        assert_eq!(zigzag32(i32::MIN), u32::MAX);
        assert_eq!(zigzag64(-1), 1);
        assert_eq!(zigzag64(i64::MIN), u64::MAX);
    }

    #[facet_testhelpers::test]
    fn fixed_widths_are_little_endian() {
        let mut buf = Vec::new();
        encode_fixed32(&mut buf, 0x0102_0304);
        encode_fixed64(&mut buf, 1);
        assert_eq!(buf, [4, 3, 2, 1, 1, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[facet_testhelpers::test]
    fn tag_codes() {
        assert_eq!(TagCode::new(1, WireType::Varint).as_bytes(), [0x08]);
        assert_eq!(TagCode::new(2, WireType::Bytes).as_bytes(), [0x12]);
        assert_eq!(TagCode::new(15, WireType::Fixed32).as_bytes(), [0x7d]);
        assert_eq!(TagCode::new(16, WireType::Varint).as_bytes(), [0x80, 0x01]);
        assert_eq!(TagCode::new(MAX_TAG, WireType::Fixed32).as_bytes().len(), 5);
    }

    #[facet_testhelpers::test]
    fn strings_are_length_prefixed() {
        let mut buf = Vec::new();
        encode_string(&mut buf, "hi");
        encode_raw_bytes(&mut buf, &[]);
        assert_eq!(buf, [2, b'h', b'i', 0]);
    }
}
