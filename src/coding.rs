//! Varint and fixed-width integer encoding shared by the block format.
//!
//! Varints are base-128 little-endian: seven value bits per byte, high bit
//! set on every byte except the last.

use bytes::BufMut;

/// Maximum encoded width of a 32-bit varint.
pub const MAX_VARINT32_LEN: usize = 5;

/// Maximum encoded width of a 64-bit varint.
pub const MAX_VARINT64_LEN: usize = 10;

/// Appends `value` as a varint32.
pub fn put_varint32<B: BufMut>(dst: &mut B, value: u32) {
    put_varint64(dst, value as u64);
}

/// Appends `value` as a varint64.
pub fn put_varint64<B: BufMut>(dst: &mut B, mut value: u64) {
    while value >= 0x80 {
        dst.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    dst.put_u8(value as u8);
}

/// Number of bytes `value` occupies as a varint.
pub fn varint_length(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Decodes a varint32 from the front of `src`.
///
/// Returns the value and the number of bytes consumed, or `None` if `src`
/// ends mid-varint or the encoding is wider than five bytes.
pub fn get_varint32(src: &[u8]) -> Option<(u32, usize)> {
    // Single byte values dominate in practice.
    if let Some(&b) = src.first() {
        if b & 0x80 == 0 {
            return Some((b as u32, 1));
        }
    }
    let (value, n) = decode_varint(src, MAX_VARINT32_LEN)?;
    u32::try_from(value).ok().map(|v| (v, n))
}

/// Decodes a varint64 from the front of `src`.
pub fn get_varint64(src: &[u8]) -> Option<(u64, usize)> {
    decode_varint(src, MAX_VARINT64_LEN)
}

fn decode_varint(src: &[u8], max_len: usize) -> Option<(u64, usize)> {
    let mut result = 0u64;
    for (i, &byte) in src.iter().take(max_len).enumerate() {
        result |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }
    }
    None
}

/// Appends `value` as four little-endian bytes.
pub fn put_fixed32<B: BufMut>(dst: &mut B, value: u32) {
    dst.put_u32_le(value);
}

/// Reads a little-endian u32 from the first four bytes of `src`.
pub fn decode_fixed32(src: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = src.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

/// Length of the longest common prefix of `a` and `b`.
pub fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}
