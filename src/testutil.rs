//! Test-only EBML byte builders.
//!
//! The crate never writes EBML; these helpers exist so tests can assemble
//! synthetic documents byte by byte.

use crate::cursor::ByteCursor;
use crate::source::MemorySource;

/// Encode an element id verbatim (marker bits are part of the id value).
pub fn encode_id(id: u32) -> Vec<u8> {
    let width = 4 - id.leading_zeros() as usize / 8;
    id.to_be_bytes()[4 - width..].to_vec()
}

/// Encode a size as a minimal-width vint.
pub fn encode_size(value: u64) -> Vec<u8> {
    let mut width = 1u8;
    while width < 8 && value >= (1u64 << (7 * width)) - 1 {
        width += 1;
    }
    let mut bytes = vec![0u8; width as usize];
    let mut v = value;
    for slot in bytes.iter_mut().rev() {
        *slot = (v & 0xFF) as u8;
        v >>= 8;
    }
    bytes[0] |= 0x80u8.wrapping_shr(width as u32 - 1);
    bytes
}

/// A complete element: id, size vint, payload.
pub fn el(id: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = encode_id(id);
    out.extend_from_slice(&encode_size(payload.len() as u64));
    out.extend_from_slice(payload);
    out
}

/// An unsigned-integer element, minimal payload width.
pub fn uint_el(id: u32, value: u64) -> Vec<u8> {
    let width = (8 - value.leading_zeros() as usize / 8).max(1);
    el(id, &value.to_be_bytes()[8 - width..])
}

/// An 8-byte float element.
pub fn float_el(id: u32, value: f64) -> Vec<u8> {
    el(id, &value.to_bits().to_be_bytes())
}

/// A 4-byte float element.
pub fn float32_el(id: u32, value: f32) -> Vec<u8> {
    el(id, &value.to_bits().to_be_bytes())
}

/// A UTF-8 string element.
pub fn str_el(id: u32, value: &str) -> Vec<u8> {
    el(id, value.as_bytes())
}

/// Bind a cursor over an in-memory document and prime the first chunk.
pub fn cursor_over(data: Vec<u8>, chunk_size: u64) -> ByteCursor<MemorySource> {
    let size = data.len() as u64;
    let mut cursor = ByteCursor::new();
    cursor.set_chunk_size(chunk_size);
    cursor.bind(MemorySource::new(data), size);
    cursor.receive_input().unwrap();
    cursor
}
