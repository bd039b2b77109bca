//! Little-endian codec for the persisted file formats.
//!
//! Everything written to `data.log`, `index.idx`, and `metadata.meta` goes
//! through these helpers, so the on-disk byte order is explicit and identical
//! across machines.

use bytes::{BufMut, BytesMut};

use crate::constants::{INDEX_ENTRY_SIZE, METADATA_SIZE, RECORD_HEADER_SIZE};

/// Append a full record (`offset || payload_len || payload`) to `buf`.
pub fn encode_record(buf: &mut BytesMut, offset: u64, payload: &[u8]) {
    buf.reserve(RECORD_HEADER_SIZE + payload.len());
    buf.put_u64_le(offset);
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(payload);
}

/// Decode a record header into `(offset, payload_len)`.
pub fn decode_record_header(header: &[u8; RECORD_HEADER_SIZE]) -> (u64, u32) {
    let offset = u64::from_le_bytes(header[..8].try_into().unwrap_or_default());
    let payload_len = u32::from_le_bytes(header[8..].try_into().unwrap_or_default());
    (offset, payload_len)
}

/// Encode one index entry (`offset || byte_position`).
pub fn encode_index_entry(offset: u64, byte_pos: u64) -> [u8; INDEX_ENTRY_SIZE] {
    let mut entry = [0u8; INDEX_ENTRY_SIZE];
    entry[..8].copy_from_slice(&offset.to_le_bytes());
    entry[8..].copy_from_slice(&byte_pos.to_le_bytes());
    entry
}

/// Decode one index entry into `(offset, byte_position)`.
pub fn decode_index_entry(entry: &[u8; INDEX_ENTRY_SIZE]) -> (u64, u64) {
    let offset = u64::from_le_bytes(entry[..8].try_into().unwrap_or_default());
    let byte_pos = u64::from_le_bytes(entry[8..].try_into().unwrap_or_default());
    (offset, byte_pos)
}

/// Encode the metadata file contents: the next offset.
pub fn encode_metadata(next_offset: u64) -> [u8; METADATA_SIZE] {
    next_offset.to_le_bytes()
}

/// Decode the metadata file contents.
pub fn decode_metadata(data: &[u8; METADATA_SIZE]) -> u64 {
    u64::from_le_bytes(*data)
}
