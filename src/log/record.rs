//! Log record framing
//!
//! Encodes mutations into checksummed frames and describes decoded frames.

use bytes::{BufMut, BytesMut};

use crate::error::{Result, StoreError};

/// Frame header: Seq (8) + CRC (4) + PayloadLen (4)
pub const HEADER_SIZE: usize = 16;

/// Payload prefix before the key bytes: Kind (1) + KeyLen (4)
pub const PAYLOAD_PREFIX_SIZE: usize = 5;

/// Kind of mutation recorded in a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    Put = 0x01,
    Delete = 0x02,
}

impl RecordKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(RecordKind::Put),
            0x02 => Some(RecordKind::Delete),
            _ => None,
        }
    }
}

/// A decoded frame borrowing from the log bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordView<'a> {
    /// Offset of the frame header within the log
    pub offset: u64,

    /// Total frame length (header + payload)
    pub frame_len: u32,

    pub seq: u64,
    pub kind: RecordKind,
    pub key: &'a [u8],
    pub value: &'a [u8],
}

/// Append one frame to `out`, returning the frame length.
pub fn encode_record(
    out: &mut BytesMut,
    seq: u64,
    kind: RecordKind,
    key: &[u8],
    value: &[u8],
) -> Result<u32> {
    let payload_len = PAYLOAD_PREFIX_SIZE + key.len() + value.len();
    let frame_len = HEADER_SIZE + payload_len;
    if key.len() > u32::MAX as usize || frame_len > u32::MAX as usize {
        return Err(StoreError::Serialization(format!(
            "record too large: {} bytes",
            frame_len
        )));
    }

    let key_len = (key.len() as u32).to_le_bytes();

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&seq.to_le_bytes());
    hasher.update(&[kind as u8]);
    hasher.update(&key_len);
    hasher.update(key);
    hasher.update(value);
    let crc = hasher.finalize();

    out.reserve(frame_len);
    out.put_u64_le(seq);
    out.put_u32_le(crc);
    out.put_u32_le(payload_len as u32);
    out.put_u8(kind as u8);
    out.put_slice(&key_len);
    out.put_slice(key);
    out.put_slice(value);

    Ok(frame_len as u32)
}

/// Decode the frame starting at `data[pos..]`.
///
/// `base` is the log offset of `data[0]`. Returns `Ok(None)` at the end of
/// `data`; a truncated or mismatched frame is `LogCorruption`.
pub(crate) fn decode_record(data: &[u8], pos: usize, base: u64) -> Result<Option<RecordView<'_>>> {
    if pos == data.len() {
        return Ok(None);
    }
    let offset = base + pos as u64;

    let header = data.get(pos..pos + HEADER_SIZE).ok_or_else(|| {
        StoreError::LogCorruption(format!("truncated header at offset {}", offset))
    })?;
    let seq = le_u64(&header[0..8]);
    let crc = le_u32(&header[8..12]);
    let payload_len = le_u32(&header[12..16]) as usize;

    let start = pos + HEADER_SIZE;
    let payload = data.get(start..start + payload_len).ok_or_else(|| {
        StoreError::LogCorruption(format!("truncated payload at offset {}", offset))
    })?;
    if payload_len < PAYLOAD_PREFIX_SIZE {
        return Err(StoreError::LogCorruption(format!(
            "payload too short at offset {}",
            offset
        )));
    }

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&header[0..8]);
    hasher.update(payload);
    if hasher.finalize() != crc {
        return Err(StoreError::LogCorruption(format!(
            "CRC mismatch at offset {} (seq {})",
            offset, seq
        )));
    }

    let kind = RecordKind::from_byte(payload[0]).ok_or_else(|| {
        StoreError::LogCorruption(format!("unknown record kind {} at offset {}", payload[0], offset))
    })?;
    let key_len = le_u32(&payload[1..5]) as usize;
    let key = payload
        .get(PAYLOAD_PREFIX_SIZE..PAYLOAD_PREFIX_SIZE + key_len)
        .ok_or_else(|| {
            StoreError::LogCorruption(format!("key overruns payload at offset {}", offset))
        })?;
    let value = &payload[PAYLOAD_PREFIX_SIZE + key_len..];

    if kind == RecordKind::Delete && !value.is_empty() {
        return Err(StoreError::LogCorruption(format!(
            "delete record carries a value at offset {}",
            offset
        )));
    }

    Ok(Some(RecordView {
        offset,
        frame_len: (HEADER_SIZE + payload_len) as u32,
        seq,
        kind,
        key,
        value,
    }))
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

fn le_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}
