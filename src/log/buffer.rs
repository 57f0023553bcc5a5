//! Log Buffer
//!
//! In-memory append-only log made of frozen segments plus one active buffer.
//! Sealing the active buffer is O(1), which keeps checkpoint snapshots cheap
//! while writers keep appending.

use bytes::{Bytes, BytesMut};

use crate::error::{Result, StoreError};

use super::record::{encode_record, RecordKind, HEADER_SIZE, PAYLOAD_PREFIX_SIZE};
use super::LogReader;

/// A frozen run of complete frames
#[derive(Debug, Clone)]
struct Segment {
    /// Log offset of the first byte
    base: u64,
    data: Bytes,
}

/// Point-in-time copy of the log: complete frames, in order, from offset 0
#[derive(Debug, Clone, Default)]
pub struct LogSnapshot {
    segments: Vec<Bytes>,
}

impl LogSnapshot {
    /// Snapshot backed by one contiguous image
    pub fn from_bytes(data: Bytes) -> Self {
        if data.is_empty() {
            return Self::default();
        }
        Self {
            segments: vec![data],
        }
    }

    /// Total size in bytes
    pub fn len(&self) -> u64 {
        self.segments.iter().map(|s| s.len() as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Segments in log order
    pub fn segments(&self) -> &[Bytes] {
        &self.segments
    }

    /// CRC32 over the whole image
    pub fn crc(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        for segment in &self.segments {
            hasher.update(segment);
        }
        hasher.finalize()
    }

    /// The image as one contiguous buffer
    pub fn to_bytes(&self) -> Bytes {
        match self.segments.len() {
            0 => Bytes::new(),
            1 => self.segments[0].clone(),
            _ => {
                let mut out = BytesMut::with_capacity(self.len() as usize);
                for segment in &self.segments {
                    out.extend_from_slice(segment);
                }
                out.freeze()
            }
        }
    }
}

/// Append-only record log
#[derive(Debug)]
pub struct LogBuffer {
    /// Frozen segments, ordered by base offset
    sealed: Vec<Segment>,

    /// Frames appended since the last seal
    active: BytesMut,

    /// Log offset of `active[0]`
    active_base: u64,

    /// Sequence number for the next frame
    next_seq: u64,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBuffer {
    /// Create an empty log
    pub fn new() -> Self {
        Self {
            sealed: Vec::new(),
            active: BytesMut::new(),
            active_base: 0,
            next_seq: 1,
        }
    }

    /// Rebuild a log from a snapshot. Frames are validated by the caller.
    pub fn from_snapshot(snapshot: &LogSnapshot, next_seq: u64) -> Self {
        let mut sealed = Vec::with_capacity(snapshot.segments.len());
        let mut base = 0u64;
        for data in &snapshot.segments {
            sealed.push(Segment {
                base,
                data: data.clone(),
            });
            base += data.len() as u64;
        }

        Self {
            sealed,
            active: BytesMut::new(),
            active_base: base,
            next_seq,
        }
    }

    /// Total size in bytes
    pub fn len(&self) -> u64 {
        self.active_base + self.active.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sequence number of the most recent frame (0 when empty)
    pub fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }

    /// Append a put frame, returning (offset, frame length)
    pub fn append_put(&mut self, key: &[u8], value: &[u8]) -> Result<(u64, u32)> {
        self.append(RecordKind::Put, key, value)
    }

    /// Append a delete frame, returning (offset, frame length)
    pub fn append_delete(&mut self, key: &[u8]) -> Result<(u64, u32)> {
        self.append(RecordKind::Delete, key, &[])
    }

    fn append(&mut self, kind: RecordKind, key: &[u8], value: &[u8]) -> Result<(u64, u32)> {
        let offset = self.len();
        let frame_len = encode_record(&mut self.active, self.next_seq, kind, key, value)?;
        self.next_seq += 1;
        Ok((offset, frame_len))
    }

    /// The value bytes of the put frame at `offset` for a key of `key_len`.
    pub fn value(&self, offset: u64, frame_len: u32, key_len: usize) -> Result<&[u8]> {
        let frame = self.frame(offset, frame_len)?;
        let value_start = HEADER_SIZE + PAYLOAD_PREFIX_SIZE + key_len;
        frame.get(value_start..).ok_or_else(|| {
            StoreError::LogCorruption(format!("value outside frame at offset {}", offset))
        })
    }

    /// Raw frame bytes at `offset`
    fn frame(&self, offset: u64, frame_len: u32) -> Result<&[u8]> {
        let (base, data): (u64, &[u8]) = if offset >= self.active_base {
            (self.active_base, &self.active[..])
        } else {
            // Last segment whose base is <= offset
            let idx = self.sealed.partition_point(|s| s.base <= offset);
            let segment = idx
                .checked_sub(1)
                .and_then(|i| self.sealed.get(i))
                .ok_or_else(|| {
                    StoreError::LogCorruption(format!("no segment holds offset {}", offset))
                })?;
            (segment.base, &segment.data[..])
        };

        let start = (offset - base) as usize;
        data.get(start..start + frame_len as usize).ok_or_else(|| {
            StoreError::LogCorruption(format!(
                "frame at offset {} (len {}) overruns its segment",
                offset, frame_len
            ))
        })
    }

    /// Freeze pending frames and return a snapshot of the whole log.
    pub fn seal(&mut self) -> LogSnapshot {
        if !self.active.is_empty() {
            let data = self.active.split().freeze();
            self.sealed.push(Segment {
                base: self.active_base,
                data,
            });
            self.active_base = self.len_sealed();
        }

        LogSnapshot {
            segments: self.sealed.iter().map(|s| s.data.clone()).collect(),
        }
    }

    fn len_sealed(&self) -> u64 {
        self.sealed
            .last()
            .map(|s| s.base + s.data.len() as u64)
            .unwrap_or(0)
    }

    /// Iterate every frame in the log, oldest first
    pub fn frames(&self) -> impl Iterator<Item = Result<super::RecordView<'_>>> {
        self.sealed
            .iter()
            .map(|s| (s.base, &s.data[..]))
            .chain(std::iter::once((self.active_base, &self.active[..])))
            .flat_map(|(base, data)| LogReader::with_base(data, base))
    }
}
