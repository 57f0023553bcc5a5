//! Record Log Module
//!
//! The append-only log behind the log-structured engine.
//!
//! ## Responsibilities
//! - Frame every mutation as a checksummed record
//! - Sequence numbers for ordering (strictly increasing)
//! - Hand out (offset, length) locations for the key index
//! - Cheap point-in-time snapshots for checkpoints (sealed `Bytes` segments)
//! - Frame-by-frame validation during recovery
//!
//! ## Record Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (16 bytes)                                       │
//! │   Seq: u64 (8) | CRC: u32 (4) | PayloadLen: u32 (4)     │
//! ├─────────────────────────────────────────────────────────┤
//! │ Payload                                                 │
//! │   Kind: u8 (1) | KeyLen: u32 (4) | Key | Value          │
//! │   (Kind 0x01 = put, 0x02 = delete with empty value)     │
//! └─────────────────────────────────────────────────────────┘
//! ```
//! All integers are little-endian. The CRC covers the sequence number and
//! the payload.

mod buffer;
mod reader;
mod record;

pub use buffer::{LogBuffer, LogSnapshot};
pub use reader::LogReader;
pub use record::{encode_record, RecordKind, RecordView, HEADER_SIZE, PAYLOAD_PREFIX_SIZE};
