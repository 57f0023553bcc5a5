//! Value Codec Module
//!
//! Transformations applied to values at the call boundary, before bytes
//! reach a backend:
//! - `compression`: tagged zstd compression, one level per store instance
//! - `typed`: serde records to JSON bytes and back
//!
//! Keys are never transformed here.
//!
//! ## Stored Value Format
//! ```text
//! ┌─────────┬──────────────────────────────┐
//! │ Tag (1) │ Payload                      │
//! └─────────┴──────────────────────────────┘
//!   0x00 = payload stored as-is
//!   0x01 = payload is a zstd frame
//!   (raw mode writes the payload alone, no tag)
//! ```

mod compression;
mod typed;

pub use compression::{compress, decompress, CompressionLevel, ValueCodec, TAG_STORED, TAG_ZSTD};
pub use typed::{decode_typed, encode_typed};
