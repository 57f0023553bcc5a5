//! Compression codec
//!
//! Wraps values in a one-byte format tag so readers can tell stored,
//! compressed, and raw (untagged) payloads apart.

use std::fmt;

use crate::error::{Result, StoreError};

/// Tag for a payload stored without compression
pub const TAG_STORED: u8 = 0x00;

/// Tag for a zstd-compressed payload
pub const TAG_ZSTD: u8 = 0x01;

/// Compression level, chosen once per store instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    /// Payload is stored as-is (identity transform behind the tag)
    #[default]
    None,

    /// Lowest CPU cost
    Fastest,

    /// Balanced CPU cost and size
    Optimal,

    /// Smallest output, highest CPU cost
    SmallestSize,
}

impl CompressionLevel {
    /// zstd level for this setting, None when compression is off
    fn zstd_level(self) -> Option<i32> {
        match self {
            CompressionLevel::None => None,
            CompressionLevel::Fastest => Some(1),
            CompressionLevel::Optimal => Some(3),
            CompressionLevel::SmallestSize => Some(19),
        }
    }

    /// All supported levels
    pub fn all() -> [CompressionLevel; 4] {
        [
            CompressionLevel::None,
            CompressionLevel::Fastest,
            CompressionLevel::Optimal,
            CompressionLevel::SmallestSize,
        ]
    }
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompressionLevel::None => "none",
            CompressionLevel::Fastest => "fastest",
            CompressionLevel::Optimal => "optimal",
            CompressionLevel::SmallestSize => "smallest",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for CompressionLevel {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(CompressionLevel::None),
            "fastest" => Ok(CompressionLevel::Fastest),
            "optimal" => Ok(CompressionLevel::Optimal),
            "smallest" | "smallestsize" => Ok(CompressionLevel::SmallestSize),
            other => Err(StoreError::Config(format!(
                "unknown compression level: {}",
                other
            ))),
        }
    }
}

/// Compress `bytes` at `level` and prefix the format tag
pub fn compress(bytes: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
    match level.zstd_level() {
        None => {
            let mut out = Vec::with_capacity(1 + bytes.len());
            out.push(TAG_STORED);
            out.extend_from_slice(bytes);
            Ok(out)
        }
        Some(zstd_level) => {
            let compressed = zstd::encode_all(bytes, zstd_level)
                .map_err(|e| StoreError::Compression(format!("zstd encode failed: {}", e)))?;
            let mut out = Vec::with_capacity(1 + compressed.len());
            out.push(TAG_ZSTD);
            out.extend_from_slice(&compressed);
            Ok(out)
        }
    }
}

/// Undo `compress`, detecting the format from the tag.
///
/// Payloads that do not start with a known tag were written untagged and
/// are returned unchanged.
pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>> {
    match bytes.first() {
        Some(&TAG_STORED) => Ok(bytes[1..].to_vec()),
        Some(&TAG_ZSTD) => zstd::decode_all(&bytes[1..])
            .map_err(|e| StoreError::Compression(format!("zstd decode failed: {}", e))),
        _ => Ok(bytes.to_vec()),
    }
}

/// Per-instance value codec: compression level plus raw mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValueCodec {
    level: CompressionLevel,
    raw: bool,
}

impl ValueCodec {
    pub fn new(level: CompressionLevel, raw: bool) -> Self {
        Self { level, raw }
    }

    /// Codec that stores bytes verbatim
    pub fn raw() -> Self {
        Self::new(CompressionLevel::None, true)
    }

    pub fn level(&self) -> CompressionLevel {
        self.level
    }

    pub fn is_raw(&self) -> bool {
        self.raw
    }

    /// Turn a caller value into stored bytes
    pub fn encode(&self, value: &[u8]) -> Result<Vec<u8>> {
        if self.raw {
            return Ok(value.to_vec());
        }
        compress(value, self.level)
    }

    /// Turn stored bytes back into the caller value
    pub fn decode(&self, stored: Vec<u8>) -> Result<Vec<u8>> {
        if self.raw {
            return Ok(stored);
        }
        decompress(&stored)
    }
}
