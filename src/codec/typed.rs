//! Typed value codec
//!
//! Records are encoded as JSON text. Decoding never falls back to a default
//! value: empty or malformed bytes are a `CorruptValue` error.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StoreError};

/// Serialize a record to bytes
pub fn encode_typed<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(record)
        .map_err(|e| StoreError::Serialization(format!("Failed to encode record: {}", e)))
}

/// Deserialize a record from bytes
pub fn decode_typed<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| StoreError::CorruptValue(format!("Failed to decode record: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Tag {
        name: String,
        scan_rate_ms: u32,
        enabled: bool,
    }

    #[test]
    fn test_encode_decode_record() {
        let tag = Tag {
            name: "Boiler.Temperature".to_string(),
            scan_rate_ms: 500,
            enabled: true,
        };

        let bytes = encode_typed(&tag).unwrap();
        let decoded: Tag = decode_typed(&bytes).unwrap();

        assert_eq!(decoded, tag);
    }

    #[test]
    fn test_empty_bytes_are_corrupt() {
        let result: Result<Tag> = decode_typed(&[]);
        assert!(matches!(result, Err(StoreError::CorruptValue(_))));
    }

    #[test]
    fn test_wrong_shape_is_corrupt() {
        let result: Result<Tag> = decode_typed(b"[1,2,3]");
        assert!(matches!(result, Err(StoreError::CorruptValue(_))));
    }
}
