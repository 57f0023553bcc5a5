//! Checkpoint Module
//!
//! Durable, atomic snapshots of the engine's index and log.
//!
//! ## Responsibilities
//! - `CheckpointManager`: pluggable strategy that stores and retrieves
//!   checkpoint artifacts, one generation superseding the previous
//! - Snapshot types handed between the engine and a manager
//! - `LocalCheckpointManager`: generation directories under a local path
//!
//! Managers are synchronous; the engine calls them from a blocking task.
//! A manager must never leave a half-written generation visible to
//! `load_latest`.

mod local;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::index::{IndexEntry, KeyIndex};
use crate::log::LogSnapshot;

pub use local::LocalCheckpointManager;

/// Current on-disk checkpoint format version
pub const FORMAT_VERSION: u32 = 1;

/// Identifies a persisted checkpoint generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CheckpointToken(u64);

impl CheckpointToken {
    pub fn new(generation: u64) -> Self {
        Self(generation)
    }

    pub fn generation(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CheckpointToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

/// Serialized key index plus the counters recovery checks it against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSnapshot {
    /// Sequence number of the last frame covered by this snapshot
    pub last_seq: u64,

    /// Number of live keys
    pub live_keys: u64,

    /// bincode-encoded `IndexImage`
    pub data: Vec<u8>,
}

/// The serialized form of a key index
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexImage {
    pub last_seq: u64,
    pub entries: BTreeMap<Vec<u8>, IndexEntry>,
}

impl IndexSnapshot {
    /// Serialize `index` as of log sequence `last_seq`
    pub fn capture(index: &KeyIndex, last_seq: u64) -> Result<Self> {
        #[derive(Serialize)]
        struct ImageRef<'a> {
            last_seq: u64,
            entries: &'a BTreeMap<Vec<u8>, IndexEntry>,
        }

        let data = bincode::serialize(&ImageRef {
            last_seq,
            entries: index.entries(),
        })
        .map_err(|e| StoreError::Serialization(format!("Failed to encode index: {}", e)))?;

        Ok(Self {
            last_seq,
            live_keys: index.live_count() as u64,
            data,
        })
    }

    /// Decode the index image
    pub fn image(&self) -> Result<IndexImage> {
        bincode::deserialize(&self.data)
            .map_err(|e| StoreError::Recovery(format!("Failed to decode index snapshot: {}", e)))
    }

    /// CRC32 over the serialized index
    pub fn crc(&self) -> u32 {
        crc32fast::hash(&self.data)
    }
}

/// Metadata persisted next to every checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub format_version: u32,
    pub generation: u64,
    /// Unix millis when the checkpoint was written
    pub created_at_ms: u64,
    pub last_seq: u64,
    pub live_keys: u64,
    pub index_len: u64,
    pub index_crc: u32,
    pub log_len: u64,
    pub log_crc: u32,
    /// Always false: a checkpoint is clean by construction
    pub dirty: bool,
}

/// A checkpoint read back from storage
#[derive(Debug, Clone)]
pub struct LoadedCheckpoint {
    pub token: CheckpointToken,
    pub metadata: CheckpointMetadata,
    pub index: IndexSnapshot,
    pub log: LogSnapshot,
}

/// Stores and retrieves checkpoint artifacts
pub trait CheckpointManager: Send + Sync {
    /// Durably store a checkpoint, superseding earlier ones
    fn persist(&self, index: &IndexSnapshot, log: &LogSnapshot) -> Result<CheckpointToken>;

    /// The most recent checkpoint, or None if nothing was ever persisted.
    ///
    /// Artifacts that exist but fail validation are an error.
    fn load_latest(&self) -> Result<Option<LoadedCheckpoint>>;

    /// Human-readable location, for logs
    fn describe(&self) -> String;
}

/// Produces a checkpoint manager bound to one location
pub type CheckpointManagerFactory =
    Arc<dyn Fn() -> Result<Box<dyn CheckpointManager>> + Send + Sync>;
