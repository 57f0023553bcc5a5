//! Configuration for adapterkv
//!
//! Centralized store configuration with sensible defaults.

use std::fmt;
use std::path::PathBuf;

use crate::checkpoint::{CheckpointManagerFactory, LocalCheckpointManager};
use crate::codec::CompressionLevel;

/// Which backend implements the store contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Volatile in-memory map
    Memory,

    /// One file per key under `storage_location`
    File,

    /// Single embedded database at `storage_location`
    Embedded,

    /// Log-structured engine with checkpoints
    Log,
}

/// Main configuration for a store instance
#[derive(Clone)]
pub struct StoreConfig {
    // -------------------------------------------------------------------------
    // Backend Selection
    // -------------------------------------------------------------------------
    /// Backend chosen by `store::open`
    pub backend: BackendKind,

    /// Backend-specific durable target.
    /// - File:     directory holding one file per key
    /// - Embedded: database directory
    /// - Log:      checkpoint directory (used when no factory is set)
    pub storage_location: Option<PathBuf>,

    // -------------------------------------------------------------------------
    // Value Codec Configuration
    // -------------------------------------------------------------------------
    /// Compression applied to every value written through this instance
    pub compression_level: CompressionLevel,

    /// Store caller bytes verbatim, bypassing the compression tag
    pub enable_raw_writes: bool,

    // -------------------------------------------------------------------------
    // Checkpoint Configuration
    // -------------------------------------------------------------------------
    /// Produces the checkpoint manager for the log engine.
    /// None (and no storage location) means purely volatile operation.
    pub checkpoint_manager_factory: Option<CheckpointManagerFactory>,

    /// Number of checkpoint generations kept on disk (at least 1)
    pub retained_checkpoints: usize,

    // -------------------------------------------------------------------------
    // Log Compaction Configuration
    // -------------------------------------------------------------------------
    /// Minimum log size (in bytes) before compaction is considered
    pub compaction_min_bytes: usize,

    /// Dead bytes / total bytes ratio that triggers compaction
    pub compaction_garbage_ratio: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Log,
            storage_location: None,
            compression_level: CompressionLevel::None,
            enable_raw_writes: false,
            checkpoint_manager_factory: None,
            retained_checkpoints: 1,
            compaction_min_bytes: 64 * 1024, // 64 KB
            compaction_garbage_ratio: 0.5,
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("backend", &self.backend)
            .field("storage_location", &self.storage_location)
            .field("compression_level", &self.compression_level)
            .field("enable_raw_writes", &self.enable_raw_writes)
            .field(
                "checkpoint_manager_factory",
                &self.checkpoint_manager_factory.as_ref().map(|_| "<factory>"),
            )
            .field("retained_checkpoints", &self.retained_checkpoints)
            .field("compaction_min_bytes", &self.compaction_min_bytes)
            .field("compaction_garbage_ratio", &self.compaction_garbage_ratio)
            .finish()
    }
}

impl StoreConfig {
    /// Create a new config builder
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    /// Resolve the checkpoint manager factory for the log engine.
    ///
    /// An explicit factory wins; otherwise a storage location selects a
    /// local-directory manager; otherwise the engine is volatile.
    pub fn resolved_checkpoint_factory(&self) -> Option<CheckpointManagerFactory> {
        if let Some(factory) = &self.checkpoint_manager_factory {
            return Some(factory.clone());
        }
        self.storage_location
            .as_ref()
            .map(|dir| LocalCheckpointManager::factory(dir.clone(), self.retained_checkpoints))
    }
}

/// Builder for StoreConfig
#[derive(Default)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    /// Set the backend kind
    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.config.backend = backend;
        self
    }

    /// Set the backend-specific storage location
    pub fn storage_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.storage_location = Some(path.into());
        self
    }

    /// Set the compression level for stored values
    pub fn compression_level(mut self, level: CompressionLevel) -> Self {
        self.config.compression_level = level;
        self
    }

    /// Enable or disable raw (untagged) writes
    pub fn enable_raw_writes(mut self, enabled: bool) -> Self {
        self.config.enable_raw_writes = enabled;
        self
    }

    /// Set the checkpoint manager factory
    pub fn checkpoint_manager_factory(mut self, factory: CheckpointManagerFactory) -> Self {
        self.config.checkpoint_manager_factory = Some(factory);
        self
    }

    /// Set how many checkpoint generations to keep (clamped to at least 1)
    pub fn retained_checkpoints(mut self, count: usize) -> Self {
        self.config.retained_checkpoints = count.max(1);
        self
    }

    /// Set the minimum log size before compaction (in bytes)
    pub fn compaction_min_bytes(mut self, size: usize) -> Self {
        self.config.compaction_min_bytes = size;
        self
    }

    /// Set the garbage ratio that triggers compaction
    pub fn compaction_garbage_ratio(mut self, ratio: f64) -> Self {
        self.config.compaction_garbage_ratio = ratio;
        self
    }

    pub fn build(self) -> StoreConfig {
        self.config
    }
}
