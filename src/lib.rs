//! # adapterkv
//!
//! Embeddable key-value storage for adapter components:
//! - One async byte-oriented contract (`KvStore`) over several backends
//! - Per-instance value compression with auto-detected format tags
//! - Typed records and prefix-scoped namespaces on any backend
//! - A log-structured engine made durable by explicit, atomic checkpoints
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │            Callers (write / read / delete / keys)            │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │     KvStoreExt: typed records (JSON) + ScopedStore prefix    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │          KvStore: ValueCodec (tag + zstd | raw)              │
//! └──────┬──────────────┬──────────────┬──────────────┬─────────┘
//!        ▼              ▼              ▼              ▼
//!  ┌──────────┐  ┌────────────┐  ┌──────────┐  ┌──────────────┐
//!  │  Memory  │  │ File/key   │  │ Embedded │  │   LogStore   │
//!  │ (RwLock) │  │ (tmp+mv)   │  │  (sled)  │  │ log + index  │
//!  └──────────┘  └────────────┘  └──────────┘  └──────┬───────┘
//!                                                     │ take_checkpoint
//!                                              ┌──────▼───────┐
//!                                              │  Checkpoint  │
//!                                              │   Manager    │
//!                                              └──────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod codec;
pub mod store;
pub mod log;
pub mod index;
pub mod checkpoint;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, StoreError};
pub use config::{BackendKind, StoreConfig, StoreConfigBuilder};
pub use codec::{CompressionLevel, ValueCodec};
pub use store::{
    open, EmbeddedStore, FileStore, KvStore, KvStoreExt, MemoryStore, ReadOutcome, ScopedStore,
    Status,
};
pub use checkpoint::{
    CheckpointManager, CheckpointManagerFactory, CheckpointToken, LocalCheckpointManager,
};
pub use engine::{EngineStats, LogStore};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of adapterkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
