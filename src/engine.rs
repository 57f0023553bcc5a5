//! Engine Module
//!
//! The log-structured store: an append-only record log plus an in-memory
//! key index, made durable by explicit checkpoints.
//!
//! ## Responsibilities
//! - Apply writes/deletes to log and index in one critical section
//! - Track unpersisted mutations with a generation counter (dirty flag)
//! - Hand consistent snapshots to the checkpoint manager
//! - Compact the log when enough of it is garbage
//! - Rebuild and validate state from the latest checkpoint on open
//! - Best-effort final checkpoint on close or drop
//!
//! ## Lifecycle
//! ```text
//!   open ──► Recovering ──► Ready ◄──────────────┐
//!                             │                  │
//!                             ├─ take_checkpoint ─► Checkpointing
//!                             │
//!                             └─ close / drop ──► Disposed
//! ```
//!
//! Without a checkpoint manager the engine is volatile: every instance
//! starts empty and nothing outlives it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointManager, CheckpointToken, IndexSnapshot, LoadedCheckpoint};
use crate::codec::ValueCodec;
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::index::KeyIndex;
use crate::log::{LogBuffer, LogSnapshot};
use crate::store::KvStore;

/// Index and log, always mutated together
#[derive(Debug, Default)]
struct EngineState {
    index: KeyIndex,
    log: LogBuffer,
}

/// Point-in-time engine counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStats {
    pub live_keys: usize,
    pub tombstones: usize,
    pub log_bytes: u64,
    pub garbage_bytes: u64,
    /// Mutations applied since open
    pub generation: u64,
    /// Highest generation covered by a persisted checkpoint
    pub checkpointed_generation: u64,
    pub dirty: bool,
    /// Generation token of the newest checkpoint written or loaded
    pub last_checkpoint: Option<u64>,
}

/// The log-structured engine
///
/// ## Concurrency Model
///
/// - **Mutations** (put/delete): exclusive `state` write lock, held only for
///   the in-memory append and index update, never across an await
/// - **Reads** (get/keys): shared `state` read lock
/// - **Checkpoints**: `checkpoint_lock` admits one at a time; the snapshot
///   itself is a short exclusive section on `state`, and the artifact I/O
///   runs on a blocking thread with no engine lock held. The blocking task
///   owns the checkpoint lock guard, so dropping a `take_checkpoint` future
///   never lets a second persist start while the first is still writing.
///
/// `generation` counts mutations and is bumped under the state lock, so the
/// value read during a snapshot matches exactly what the snapshot contains.
/// The engine is dirty while `generation > checkpointed`.
pub struct LogStore {
    config: StoreConfig,

    codec: ValueCodec,

    state: RwLock<EngineState>,

    /// None for a volatile engine
    checkpoints: Option<Arc<dyn CheckpointManager>>,

    /// Serializes checkpoint attempts, held until the persist finishes
    checkpoint_lock: Arc<tokio::sync::Mutex<()>>,

    generation: AtomicU64,
    checkpointed: Arc<AtomicU64>,
    last_checkpoint: Arc<Mutex<Option<CheckpointToken>>>,

    /// Set once the final checkpoint has run
    closed: AtomicBool,
}

impl LogStore {
    /// Open an engine, recovering from the latest checkpoint if one exists.
    ///
    /// On startup:
    /// 1. Resolve the checkpoint manager (none means volatile)
    /// 2. Load the latest checkpoint on a blocking thread
    /// 3. Replay its log, validating every frame
    /// 4. Cross-check the rebuilt index against the persisted index
    ///
    /// Checkpoint artifacts that exist but fail validation abort the open
    /// with `StoreError::Recovery`; the engine never silently starts empty.
    pub async fn open(config: StoreConfig) -> Result<Self> {
        let factory = match config.resolved_checkpoint_factory() {
            Some(factory) => factory,
            None => {
                info!("Opening volatile log store");
                return Ok(Self::assemble(config, None, EngineState::default(), None));
            }
        };

        let (manager, loaded) = tokio::task::spawn_blocking(move || -> Result<_> {
            let manager: Arc<dyn CheckpointManager> = Arc::from(factory()?);
            let loaded = manager.load_latest().map_err(|e| {
                if e.is_recovery() {
                    e
                } else {
                    StoreError::Recovery(format!(
                        "Failed to load checkpoint from {}: {}",
                        manager.describe(),
                        e
                    ))
                }
            })?;
            Ok((manager, loaded))
        })
        .await??;

        let (state, token) = match loaded {
            Some(checkpoint) => {
                let state = Self::recover(&checkpoint)?;
                info!(
                    location = %manager.describe(),
                    generation = checkpoint.token.generation(),
                    live_keys = state.index.live_count(),
                    log_bytes = state.log.len(),
                    "Recovered from checkpoint"
                );
                (state, Some(checkpoint.token))
            }
            None => {
                info!(location = %manager.describe(), "No checkpoint found, starting empty");
                (EngineState::default(), None)
            }
        };

        Ok(Self::assemble(config, Some(manager), state, token))
    }

    /// A volatile engine with the given codec
    pub fn volatile(codec: ValueCodec) -> Self {
        let config = StoreConfig::builder()
            .compression_level(codec.level())
            .enable_raw_writes(codec.is_raw())
            .build();
        Self::assemble(config, None, EngineState::default(), None)
    }

    fn assemble(
        config: StoreConfig,
        checkpoints: Option<Arc<dyn CheckpointManager>>,
        state: EngineState,
        token: Option<CheckpointToken>,
    ) -> Self {
        Self {
            codec: ValueCodec::new(config.compression_level, config.enable_raw_writes),
            config,
            state: RwLock::new(state),
            checkpoints,
            checkpoint_lock: Arc::new(tokio::sync::Mutex::new(())),
            generation: AtomicU64::new(0),
            checkpointed: Arc::new(AtomicU64::new(0)),
            last_checkpoint: Arc::new(Mutex::new(token)),
            closed: AtomicBool::new(false),
        }
    }

    /// Rebuild engine state from a loaded checkpoint
    fn recover(checkpoint: &LoadedCheckpoint) -> Result<EngineState> {
        let image = checkpoint.index.image()?;
        if image.last_seq != checkpoint.index.last_seq {
            return Err(StoreError::Recovery(format!(
                "Index image covers seq {} but metadata says {}",
                image.last_seq, checkpoint.index.last_seq
            )));
        }

        let log = LogBuffer::from_snapshot(&checkpoint.log, image.last_seq + 1);
        let mut index = KeyIndex::new();
        let mut expected_seq = 1;

        // Frames are numbered 1..=last_seq with no gaps
        for record in log.frames() {
            let record = record
                .map_err(|e| StoreError::Recovery(format!("Log replay failed: {}", e)))?;
            if record.seq != expected_seq {
                return Err(StoreError::Recovery(format!(
                    "Log frame at offset {} has seq {}, expected {}",
                    record.offset, record.seq, expected_seq
                )));
            }
            expected_seq += 1;
            index.apply(&record);
        }

        let replayed = expected_seq - 1;
        if replayed != image.last_seq {
            return Err(StoreError::Recovery(format!(
                "Log ends at seq {} but index covers seq {}",
                replayed, image.last_seq
            )));
        }
        if index.entries() != &image.entries {
            return Err(StoreError::Recovery(
                "Index snapshot disagrees with replayed log".to_string(),
            ));
        }
        if index.live_count() as u64 != checkpoint.index.live_keys {
            return Err(StoreError::Recovery(format!(
                "Checkpoint records {} live keys, log holds {}",
                checkpoint.index.live_keys,
                index.live_count()
            )));
        }

        debug!(
            frames = replayed,
            tombstones = index.tombstone_count(),
            garbage_bytes = index.garbage_bytes(),
            "Log replay complete"
        );

        Ok(EngineState { index, log })
    }

    // =========================================================================
    // Checkpointing
    // =========================================================================

    /// Persist the current state if it changed since the last checkpoint.
    ///
    /// Returns `Ok(false)` without doing any work when the engine is
    /// volatile, clean, or already checkpointing. A failed persist leaves
    /// the engine dirty and usable and returns `StoreError::Checkpoint`.
    ///
    /// The checkpoint contains every mutation that returned before its
    /// snapshot section took the state lock; later mutations keep the engine
    /// dirty for the next checkpoint.
    ///
    /// Dropping the returned future does not abort a persist that already
    /// started. It runs to completion and still advances the checkpointed
    /// generation; until then other checkpoint requests return `Ok(false)`.
    pub async fn take_checkpoint(&self) -> Result<bool> {
        self.ensure_open()?;
        let manager = match &self.checkpoints {
            Some(manager) => manager.clone(),
            None => return Ok(false),
        };

        let guard = match Arc::clone(&self.checkpoint_lock).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Checkpoint already in flight");
                return Ok(false);
            }
        };

        self.run_checkpoint(manager, guard).await
    }

    /// Body of a checkpoint. `guard` moves into the blocking task and is
    /// released only when the persist ends.
    async fn run_checkpoint(
        &self,
        manager: Arc<dyn CheckpointManager>,
        guard: OwnedMutexGuard<()>,
    ) -> Result<bool> {
        if !self.is_dirty() {
            return Ok(false);
        }

        let (generation, index, log) = self.snapshot()?;
        let checkpointed = Arc::clone(&self.checkpointed);
        let last_checkpoint = Arc::clone(&self.last_checkpoint);

        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            persist_snapshot(
                manager.as_ref(),
                generation,
                &index,
                &log,
                &checkpointed,
                &last_checkpoint,
            )
        })
        .await
        .map_err(StoreError::from)
        .and_then(|result| result)
        .map(|_| true)
        .map_err(|e| StoreError::Checkpoint(e.to_string()))
    }

    /// Seal the log and capture the index in one exclusive section,
    /// compacting first when the log is mostly garbage.
    fn snapshot(&self) -> Result<(u64, IndexSnapshot, LogSnapshot)> {
        let mut state = self.state.write();

        if self.should_compact(&state) {
            let before = state.log.len();
            Self::compact(&mut state)?;
            info!(before, after = state.log.len(), "Compacted log");
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let log = state.log.seal();
        let index = IndexSnapshot::capture(&state.index, state.log.last_seq())?;
        Ok((generation, index, log))
    }

    fn should_compact(&self, state: &EngineState) -> bool {
        let total = state.log.len();
        if total == 0 || total < self.config.compaction_min_bytes as u64 {
            return false;
        }
        let ratio = state.index.garbage_bytes() as f64 / total as f64;
        ratio >= self.config.compaction_garbage_ratio
    }

    /// Rewrite the log with one put frame per live key, renumbered from 1.
    /// Tombstones are dropped.
    fn compact(state: &mut EngineState) -> Result<()> {
        let mut log = LogBuffer::new();
        let mut index = KeyIndex::new();

        for (key, entry) in state.index.live_entries() {
            let value = state.log.value(entry.offset, entry.len, key.len())?;
            let (offset, len) = log.append_put(key, value)?;
            index.insert(key.to_vec(), offset, len);
        }

        *state = EngineState { index, log };
        Ok(())
    }

    /// Synchronous best-effort checkpoint for `Drop`.
    ///
    /// Skipped while another persist holds the checkpoint lock. On a
    /// multi-thread runtime the persist runs under `block_in_place` so the
    /// worker's other tasks move elsewhere; a current-thread runtime blocks.
    fn checkpoint_blocking(&self) -> Result<bool> {
        let manager = match &self.checkpoints {
            Some(manager) => manager,
            None => return Ok(false),
        };
        let _guard = match self.checkpoint_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("Checkpoint in flight at drop, skipping final checkpoint");
                return Ok(false);
            }
        };
        if !self.is_dirty() {
            return Ok(false);
        }

        let (generation, index, log) = self.snapshot()?;
        let persist = || {
            persist_snapshot(
                manager.as_ref(),
                generation,
                &index,
                &log,
                &self.checkpointed,
                &self.last_checkpoint,
            )
        };

        let multi_thread = Handle::try_current()
            .map(|handle| handle.runtime_flavor() == RuntimeFlavor::MultiThread)
            .unwrap_or(false);
        if multi_thread {
            tokio::task::block_in_place(persist)?;
        } else {
            persist()?;
        }
        Ok(true)
    }

    // =========================================================================
    // Disposal
    // =========================================================================

    /// Run the final checkpoint and reject further operations.
    ///
    /// Waits for an in-flight checkpoint instead of skipping. Failures are
    /// logged, never returned.
    pub async fn shutdown(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        if let Some(manager) = self.checkpoints.clone() {
            let guard = Arc::clone(&self.checkpoint_lock).lock_owned().await;
            match self.run_checkpoint(manager, guard).await {
                Ok(true) => info!("Final checkpoint written"),
                Ok(false) => debug!("Store clean at shutdown"),
                Err(e) => warn!(error = %e, "Final checkpoint failed"),
            }
        }

        self.closed.store(true, Ordering::SeqCst);
    }

    /// Final checkpoint, then release the engine
    pub async fn close(self) {
        self.shutdown().await;
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    // =========================================================================
    // Mutations (no await inside the state lock)
    // =========================================================================

    fn apply_put(&self, key: &[u8], stored: &[u8]) -> Result<()> {
        let mut state = self.state.write();
        let (offset, len) = state.log.append_put(key, stored)?;
        state.index.insert(key.to_vec(), offset, len);
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn apply_delete(&self, key: &[u8]) -> Result<bool> {
        let mut state = self.state.write();
        if !state.index.contains(key) {
            return Ok(false);
        }
        let (offset, len) = state.log.append_delete(key)?;
        state.index.remove(key, offset, len);
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    fn lookup(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let state = self.state.read();
        match state.index.get_live(key) {
            Some(entry) => Ok(Some(
                state.log.value(entry.offset, entry.len, key.len())?.to_vec(),
            )),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Whether mutations exist that no checkpoint covers
    pub fn is_dirty(&self) -> bool {
        self.generation.load(Ordering::SeqCst) > self.checkpointed.load(Ordering::SeqCst)
    }

    /// Whether the engine has a checkpoint manager
    pub fn is_durable(&self) -> bool {
        self.checkpoints.is_some()
    }

    /// Where checkpoints go, if anywhere
    pub fn checkpoint_location(&self) -> Option<String> {
        self.checkpoints.as_ref().map(|m| m.describe())
    }

    pub fn stats(&self) -> EngineStats {
        let state = self.state.read();
        let generation = self.generation.load(Ordering::SeqCst);
        let checkpointed = self.checkpointed.load(Ordering::SeqCst);
        let last_checkpoint = *self.last_checkpoint.lock();
        EngineStats {
            live_keys: state.index.live_count(),
            tombstones: state.index.tombstone_count(),
            log_bytes: state.log.len(),
            garbage_bytes: state.index.garbage_bytes(),
            generation,
            checkpointed_generation: checkpointed,
            dirty: generation > checkpointed,
            last_checkpoint: last_checkpoint.map(|t| t.generation()),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

#[async_trait]
impl KvStore for LogStore {
    fn value_codec(&self) -> ValueCodec {
        self.codec
    }

    async fn put_bytes(&self, key: &[u8], stored: Vec<u8>) -> Result<()> {
        self.ensure_open()?;
        self.apply_put(key, &stored)
    }

    async fn get_bytes(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        self.lookup(key)
    }

    async fn delete(&self, key: &[u8]) -> Result<bool> {
        self.ensure_open()?;
        self.apply_delete(key)
    }

    fn keys(&self) -> BoxStream<'_, Result<Vec<u8>>> {
        if let Err(e) = self.ensure_open() {
            return stream::once(async move { Err(e) }).boxed();
        }
        // Snapshot under the read lock; the guard must not live in the stream
        let snapshot: Vec<Vec<u8>> = self
            .state
            .read()
            .index
            .live_keys()
            .map(|k| k.to_vec())
            .collect();
        stream::iter(snapshot.into_iter().map(Ok)).boxed()
    }
}

/// Write one snapshot and record it as the newest checkpoint
fn persist_snapshot(
    manager: &dyn CheckpointManager,
    generation: u64,
    index: &IndexSnapshot,
    log: &LogSnapshot,
    checkpointed: &AtomicU64,
    last_checkpoint: &Mutex<Option<CheckpointToken>>,
) -> Result<CheckpointToken> {
    match manager.persist(index, log) {
        Ok(token) => {
            checkpointed.fetch_max(generation, Ordering::SeqCst);
            *last_checkpoint.lock() = Some(token);
            info!(
                %token,
                generation,
                live_keys = index.live_keys,
                log_bytes = log.len(),
                "Checkpoint complete"
            );
            Ok(token)
        }
        Err(e) => {
            warn!(error = %e, generation, "Checkpoint failed, store remains dirty");
            Err(e)
        }
    }
}

/// Dropping without `close` runs the final checkpoint synchronously on the
/// dropping thread. `close().await` is the non-blocking path.
impl Drop for LogStore {
    fn drop(&mut self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        match self.checkpoint_blocking() {
            Ok(true) => info!("Checkpoint written on drop"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Checkpoint on drop failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::KvStoreExt;

    fn volatile() -> LogStore {
        LogStore::volatile(ValueCodec::default())
    }

    #[tokio::test]
    async fn test_volatile_checkpoint_is_noop() {
        let store = volatile();
        store.write(b"k", b"v").await.unwrap();

        assert!(!store.take_checkpoint().await.unwrap());
        assert!(!store.is_durable());
    }

    #[tokio::test]
    async fn test_delete_of_missing_key_stays_clean() {
        let store = volatile();
        assert!(!store.delete(b"missing").await.unwrap());
        assert!(!store.is_dirty());
        assert_eq!(store.stats().log_bytes, 0);
    }

    #[tokio::test]
    async fn test_overwrite_then_delete() {
        let store = volatile();
        store.write(b"k", b"one").await.unwrap();
        store.write(b"k", b"two").await.unwrap();
        assert_eq!(store.read(b"k").await.unwrap(), Some(b"two".to_vec()));

        assert!(store.delete(b"k").await.unwrap());
        assert_eq!(store.read(b"k").await.unwrap(), None);

        let stats = store.stats();
        assert_eq!(stats.live_keys, 0);
        assert_eq!(stats.tombstones, 1);
        assert_eq!(stats.generation, 3);
    }

    #[tokio::test]
    async fn test_compaction_keeps_live_values() {
        let mut state = EngineState::default();
        for i in 0..10u8 {
            let (offset, len) = state.log.append_put(&[i], &[i; 8]).unwrap();
            state.index.insert(vec![i], offset, len);
        }
        for i in 0..5u8 {
            let (offset, len) = state.log.append_delete(&[i]).unwrap();
            state.index.remove(&[i], offset, len);
        }
        let before = state.log.len();

        LogStore::compact(&mut state).unwrap();

        assert!(state.log.len() < before);
        assert_eq!(state.index.garbage_bytes(), 0);
        assert_eq!(state.index.tombstone_count(), 0);
        assert_eq!(state.log.last_seq(), 5);
        for i in 5..10u8 {
            let entry = *state.index.get_live(&[i]).unwrap();
            assert_eq!(state.log.value(entry.offset, entry.len, 1).unwrap(), &[i; 8]);
        }
    }

    #[tokio::test]
    async fn test_closed_store_rejects_operations() {
        let store = volatile();
        store.shutdown().await;

        assert!(matches!(store.write(b"k", b"v").await, Err(StoreError::Closed)));
        assert!(matches!(store.take_checkpoint().await, Err(StoreError::Closed)));
        let keys: Vec<_> = store.keys().collect().await;
        assert!(matches!(keys.as_slice(), [Err(StoreError::Closed)]));
    }

    #[tokio::test]
    async fn test_typed_roundtrip_through_engine() {
        let store = volatile();
        store.write_typed(b"n", &vec![1u32, 2, 3]).await.unwrap();
        let back: Option<Vec<u32>> = store.read_typed(b"n").await.unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));
    }
}
