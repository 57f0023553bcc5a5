//! Local Checkpoint Manager
//!
//! Stores checkpoint generations as directories under one local path.
//!
//! ## Layout
//! ```text
//! {dir}/
//!   CURRENT                      "ckpt-00000000000000000007\n"
//!   ckpt-00000000000000000007/
//!     meta.json                  CheckpointMetadata (lengths + CRCs)
//!     index.bin                  bincode IndexImage
//!     log.bin                    raw log frames
//!   .tmp-ckpt-00000000000000000008/   in-flight write, never loaded
//! ```
//!
//! ## Persist Protocol
//! 1. Write all three files into `.tmp-ckpt-N/` and fsync them
//! 2. Rename the temp directory to `ckpt-N/`
//! 3. Write `CURRENT.tmp`, fsync, rename over `CURRENT`
//! 4. Prune generations beyond the retention count
//!
//! A crash before step 3 leaves `CURRENT` pointing at the previous
//! generation; leftover temp directories are removed on open.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::log::LogSnapshot;

use super::{
    CheckpointManager, CheckpointManagerFactory, CheckpointMetadata, CheckpointToken,
    IndexSnapshot, LoadedCheckpoint, FORMAT_VERSION,
};

const CURRENT_FILE: &str = "CURRENT";
const META_FILE: &str = "meta.json";
const INDEX_FILE: &str = "index.bin";
const LOG_FILE: &str = "log.bin";
const GENERATION_PREFIX: &str = "ckpt-";
const TEMP_PREFIX: &str = ".tmp-ckpt-";

/// Checkpoint manager backed by a local directory
///
/// ## Concurrency:
/// - `next_generation`: Mutex held for the whole persist, so generations
///   are written one at a time and in order
/// - `load_latest` only reads and needs no lock
pub struct LocalCheckpointManager {
    dir: PathBuf,
    retained: usize,
    next_generation: Mutex<u64>,
}

impl LocalCheckpointManager {
    /// Open or create the checkpoint directory
    ///
    /// On startup:
    /// 1. Create the directory if it doesn't exist
    /// 2. Remove temp directories left by interrupted persists
    /// 3. Next generation = highest existing + 1
    pub fn open(dir: impl AsRef<Path>, retained: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_temp = path
                .file_name()
                .map(|n| n.to_string_lossy().starts_with(TEMP_PREFIX))
                .unwrap_or(false);
            if is_temp {
                warn!(path = %path.display(), "Removing interrupted checkpoint");
                fs::remove_dir_all(&path)?;
            }
        }

        let highest = Self::generations_in(&dir)?.last().copied().unwrap_or(0);
        debug!(dir = %dir.display(), highest, "Opened checkpoint directory");

        Ok(Self {
            dir,
            retained: retained.max(1),
            next_generation: Mutex::new(highest + 1),
        })
    }

    /// A factory that opens a manager on `dir` each time it is called
    pub fn factory(dir: PathBuf, retained: usize) -> CheckpointManagerFactory {
        Arc::new(move || {
            let manager = LocalCheckpointManager::open(&dir, retained)?;
            Ok(Box::new(manager) as Box<dyn CheckpointManager>)
        })
    }

    /// The checkpoint directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Generations present on disk, oldest first
    pub fn generations(&self) -> Result<Vec<u64>> {
        Self::generations_in(&self.dir)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn generations_in(dir: &Path) -> Result<Vec<u64>> {
        let mut generations = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(generation) = Self::parse_generation(&entry.file_name().to_string_lossy()) {
                generations.push(generation);
            }
        }
        generations.sort_unstable();
        Ok(generations)
    }

    /// "ckpt-00000000000000000042" → Some(42)
    fn parse_generation(name: &str) -> Option<u64> {
        name.strip_prefix(GENERATION_PREFIX)?.parse().ok()
    }

    fn generation_name(generation: u64) -> String {
        format!("{}{:020}", GENERATION_PREFIX, generation)
    }

    fn generation_dir(&self, generation: u64) -> PathBuf {
        self.dir.join(Self::generation_name(generation))
    }

    fn write_generation(
        &self,
        generation: u64,
        index: &IndexSnapshot,
        log: &LogSnapshot,
    ) -> Result<()> {
        let temp = self
            .dir
            .join(format!("{}{:020}", TEMP_PREFIX, generation));
        if temp.exists() {
            fs::remove_dir_all(&temp)?;
        }
        fs::create_dir(&temp)?;

        let result = self.fill_generation(&temp, generation, index, log);
        if let Err(e) = result {
            let _ = fs::remove_dir_all(&temp);
            return Err(e);
        }

        fs::rename(&temp, self.generation_dir(generation))?;
        sync_dir(&self.dir)?;

        self.write_current(generation)
    }

    fn fill_generation(
        &self,
        temp: &Path,
        generation: u64,
        index: &IndexSnapshot,
        log: &LogSnapshot,
    ) -> Result<()> {
        write_synced(&temp.join(INDEX_FILE), &[&index.data[..]])?;

        let segments: Vec<&[u8]> = log.segments().iter().map(|s| &s[..]).collect();
        write_synced(&temp.join(LOG_FILE), &segments)?;

        let metadata = CheckpointMetadata {
            format_version: FORMAT_VERSION,
            generation,
            created_at_ms: now_ms(),
            last_seq: index.last_seq,
            live_keys: index.live_keys,
            index_len: index.data.len() as u64,
            index_crc: index.crc(),
            log_len: log.len(),
            log_crc: log.crc(),
            dirty: false,
        };
        let meta = serde_json::to_vec_pretty(&metadata)
            .map_err(|e| StoreError::Serialization(format!("Failed to encode metadata: {}", e)))?;
        write_synced(&temp.join(META_FILE), &[&meta[..]])?;

        sync_dir(temp)
    }

    fn write_current(&self, generation: u64) -> Result<()> {
        let tmp = self.dir.join(format!("{}.tmp", CURRENT_FILE));
        let line = format!("{}\n", Self::generation_name(generation));
        write_synced(&tmp, &[line.as_bytes()])?;
        fs::rename(&tmp, self.dir.join(CURRENT_FILE))?;
        sync_dir(&self.dir)
    }

    /// Remove generations older than the newest `retained`
    fn prune(&self) -> Result<()> {
        let generations = self.generations()?;
        let excess = generations.len().saturating_sub(self.retained);
        for generation in &generations[..excess] {
            debug!(generation, "Pruning checkpoint");
            fs::remove_dir_all(self.generation_dir(*generation))?;
        }
        Ok(())
    }

    /// Generation named by CURRENT, falling back to the newest directory
    fn latest_generation(&self) -> Result<Option<u64>> {
        match fs::read_to_string(self.dir.join(CURRENT_FILE)) {
            Ok(contents) => {
                let name = contents.trim();
                Self::parse_generation(name).map(Some).ok_or_else(|| {
                    StoreError::Recovery(format!("CURRENT names invalid checkpoint {:?}", name))
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(self.generations()?.last().copied())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn load_generation(&self, generation: u64) -> Result<LoadedCheckpoint> {
        let dir = self.generation_dir(generation);
        let read = |name: &str| {
            fs::read(dir.join(name)).map_err(|e| {
                StoreError::Recovery(format!(
                    "Cannot read {} of checkpoint {}: {}",
                    name, generation, e
                ))
            })
        };

        let meta = read(META_FILE)?;
        let metadata: CheckpointMetadata = serde_json::from_slice(&meta).map_err(|e| {
            StoreError::Recovery(format!("Invalid metadata in checkpoint {}: {}", generation, e))
        })?;

        if metadata.format_version != FORMAT_VERSION {
            return Err(StoreError::Recovery(format!(
                "Checkpoint {} has unsupported format version {}",
                generation, metadata.format_version
            )));
        }
        if metadata.generation != generation {
            return Err(StoreError::Recovery(format!(
                "Checkpoint directory {} holds generation {}",
                generation, metadata.generation
            )));
        }

        let index_data = read(INDEX_FILE)?;
        check_artifact(
            generation,
            INDEX_FILE,
            &index_data,
            metadata.index_len,
            metadata.index_crc,
        )?;

        let log_data = read(LOG_FILE)?;
        check_artifact(
            generation,
            LOG_FILE,
            &log_data,
            metadata.log_len,
            metadata.log_crc,
        )?;

        Ok(LoadedCheckpoint {
            token: CheckpointToken::new(generation),
            index: IndexSnapshot {
                last_seq: metadata.last_seq,
                live_keys: metadata.live_keys,
                data: index_data,
            },
            log: LogSnapshot::from_bytes(Bytes::from(log_data)),
            metadata,
        })
    }
}

impl CheckpointManager for LocalCheckpointManager {
    fn persist(&self, index: &IndexSnapshot, log: &LogSnapshot) -> Result<CheckpointToken> {
        let mut next = self.next_generation.lock();
        let generation = *next;
        // A failed attempt burns its number; leftovers are pruned later
        *next = generation + 1;

        self.write_generation(generation, index, log)?;

        info!(
            generation,
            live_keys = index.live_keys,
            log_bytes = log.len(),
            "Checkpoint persisted"
        );

        // The new generation is already current; stale ones only cost space
        if let Err(e) = self.prune() {
            warn!(error = %e, "Failed to prune old checkpoints");
        }

        Ok(CheckpointToken::new(generation))
    }

    fn load_latest(&self) -> Result<Option<LoadedCheckpoint>> {
        match self.latest_generation()? {
            Some(generation) => self.load_generation(generation).map(Some),
            None => Ok(None),
        }
    }

    fn describe(&self) -> String {
        format!("local:{}", self.dir.display())
    }
}

fn check_artifact(generation: u64, name: &str, data: &[u8], len: u64, crc: u32) -> Result<()> {
    if data.len() as u64 != len {
        return Err(StoreError::Recovery(format!(
            "{} of checkpoint {} is {} bytes, expected {}",
            name,
            generation,
            data.len(),
            len
        )));
    }
    if crc32fast::hash(data) != crc {
        return Err(StoreError::Recovery(format!(
            "{} of checkpoint {} failed CRC check",
            name, generation
        )));
    }
    Ok(())
}

fn write_synced(path: &Path, parts: &[&[u8]]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for part in parts {
        writer.write_all(part)?;
    }
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
