//! Store Module
//!
//! The key-value contract every backend satisfies, plus the composition
//! primitives built on top of it.
//!
//! ## Responsibilities
//! - `KvStore`: byte-oriented write/read/delete/keys, safe for concurrent callers
//! - `KvStoreExt`: typed records and scoped stores for any backend
//! - `ScopedStore`: transparent key prefixing
//! - Backends: `MemoryStore`, `FileStore`, `EmbeddedStore` (and the log
//!   engine in `crate::engine`)
//!
//! ## Value Path
//! ```text
//!  write_typed ──► JSON ──► write ──► ValueCodec ──► put_bytes ──► backend
//!  read_typed  ◄── JSON ◄── read  ◄── ValueCodec ◄── get_bytes ◄── backend
//! ```

mod embedded;
mod file;
mod memory;
mod scoped;
mod status;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{decode_typed, encode_typed, ValueCodec};
use crate::config::{BackendKind, StoreConfig};
use crate::engine::LogStore;
use crate::error::{Result, StoreError};

pub use embedded::EmbeddedStore;
pub use file::FileStore;
pub use memory::MemoryStore;
pub use scoped::ScopedStore;
pub use status::{ReadOutcome, Status};

/// The byte-oriented key-value contract.
///
/// Backends implement the storage primitives (`put_bytes`, `get_bytes`,
/// `delete`, `keys`) and report their `ValueCodec`. The caller-facing
/// `write`/`read` apply the codec on top.
///
/// Every completed `write`/`delete` is visible to any `read` that starts
/// after it returns.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Codec applied to values by `write`/`read`
    fn value_codec(&self) -> ValueCodec;

    /// Store already-encoded bytes under `key`, replacing any previous value
    async fn put_bytes(&self, key: &[u8], stored: Vec<u8>) -> Result<()>;

    /// Fetch the stored bytes for `key`
    async fn get_bytes(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Remove `key`, returning whether a value existed
    async fn delete(&self, key: &[u8]) -> Result<bool>;

    /// Lazily enumerate live keys. Each call starts a fresh enumeration.
    fn keys(&self) -> BoxStream<'_, Result<Vec<u8>>>;

    /// Store `value` under `key`
    async fn write(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let stored = self.value_codec().encode(value)?;
        self.put_bytes(key, stored).await
    }

    /// Read the most recent value for `key`
    async fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.get_bytes(key).await? {
            Some(stored) => Ok(Some(self.value_codec().decode(stored)?)),
            None => Ok(None),
        }
    }

    /// Check whether `key` currently holds a value
    async fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get_bytes(key).await?.is_some())
    }

    /// `write` reported as a status code
    async fn write_status(&self, key: &[u8], value: &[u8]) -> Status {
        let result = self.write(key, value).await;
        if let Err(e) = &result {
            tracing::debug!("write failed: {}", e);
        }
        Status::from_write(&result)
    }

    /// `read` reported as a status code plus value
    async fn read_status(&self, key: &[u8]) -> ReadOutcome {
        ReadOutcome::from(self.read(key).await)
    }

    /// Keys decoded as UTF-8 (lossy)
    fn keys_str(&self) -> BoxStream<'_, Result<String>> {
        self.keys()
            .map(|key| key.map(|k| String::from_utf8_lossy(&k).into_owned()))
            .boxed()
    }
}

/// Typed and scoped conveniences, available on every store
#[async_trait]
pub trait KvStoreExt: KvStore {
    /// Encode `record` and write it under `key`
    async fn write_typed<T>(&self, key: &[u8], record: &T) -> Result<()>
    where
        T: Serialize + Sync,
    {
        let bytes = encode_typed(record)?;
        self.write(key, &bytes).await
    }

    /// Read and decode the record under `key`
    async fn read_typed<T>(&self, key: &[u8]) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.read(key).await? {
            Some(bytes) => Ok(Some(decode_typed(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Read a record, substituting `T::default()` only for a missing key
    async fn read_typed_or_default<T>(&self, key: &[u8]) -> Result<T>
    where
        T: DeserializeOwned + Default + Send,
    {
        Ok(self.read_typed(key).await?.unwrap_or_default())
    }

    /// Wrap this store so every key is prefixed with `prefix`
    fn create_scoped(&self, prefix: impl AsRef<[u8]> + Send) -> ScopedStore<'_, Self> {
        ScopedStore::new(self, prefix)
    }
}

#[async_trait]
impl<S: KvStore + ?Sized> KvStoreExt for S {}

/// Open the backend selected by `config.backend`
pub async fn open(config: StoreConfig) -> Result<Arc<dyn KvStore>> {
    let codec = ValueCodec::new(config.compression_level, config.enable_raw_writes);
    tracing::debug!("Opening {:?} store", config.backend);

    match config.backend {
        BackendKind::Memory => Ok(Arc::new(MemoryStore::with_codec(codec))),
        BackendKind::File => {
            let dir = config.storage_location.clone().ok_or_else(|| {
                StoreError::Config("file backend requires a storage location".to_string())
            })?;
            Ok(Arc::new(FileStore::open(dir, codec).await?))
        }
        BackendKind::Embedded => {
            let path = config.storage_location.clone().ok_or_else(|| {
                StoreError::Config("embedded backend requires a storage location".to_string())
            })?;
            Ok(Arc::new(EmbeddedStore::open(path, codec).await?))
        }
        BackendKind::Log => Ok(Arc::new(LogStore::open(config).await?)),
    }
}
