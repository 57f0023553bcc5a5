//! In-memory backend
//!
//! Volatile map behind a RwLock. Every instance is isolated and starts empty.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;

use crate::codec::ValueCodec;
use crate::error::Result;

use super::KvStore;

/// Volatile reference backend. Keys enumerate in byte order.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    codec: ValueCodec,
}

impl MemoryStore {
    /// Create an empty store with the default codec
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with the given codec
    pub fn with_codec(codec: ValueCodec) -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            codec,
        }
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    fn value_codec(&self) -> ValueCodec {
        self.codec
    }

    async fn put_bytes(&self, key: &[u8], stored: Vec<u8>) -> Result<()> {
        self.data.write().insert(key.to_vec(), stored);
        Ok(())
    }

    async fn get_bytes(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn delete(&self, key: &[u8]) -> Result<bool> {
        Ok(self.data.write().remove(key).is_some())
    }

    fn keys(&self) -> BoxStream<'_, Result<Vec<u8>>> {
        // Snapshot under the read lock; the guard must not live in the stream
        let snapshot: Vec<Vec<u8>> = self.data.read().keys().cloned().collect();
        stream::iter(snapshot.into_iter().map(Ok)).boxed()
    }
}
