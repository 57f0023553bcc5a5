//! Scoped store decorator
//!
//! Rewrites every key to `prefix + key` before delegating to the inner store.
//! The decorator borrows the inner store; the caller owns its lifetime.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};

use crate::codec::ValueCodec;
use crate::error::Result;

use super::KvStore;

/// A key-prefixing view over another store
pub struct ScopedStore<'a, S: KvStore + ?Sized> {
    inner: &'a S,
    prefix: Vec<u8>,
}

impl<'a, S: KvStore + ?Sized> ScopedStore<'a, S> {
    /// Create a scope over `inner`
    pub fn new(inner: &'a S, prefix: impl AsRef<[u8]>) -> Self {
        Self {
            inner,
            prefix: prefix.as_ref().to_vec(),
        }
    }

    /// Prefix applied by this scope
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// A sibling-level scope on the same inner store with `prefix` appended.
    ///
    /// Equivalent to nesting `create_scoped`, without the extra layer.
    pub fn nested(&self, prefix: impl AsRef<[u8]>) -> ScopedStore<'a, S> {
        let mut combined = self.prefix.clone();
        combined.extend_from_slice(prefix.as_ref());
        ScopedStore {
            inner: self.inner,
            prefix: combined,
        }
    }

    fn full_key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.prefix.len() + key.len());
        full.extend_from_slice(&self.prefix);
        full.extend_from_slice(key);
        full
    }
}

#[async_trait]
impl<'a, S: KvStore + ?Sized> KvStore for ScopedStore<'a, S> {
    fn value_codec(&self) -> ValueCodec {
        self.inner.value_codec()
    }

    async fn put_bytes(&self, key: &[u8], stored: Vec<u8>) -> Result<()> {
        self.inner.put_bytes(&self.full_key(key), stored).await
    }

    async fn get_bytes(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get_bytes(&self.full_key(key)).await
    }

    async fn delete(&self, key: &[u8]) -> Result<bool> {
        self.inner.delete(&self.full_key(key)).await
    }

    fn keys(&self) -> BoxStream<'_, Result<Vec<u8>>> {
        let prefix = self.prefix.as_slice();
        self.inner
            .keys()
            .filter_map(move |key| async move {
                match key {
                    Ok(k) => k.strip_prefix(prefix).map(|rest| Ok(rest.to_vec())),
                    Err(e) => Some(Err(e)),
                }
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KvStoreExt, MemoryStore};
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_scope_rewrites_keys() {
        let store = MemoryStore::new();
        let scope = store.create_scoped("tags:");

        scope.write(b"pump1", b"on").await.unwrap();

        assert_eq!(store.read(b"tags:pump1").await.unwrap(), Some(b"on".to_vec()));
        assert_eq!(scope.read(b"pump1").await.unwrap(), Some(b"on".to_vec()));
        assert_eq!(store.read(b"pump1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_keys_are_stripped_and_filtered() {
        let store = MemoryStore::new();
        store.write(b"a:1", b"x").await.unwrap();
        store.write(b"a:2", b"x").await.unwrap();
        store.write(b"b:1", b"x").await.unwrap();

        let scope = store.create_scoped("a:");
        let mut keys: Vec<Vec<u8>> = scope.keys().try_collect().await.unwrap();
        keys.sort();

        assert_eq!(keys, vec![b"1".to_vec(), b"2".to_vec()]);
    }

    #[tokio::test]
    async fn test_nested_matches_concatenated_prefix() {
        let store = MemoryStore::new();
        let outer = store.create_scoped("A:");
        let flat = outer.nested("B:");

        flat.write(b"x", b"v").await.unwrap();

        assert_eq!(flat.prefix(), b"A:B:");
        assert_eq!(store.read(b"A:B:x").await.unwrap(), Some(b"v".to_vec()));
        assert!(flat.delete(b"x").await.unwrap());
        assert_eq!(store.read(b"A:B:x").await.unwrap(), None);
    }
}
