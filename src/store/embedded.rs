//! Embedded database backend
//!
//! A single sled database holding one tree of key/value pairs. Writes and
//! deletes are flushed before they return, so every completed call is durable.

use std::path::PathBuf;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::codec::ValueCodec;
use crate::error::{Result, StoreError};

use super::KvStore;

/// Name of the tree holding store entries
const VALUES_TREE: &str = "values";

/// sled-backed store. Keys enumerate in byte order.
pub struct EmbeddedStore {
    db: sled::Db,
    tree: sled::Tree,
    codec: ValueCodec,
}

impl EmbeddedStore {
    /// Open or create the database at `path`
    pub async fn open(path: impl Into<PathBuf>, codec: ValueCodec) -> Result<Self> {
        let path = path.into();
        let db_path = path.clone();

        let (db, tree) = tokio::task::spawn_blocking(move || -> Result<_> {
            std::fs::create_dir_all(&db_path)?;
            let db = sled::open(&db_path)?;
            let tree = db.open_tree(VALUES_TREE)?;
            Ok((db, tree))
        })
        .await??;

        tracing::debug!("Embedded store opened at {:?} ({} keys)", path, tree.len());
        Ok(Self {
            db,
            tree,
            codec,
        })
    }
}

#[async_trait]
impl KvStore for EmbeddedStore {
    fn value_codec(&self) -> ValueCodec {
        self.codec
    }

    async fn put_bytes(&self, key: &[u8], stored: Vec<u8>) -> Result<()> {
        self.tree.insert(key, stored)?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn get_bytes(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.tree.get(key)?.map(|v| v.to_vec()))
    }

    async fn delete(&self, key: &[u8]) -> Result<bool> {
        let existed = self.tree.remove(key)?.is_some();
        if existed {
            self.db.flush_async().await?;
        }
        Ok(existed)
    }

    fn keys(&self) -> BoxStream<'_, Result<Vec<u8>>> {
        stream::iter(
            self.tree
                .iter()
                .keys()
                .map(|key| key.map(|k| k.to_vec()).map_err(StoreError::from)),
        )
        .boxed()
    }
}
