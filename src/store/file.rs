//! Flat-file backend
//!
//! One file per key under a directory. File names are the hex-encoded key
//! with a `.val` extension, so any byte key maps to a portable name.
//!
//! Hex names longer than one segment are split into nested directories so
//! no path component exceeds common file name limits:
//!
//! ```text
//!  key (200 bytes) ──► hex (400 chars)
//!  <dir>/<hex[0..128]>/<hex[128..256]>/<hex[256..384]>/<hex[384..400]>.val
//! ```
//!
//! Writes go to a temp file that is renamed over the target, so a reader
//! never observes a partially written value. Segment directories emptied by
//! deletes are left in place.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::codec::ValueCodec;
use crate::error::Result;

use super::KvStore;

const VALUE_SUFFIX: &str = ".val";
const TEMP_MARKER: &str = ".tmp-";

/// Hex characters per path component
const SEGMENT_LEN: usize = 128;

/// Backend storing each key in its own file
pub struct FileStore {
    dir: PathBuf,
    codec: ValueCodec,
    next_temp_id: AtomicU64,
}

impl FileStore {
    /// Open (or create) a file store rooted at `dir`.
    ///
    /// Temp files left behind by an interrupted write are removed.
    pub async fn open(dir: impl Into<PathBuf>, codec: ValueCodec) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;

        let mut removed = 0usize;
        let mut pending = vec![dir.clone()];
        while let Some(current) = pending.pop() {
            let mut entries = fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.contains(TEMP_MARKER) {
                    fs::remove_file(entry.path()).await?;
                    removed += 1;
                } else if is_segment(&name) && entry.file_type().await?.is_dir() {
                    pending.push(entry.path());
                }
            }
        }
        if removed > 0 {
            tracing::info!("Removed {} stale temp files from {:?}", removed, dir);
        }

        tracing::debug!("File store opened at {:?}", dir);
        Ok(Self {
            dir,
            codec,
            next_temp_id: AtomicU64::new(0),
        })
    }

    /// Directory holding the value files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Parent directory and file stem for `key`
    fn location(&self, key: &[u8]) -> (PathBuf, String) {
        let hex = encode_hex(key);
        let mut parent = self.dir.clone();
        let mut rest = hex.as_str();
        while rest.len() > SEGMENT_LEN {
            let (segment, tail) = rest.split_at(SEGMENT_LEN);
            parent.push(segment);
            rest = tail;
        }
        (parent, rest.to_string())
    }

    fn value_path(&self, key: &[u8]) -> PathBuf {
        let (parent, stem) = self.location(key);
        parent.join(format!("{}{}", stem, VALUE_SUFFIX))
    }
}

#[async_trait]
impl KvStore for FileStore {
    fn value_codec(&self) -> ValueCodec {
        self.codec
    }

    async fn put_bytes(&self, key: &[u8], stored: Vec<u8>) -> Result<()> {
        let (parent, stem) = self.location(key);
        if parent != self.dir {
            fs::create_dir_all(&parent).await?;
        }
        let target = parent.join(format!("{}{}", stem, VALUE_SUFFIX));
        let temp_id = self.next_temp_id.fetch_add(1, Ordering::Relaxed);
        let temp = parent.join(format!("{}{}{}", stem, TEMP_MARKER, temp_id));

        let written = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(&stored).await?;
            file.sync_all().await?;
            fs::rename(&temp, &target).await
        }
        .await;

        if let Err(e) = written {
            // Leave no temp file behind; the previous value stays intact
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn get_bytes(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match fs::read(self.value_path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &[u8]) -> Result<bool> {
        match fs::remove_file(self.value_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> BoxStream<'_, Result<Vec<u8>>> {
        /// Depth-first walk over the store and its segment directories
        struct Walk {
            /// Directories not yet opened, with the hex their path spells
            pending: Vec<(PathBuf, String)>,
            current: Option<(fs::ReadDir, String)>,
        }

        let walk = Walk {
            pending: vec![(self.dir.clone(), String::new())],
            current: None,
        };

        stream::unfold(Some(walk), |walk| async move {
            let mut walk = match walk {
                Some(walk) => walk,
                None => return None,
            };

            loop {
                let (mut entries, prefix) = match walk.current.take() {
                    Some(current) => current,
                    None => {
                        let (dir, prefix) = match walk.pending.pop() {
                            Some(next) => next,
                            None => return None,
                        };
                        match fs::read_dir(&dir).await {
                            Ok(entries) => (entries, prefix),
                            Err(e) => return Some((Err(e.into()), None)),
                        }
                    }
                };

                match entries.next_entry().await {
                    Ok(Some(entry)) => {
                        let name = entry.file_name().to_string_lossy().into_owned();
                        if let Some(stem) = name.strip_suffix(VALUE_SUFFIX) {
                            if let Some(key) = decode_hex(&format!("{}{}", prefix, stem)) {
                                walk.current = Some((entries, prefix));
                                return Some((Ok(key), Some(walk)));
                            }
                        } else if is_segment(&name) {
                            match entry.file_type().await {
                                Ok(kind) if kind.is_dir() => walk
                                    .pending
                                    .push((entry.path(), format!("{}{}", prefix, name))),
                                Ok(_) => {}
                                Err(e) => return Some((Err(e.into()), None)),
                            }
                        }
                        walk.current = Some((entries, prefix));
                    }
                    Ok(None) => {}
                    Err(e) => return Some((Err(e.into()), None)),
                }
            }
        })
        .boxed()
    }
}

// =============================================================================
// Private Helpers
// =============================================================================

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Whether `name` is a full-length segment directory name
fn is_segment(name: &str) -> bool {
    name.len() == SEGMENT_LEN && name.bytes().all(|b| b.is_ascii_hexdigit())
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        let key = b"Area1/Line\x00/\xff".to_vec();
        assert_eq!(decode_hex(&encode_hex(&key)), Some(key));
        assert_eq!(decode_hex(""), Some(Vec::new()));
        assert_eq!(decode_hex("abc"), None);
        assert_eq!(decode_hex("zz"), None);
    }

    #[tokio::test]
    async fn test_long_keys_split_into_segments() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FileStore::open(dir.path(), ValueCodec::raw()).await.unwrap();

        // 64 bytes fill exactly one segment and stay a flat file
        let (parent, stem) = store.location(&[0xab; 64]);
        assert_eq!(parent, dir.path());
        assert_eq!(stem.len(), SEGMENT_LEN);

        let (parent, stem) = store.location(&[0xab; 200]);
        assert_eq!(parent.strip_prefix(dir.path()).unwrap().components().count(), 3);
        assert_eq!(stem, "ab".repeat(8));
        assert!(is_segment(&"ab".repeat(64)));
        assert!(!is_segment("ab"));
    }
}
