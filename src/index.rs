//! Key Index Module
//!
//! In-memory map from key to the location of its latest log frame.
//!
//! ## Responsibilities
//! - Point lookups into the log for reads
//! - Tombstones for deleted keys (kept until the log is compacted)
//! - Garbage accounting: bytes in the log no longer reachable from a live key
//! - Ordered iteration for key enumeration and compaction
//!
//! The index is not synchronized on its own; the engine guards it together
//! with the log so that both always change in one critical section.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::log::{RecordKind, RecordView};

/// Location of a key's latest frame in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Log offset of the frame
    pub offset: u64,

    /// Frame length in bytes
    pub len: u32,

    /// True when the latest frame is a delete
    pub tombstone: bool,
}

/// Ordered key index with tombstones
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KeyIndex {
    entries: BTreeMap<Vec<u8>, IndexEntry>,
    live: usize,
    garbage_bytes: u64,
}

impl KeyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest location for `key`, tombstones included
    pub fn get(&self, key: &[u8]) -> Option<&IndexEntry> {
        self.entries.get(key)
    }

    /// Location of the live value for `key`
    pub fn get_live(&self, key: &[u8]) -> Option<&IndexEntry> {
        self.entries.get(key).filter(|e| !e.tombstone)
    }

    /// Point `key` at a new put frame
    pub fn insert(&mut self, key: Vec<u8>, offset: u64, len: u32) {
        let entry = IndexEntry {
            offset,
            len,
            tombstone: false,
        };
        match self.entries.insert(key, entry) {
            Some(prev) if !prev.tombstone => self.garbage_bytes += prev.len as u64,
            // A replaced tombstone was already counted as garbage
            _ => self.live += 1,
        }
    }

    /// Point `key` at a delete frame. Both frames become garbage.
    ///
    /// Returns false (and changes nothing) when the key has no live value.
    pub fn remove(&mut self, key: &[u8], offset: u64, len: u32) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) if !entry.tombstone => {
                self.garbage_bytes += entry.len as u64 + len as u64;
                *entry = IndexEntry {
                    offset,
                    len,
                    tombstone: true,
                };
                self.live -= 1;
                true
            }
            _ => false,
        }
    }

    /// Apply a replayed frame
    pub fn apply(&mut self, record: &RecordView<'_>) {
        match record.kind {
            RecordKind::Put => self.insert(record.key.to_vec(), record.offset, record.frame_len),
            RecordKind::Delete => {
                if !self.remove(record.key, record.offset, record.frame_len) {
                    // A delete with nothing live is still unreachable log space
                    self.entries.insert(
                        record.key.to_vec(),
                        IndexEntry {
                            offset: record.offset,
                            len: record.frame_len,
                            tombstone: true,
                        },
                    );
                    self.garbage_bytes += record.frame_len as u64;
                }
            }
        }
    }

    /// Whether `key` has a live value
    pub fn contains(&self, key: &[u8]) -> bool {
        self.get_live(key).is_some()
    }

    /// Number of live keys
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Number of tombstones
    pub fn tombstone_count(&self) -> usize {
        self.entries.len() - self.live
    }

    /// Log bytes not reachable from a live key
    pub fn garbage_bytes(&self) -> u64 {
        self.garbage_bytes
    }

    /// Live keys in byte order
    pub fn live_keys(&self) -> impl Iterator<Item = &[u8]> {
        self.entries
            .iter()
            .filter(|(_, e)| !e.tombstone)
            .map(|(k, _)| k.as_slice())
    }

    /// Live entries in byte order
    pub fn live_entries(&self) -> impl Iterator<Item = (&[u8], &IndexEntry)> {
        self.entries
            .iter()
            .filter(|(_, e)| !e.tombstone)
            .map(|(k, e)| (k.as_slice(), e))
    }

    /// All entries, tombstones included
    pub fn entries(&self) -> &BTreeMap<Vec<u8>, IndexEntry> {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let mut index = KeyIndex::new();
        index.insert(b"a".to_vec(), 0, 30);

        assert_eq!(index.get_live(b"a").map(|e| e.offset), Some(0));
        assert_eq!(index.live_count(), 1);
        assert_eq!(index.garbage_bytes(), 0);
    }

    #[test]
    fn test_overwrite_counts_old_frame_as_garbage() {
        let mut index = KeyIndex::new();
        index.insert(b"a".to_vec(), 0, 30);
        index.insert(b"a".to_vec(), 30, 40);

        assert_eq!(index.live_count(), 1);
        assert_eq!(index.garbage_bytes(), 30);
        assert_eq!(index.get_live(b"a").map(|e| e.offset), Some(30));
    }

    #[test]
    fn test_remove_leaves_tombstone() {
        let mut index = KeyIndex::new();
        index.insert(b"a".to_vec(), 0, 30);

        assert!(index.remove(b"a", 30, 22));
        assert!(!index.contains(b"a"));
        assert!(index.get(b"a").unwrap().tombstone);
        assert_eq!(index.live_count(), 0);
        assert_eq!(index.tombstone_count(), 1);
        assert_eq!(index.garbage_bytes(), 52);
    }

    #[test]
    fn test_remove_missing_or_deleted_is_noop() {
        let mut index = KeyIndex::new();
        assert!(!index.remove(b"a", 0, 22));

        index.insert(b"a".to_vec(), 0, 30);
        assert!(index.remove(b"a", 30, 22));
        assert!(!index.remove(b"a", 52, 22));
        assert_eq!(index.get(b"a").unwrap().offset, 30);
    }

    #[test]
    fn test_put_after_delete_revives_key() {
        let mut index = KeyIndex::new();
        index.insert(b"a".to_vec(), 0, 30);
        index.remove(b"a", 30, 22);
        index.insert(b"a".to_vec(), 52, 30);

        assert!(index.contains(b"a"));
        assert_eq!(index.live_count(), 1);
        assert_eq!(index.tombstone_count(), 0);
        assert_eq!(index.garbage_bytes(), 52);
    }

    #[test]
    fn test_live_keys_are_ordered_and_skip_tombstones() {
        let mut index = KeyIndex::new();
        index.insert(b"c".to_vec(), 0, 10);
        index.insert(b"a".to_vec(), 10, 10);
        index.insert(b"b".to_vec(), 20, 10);
        index.remove(b"b", 30, 10);

        let keys: Vec<&[u8]> = index.live_keys().collect();
        assert_eq!(keys, vec![&b"a"[..], &b"c"[..]]);
    }
}
