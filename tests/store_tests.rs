//! Tests for the store contract
//!
//! These tests verify, on every backend:
//! - Write/read round trips at every compression level
//! - Deletes remove values from reads and enumeration
//! - Key enumeration completeness
//! - Scoped stores prefix keys and compose by concatenation
//! - Typed records surface CorruptValue instead of defaults
//! - Raw mode and the status-shaped API
//! - Keys too long for a single file name
//! - Parallel writers to distinct keys lose nothing

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use adapterkv::{
    BackendKind, CompressionLevel, FileStore, KvStore, KvStoreExt, MemoryStore, Status,
    StoreConfig, StoreError, ValueCodec,
};

// =============================================================================
// Helper Functions
// =============================================================================

const ALL_BACKENDS: [BackendKind; 4] = [
    BackendKind::Memory,
    BackendKind::File,
    BackendKind::Embedded,
    BackendKind::Log,
];

async fn open_backend(
    kind: BackendKind,
    level: CompressionLevel,
    dir: &TempDir,
) -> Arc<dyn KvStore> {
    let config = StoreConfig::builder()
        .backend(kind)
        .compression_level(level)
        .storage_location(dir.path().join("store"))
        .build();
    adapterkv::open(config).await.unwrap()
}

async fn collect_keys<S: KvStore + ?Sized>(store: &S) -> BTreeSet<Vec<u8>> {
    store
        .keys()
        .map(|key| key.unwrap())
        .collect::<BTreeSet<_>>()
        .await
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
struct TagRecord {
    name: String,
    address: u32,
    scale: f64,
}

// =============================================================================
// Round Trip Tests
// =============================================================================

#[tokio::test]
async fn test_round_trip_every_backend_and_level() {
    let values: [&[u8]; 4] = [
        b"",
        b"21.5",
        &[0x00, 0x01, 0xff, 0x10],
        &[b'a'; 10_000],
    ];

    for kind in ALL_BACKENDS {
        for level in CompressionLevel::all() {
            let dir = TempDir::new().unwrap();
            let store = open_backend(kind, level, &dir).await;

            for (i, value) in values.iter().enumerate() {
                let key = format!("key-{}", i);
                store.write(key.as_bytes(), value).await.unwrap();
                assert_eq!(
                    store.read(key.as_bytes()).await.unwrap().as_deref(),
                    Some(*value),
                    "{:?} at {}",
                    kind,
                    level
                );
            }
        }
    }
}

#[tokio::test]
async fn test_overwrite_returns_latest_value() {
    for kind in ALL_BACKENDS {
        let dir = TempDir::new().unwrap();
        let store = open_backend(kind, CompressionLevel::Fastest, &dir).await;

        store.write(b"k", b"first").await.unwrap();
        store.write(b"k", b"second").await.unwrap();

        assert_eq!(store.read(b"k").await.unwrap(), Some(b"second".to_vec()), "{:?}", kind);
    }
}

#[tokio::test]
async fn test_compression_shrinks_stored_bytes() {
    let store = MemoryStore::with_codec(ValueCodec::new(CompressionLevel::Optimal, false));
    let value = b"sensor=21.5;".repeat(200);

    store.write(b"k", &value).await.unwrap();

    let stored = store.get_bytes(b"k").await.unwrap().unwrap();
    assert!(stored.len() < value.len() / 4);
    assert_eq!(store.read(b"k").await.unwrap(), Some(value));
}

// =============================================================================
// Delete and Enumeration Tests
// =============================================================================

#[tokio::test]
async fn test_delete_removes_value_and_key() {
    for kind in ALL_BACKENDS {
        let dir = TempDir::new().unwrap();
        let store = open_backend(kind, CompressionLevel::None, &dir).await;

        store.write(b"keep", b"1").await.unwrap();
        store.write(b"drop", b"2").await.unwrap();

        assert!(store.delete(b"drop").await.unwrap(), "{:?}", kind);
        assert!(!store.delete(b"drop").await.unwrap(), "{:?}", kind);
        assert!(!store.delete(b"never").await.unwrap(), "{:?}", kind);

        assert_eq!(store.read(b"drop").await.unwrap(), None);
        assert!(!store.contains(b"drop").await.unwrap());
        assert!(store.contains(b"keep").await.unwrap());

        let keys = collect_keys(store.as_ref()).await;
        assert_eq!(keys, BTreeSet::from([b"keep".to_vec()]), "{:?}", kind);
    }
}

#[tokio::test]
async fn test_keys_enumerates_every_written_key() {
    for kind in ALL_BACKENDS {
        let dir = TempDir::new().unwrap();
        let store = open_backend(kind, CompressionLevel::None, &dir).await;

        let mut expected = BTreeSet::new();
        for i in 0..50 {
            let key = format!("tag/{:03}", i).into_bytes();
            store.write(&key, b"v").await.unwrap();
            expected.insert(key);
        }

        assert_eq!(collect_keys(store.as_ref()).await, expected, "{:?}", kind);
        // Restartable: a second enumeration sees the same set
        assert_eq!(collect_keys(store.as_ref()).await, expected, "{:?}", kind);
    }
}

#[tokio::test]
async fn test_keys_str_decodes_keys() {
    let store = MemoryStore::new();
    store.write("motor/speed".as_bytes(), b"1").await.unwrap();

    let keys: Vec<String> = store.keys_str().map(|k| k.unwrap()).collect().await;
    assert_eq!(keys, vec!["motor/speed".to_string()]);
}

// =============================================================================
// Scoped Store Tests
// =============================================================================

#[tokio::test]
async fn test_nested_scopes_compose() {
    for kind in ALL_BACKENDS {
        let dir = TempDir::new().unwrap();
        let store = open_backend(kind, CompressionLevel::None, &dir).await;

        let outer = store.create_scoped("A:");
        let inner = outer.create_scoped("B:");
        inner.write(b"x", b"value").await.unwrap();

        assert_eq!(inner.read(b"x").await.unwrap(), Some(b"value".to_vec()));
        assert_eq!(outer.read(b"B:x").await.unwrap(), Some(b"value".to_vec()));
        assert_eq!(store.read(b"A:B:x").await.unwrap(), Some(b"value".to_vec()), "{:?}", kind);

        // Nesting behaves like the concatenated prefix
        let flat = store.create_scoped("A:B:");
        assert_eq!(flat.read(b"x").await.unwrap(), Some(b"value".to_vec()));
        assert_eq!(outer.nested("B:").prefix(), b"A:B:");
    }
}

#[tokio::test]
async fn test_scoped_keys_are_filtered_and_stripped() {
    let store = MemoryStore::new();
    store.write(b"plant1/temp", b"1").await.unwrap();
    store.write(b"plant1/flow", b"2").await.unwrap();
    store.write(b"plant2/temp", b"3").await.unwrap();

    let plant1 = store.create_scoped("plant1/");
    let keys = collect_keys(&plant1).await;

    assert_eq!(
        keys,
        BTreeSet::from([b"flow".to_vec(), b"temp".to_vec()])
    );
}

#[tokio::test]
async fn test_scoped_delete_only_touches_scope() {
    let store = MemoryStore::new();
    store.write(b"a:k", b"1").await.unwrap();
    store.write(b"b:k", b"2").await.unwrap();

    let scope = store.create_scoped("a:");
    assert!(scope.delete(b"k").await.unwrap());

    assert_eq!(store.read(b"a:k").await.unwrap(), None);
    assert_eq!(store.read(b"b:k").await.unwrap(), Some(b"2".to_vec()));
}

// =============================================================================
// Typed Value Tests
// =============================================================================

#[tokio::test]
async fn test_typed_round_trip_on_every_backend() {
    let record = TagRecord {
        name: "boiler.pressure".to_string(),
        address: 40001,
        scale: 0.1,
    };

    for kind in ALL_BACKENDS {
        let dir = TempDir::new().unwrap();
        let store = open_backend(kind, CompressionLevel::Fastest, &dir).await;

        store.write_typed(b"tag", &record).await.unwrap();
        let back: Option<TagRecord> = store.read_typed(b"tag").await.unwrap();
        assert_eq!(back, Some(record.clone()), "{:?}", kind);
    }
}

#[tokio::test]
async fn test_typed_read_of_garbage_is_corrupt_value() {
    let store = MemoryStore::new();
    store.write(b"tag", b"not json at all").await.unwrap();

    let result = store.read_typed::<TagRecord>(b"tag").await;
    assert!(matches!(result, Err(StoreError::CorruptValue(_))));
}

#[tokio::test]
async fn test_typed_read_of_empty_value_is_corrupt_value() {
    let store = MemoryStore::new();
    store.write(b"tag", b"").await.unwrap();

    let result = store.read_typed::<TagRecord>(b"tag").await;
    assert!(matches!(result, Err(StoreError::CorruptValue(_))));
}

#[tokio::test]
async fn test_read_typed_or_default_only_defaults_missing_keys() {
    let store = MemoryStore::new();

    let missing: TagRecord = store.read_typed_or_default(b"missing").await.unwrap();
    assert_eq!(missing, TagRecord::default());

    store.write(b"bad", b"{").await.unwrap();
    let result = store.read_typed_or_default::<TagRecord>(b"bad").await;
    assert!(matches!(result, Err(StoreError::CorruptValue(_))));
}

// =============================================================================
// Raw Mode Tests
// =============================================================================

#[tokio::test]
async fn test_raw_mode_stores_bytes_verbatim() {
    let store = MemoryStore::with_codec(ValueCodec::raw());
    let value = [0x01, 0x02, 0x03];

    store.write(b"k", &value).await.unwrap();

    assert_eq!(store.get_bytes(b"k").await.unwrap(), Some(value.to_vec()));
    assert_eq!(store.read(b"k").await.unwrap(), Some(value.to_vec()));
}

#[tokio::test]
async fn test_codec_reader_accepts_untagged_raw_bytes() {
    let dir = TempDir::new().unwrap();
    {
        let raw = FileStore::open(dir.path(), ValueCodec::raw()).await.unwrap();
        raw.write(b"k", b"plain payload").await.unwrap();
    }

    let codec = ValueCodec::new(CompressionLevel::Optimal, false);
    let store = FileStore::open(dir.path(), codec).await.unwrap();
    assert_eq!(store.read(b"k").await.unwrap(), Some(b"plain payload".to_vec()));
}

#[tokio::test]
async fn test_raw_writes_through_config() {
    let config = StoreConfig::builder()
        .backend(BackendKind::Log)
        .enable_raw_writes(true)
        .compression_level(CompressionLevel::Optimal)
        .build();
    let store = adapterkv::open(config).await.unwrap();

    store.write(b"k", b"abc").await.unwrap();
    assert_eq!(store.get_bytes(b"k").await.unwrap(), Some(b"abc".to_vec()));
}

// =============================================================================
// Status API Tests
// =============================================================================

#[tokio::test]
async fn test_status_shaped_operations() {
    let store = MemoryStore::new();

    assert_eq!(store.write_status(b"k", b"v").await, Status::Ok);

    let found = store.read_status(b"k").await;
    assert_eq!(found.status, Status::Ok);
    assert_eq!(found.value, Some(b"v".to_vec()));

    let missing = store.read_status(b"missing").await;
    assert_eq!(missing.status, Status::NotFound);
    assert!(missing.value.is_none());
}

#[tokio::test]
async fn test_status_reports_error_for_undecodable_value() {
    let store = MemoryStore::new();
    // A zstd tag followed by garbage cannot be decompressed
    store.put_bytes(b"k", vec![0x01, 0xde, 0xad]).await.unwrap();

    let outcome = store.read_status(b"k").await;
    assert_eq!(outcome.status, Status::Error);
    assert!(outcome.error.is_some());
}

// =============================================================================
// Construction Tests
// =============================================================================

#[tokio::test]
async fn test_disk_backends_require_location() {
    for kind in [BackendKind::File, BackendKind::Embedded] {
        let config = StoreConfig::builder().backend(kind).build();
        let result = adapterkv::open(config).await;
        assert!(matches!(result, Err(StoreError::Config(_))), "{:?}", kind);
    }
}

#[tokio::test]
async fn test_file_store_persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = FileStore::open(dir.path(), ValueCodec::default()).await.unwrap();
        store.write(b"k", b"durable").await.unwrap();
        store.write(b"gone", b"x").await.unwrap();
        store.delete(b"gone").await.unwrap();
    }

    let store = FileStore::open(dir.path(), ValueCodec::default()).await.unwrap();
    assert_eq!(store.read(b"k").await.unwrap(), Some(b"durable".to_vec()));
    assert_eq!(store.read(b"gone").await.unwrap(), None);
    assert_eq!(collect_keys(&store).await, BTreeSet::from([b"k".to_vec()]));
}

#[tokio::test]
async fn test_long_keys_on_every_backend() {
    let long_key: Vec<u8> = (0..200u32).map(|i| (i % 251) as u8).collect();
    let mut sibling = long_key.clone();
    sibling.truncate(130);

    for kind in ALL_BACKENDS {
        let dir = TempDir::new().unwrap();
        let store = open_backend(kind, CompressionLevel::None, &dir).await;

        store.write(&long_key, b"long").await.unwrap();
        store.write(&sibling, b"shorter").await.unwrap();
        store.write(b"short", b"flat").await.unwrap();

        assert_eq!(store.read(&long_key).await.unwrap(), Some(b"long".to_vec()), "{:?}", kind);
        assert_eq!(store.read(&sibling).await.unwrap(), Some(b"shorter".to_vec()), "{:?}", kind);
        assert_eq!(
            collect_keys(store.as_ref()).await,
            BTreeSet::from([long_key.clone(), sibling.clone(), b"short".to_vec()]),
            "{:?}",
            kind
        );

        assert!(store.delete(&long_key).await.unwrap(), "{:?}", kind);
        assert_eq!(store.read(&long_key).await.unwrap(), None, "{:?}", kind);
        assert_eq!(collect_keys(store.as_ref()).await.len(), 2, "{:?}", kind);
    }
}

#[tokio::test]
async fn test_file_store_long_keys_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let scoped_key = [b"Area1/".repeat(20), b"Line7/Temperature".to_vec()].concat();
    {
        let store = FileStore::open(dir.path(), ValueCodec::default()).await.unwrap();
        let area = store.create_scoped(b"Area1/".repeat(20));
        area.write(b"Line7/Temperature", b"21.5").await.unwrap();

        // Long names live below segment directories, never as one huge file
        let longest_name = std::fs::read_dir(store.dir())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().len())
            .max()
            .unwrap();
        assert!(longest_name <= 255);
    }

    let store = FileStore::open(dir.path(), ValueCodec::default()).await.unwrap();
    assert_eq!(store.read(&scoped_key).await.unwrap(), Some(b"21.5".to_vec()));
    assert_eq!(collect_keys(&store).await, BTreeSet::from([scoped_key]));
}

#[tokio::test]
async fn test_memory_instances_are_isolated() {
    let a = MemoryStore::new();
    let b = MemoryStore::new();

    a.write(b"k", b"a").await.unwrap();

    assert_eq!(b.read(b"k").await.unwrap(), None);
    assert!(b.is_empty());
    assert_eq!(a.len(), 1);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_writers_lose_nothing() {
    for kind in ALL_BACKENDS {
        let dir = TempDir::new().unwrap();
        let store = open_backend(kind, CompressionLevel::Fastest, &dir).await;

        let mut handles = Vec::new();
        for i in 0..100u32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let key = format!("writer-{:03}", i);
                let value = format!("value-{}", i.wrapping_mul(2_654_435_761));
                store.write(key.as_bytes(), value.as_bytes()).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for i in 0..100u32 {
            let key = format!("writer-{:03}", i);
            let value = format!("value-{}", i.wrapping_mul(2_654_435_761));
            assert_eq!(
                store.read(key.as_bytes()).await.unwrap(),
                Some(value.into_bytes()),
                "{:?}",
                kind
            );
        }
        assert_eq!(collect_keys(store.as_ref()).await.len(), 100, "{:?}", kind);
    }
}
