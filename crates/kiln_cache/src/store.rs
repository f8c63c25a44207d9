//! Persisted dependency hash store.
//!
//! Stored as `hashes.json` next to the cache entries. Records the composite
//! hash of every successfully built output and the stamp-keyed hash of
//! every external file and data stream seen, so the next session can skip
//! rehashing unchanged inputs and detect unchanged outputs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use kiln_common::{CompositeHash, Guid};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Name of the hash store file within the cache directory.
const STORE_FILE: &str = "hashes.json";

/// A file's identity at hashing time.
///
/// The hash is reused while the stamp and size still match, so file content
/// is read at most once per change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStamp {
    /// Last-write time in milliseconds.
    pub last_write_ms: u64,

    /// File size in bytes.
    pub size: u64,

    /// Content hash captured at `last_write_ms`.
    pub hash: u32,
}

#[derive(Default, Serialize, Deserialize)]
struct StoreState {
    dependencies: HashMap<Guid, CompositeHash>,
    files: HashMap<PathBuf, FileStamp>,
}

/// Thread-safe store of composite hashes and file stamps.
#[derive(Default)]
pub struct HashStore {
    state: RwLock<StoreState>,
}

impl HashStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the store from `<cache_dir>/hashes.json`.
    ///
    /// Fail-safe: a missing or corrupt file yields an empty store, which
    /// causes a full rebuild rather than an error.
    pub fn load(cache_dir: &Path) -> Self {
        let state = std::fs::read_to_string(cache_dir.join(STORE_FILE))
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default();
        Self {
            state: RwLock::new(state),
        }
    }

    /// Saves the store to `<cache_dir>/hashes.json`, creating the directory
    /// if needed.
    pub fn save(&self, cache_dir: &Path) -> Result<(), CacheError> {
        std::fs::create_dir_all(cache_dir).map_err(|e| CacheError::Io {
            path: cache_dir.to_path_buf(),
            source: e,
        })?;
        let path = cache_dir.join(STORE_FILE);
        let json = serde_json::to_string_pretty(&*self.state.read()).map_err(|e| {
            CacheError::Serialization {
                reason: e.to_string(),
            }
        })?;
        std::fs::write(&path, json).map_err(|e| CacheError::Io { path, source: e })
    }

    /// The composite hash recorded for an output guid, if any.
    pub fn get_dependency(&self, guid: Guid) -> Option<CompositeHash> {
        self.state.read().dependencies.get(&guid).copied()
    }

    /// Records the composite hash of a successfully built output.
    pub fn set_dependency(&self, guid: Guid, hash: CompositeHash) {
        self.state.write().dependencies.insert(guid, hash);
    }

    /// The recorded stamp for a file path, if any.
    pub fn get_file(&self, path: &Path) -> Option<FileStamp> {
        self.state.read().files.get(path).copied()
    }

    /// Records a file's stamp and content hash.
    pub fn set_file(&self, path: &Path, stamp: FileStamp) {
        self.state.write().files.insert(path.to_path_buf(), stamp);
    }

    /// Number of recorded dependency hashes.
    pub fn dependency_count(&self) -> usize {
        self.state.read().dependencies.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(n: u32) -> CompositeHash {
        CompositeHash {
            pipeline_hash: n,
            source_asset_hash: n.wrapping_mul(3),
            source_data_hash: 0,
            files_hash: 0,
        }
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = HashStore::new();
        store.set_dependency(Guid::from_u128(1), hash(10));
        store.set_file(
            Path::new("/assets/hero.png"),
            FileStamp {
                last_write_ms: 1234,
                size: 99,
                hash: 0xdead,
            },
        );
        store.save(dir.path()).unwrap();

        let loaded = HashStore::load(dir.path());
        assert_eq!(loaded.get_dependency(Guid::from_u128(1)), Some(hash(10)));
        let stamp = loaded.get_file(Path::new("/assets/hero.png")).unwrap();
        assert_eq!(stamp.last_write_ms, 1234);
        assert_eq!(stamp.hash, 0xdead);
    }

    #[test]
    fn missing_store_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = HashStore::load(dir.path());
        assert_eq!(store.dependency_count(), 0);
    }

    #[test]
    fn corrupt_store_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STORE_FILE), "not valid json {{{").unwrap();
        let store = HashStore::load(dir.path());
        assert_eq!(store.dependency_count(), 0);
        assert!(store.get_dependency(Guid::from_u128(1)).is_none());
    }

    #[test]
    fn set_overwrites() {
        let store = HashStore::new();
        let guid = Guid::from_u128(1);
        store.set_dependency(guid, hash(1));
        store.set_dependency(guid, hash(2));
        assert_eq!(store.get_dependency(guid), Some(hash(2)));
        assert_eq!(store.dependency_count(), 1);
    }

    #[test]
    fn save_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("deeply").join("nested");
        HashStore::new().save(&nested).unwrap();
        assert!(nested.join(STORE_FILE).exists());
    }
}
