//! On-disk entry storage.
//!
//! Each entry lives at `<root>/<guid-hex>/<combined-hash>.blob`. Writers
//! stage into a `.blob.incomplete` sibling and rename on commit, so readers
//! never observe a half-written entry. A crashed build leaves only
//! `.incomplete` files behind, which are never served.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use kiln_common::Guid;
use parking_lot::Mutex;

/// Content-addressed store of build cache entries.
///
/// Keys are the output guid and the combined dependency hash of the node
/// that produced the entry. A staging set prevents two concurrent builders
/// from writing the same entry.
pub struct BuildCache {
    root: PathBuf,
    staging: Mutex<HashSet<(Guid, u32)>>,
}

impl BuildCache {
    /// Opens (or designates) a cache rooted at `root`. The directory is
    /// created lazily on the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            staging: Mutex::new(HashSet::new()),
        }
    }

    fn entry_path(&self, guid: Guid, hash: u32) -> PathBuf {
        self.root.join(guid.to_string()).join(format!("{hash:08x}.blob"))
    }

    fn staging_path(&self, guid: Guid, hash: u32) -> PathBuf {
        self.root
            .join(guid.to_string())
            .join(format!("{hash:08x}.blob.incomplete"))
    }

    /// Opens a committed entry for reading. `None` on a miss.
    pub fn get(&self, guid: Guid, hash: u32) -> Option<BufReader<File>> {
        let file = File::open(self.entry_path(guid, hash)).ok()?;
        Some(BufReader::new(file))
    }

    /// Opens a staging file for writing a new entry.
    ///
    /// Returns `None` when the entry already exists or another writer is
    /// staging it. The writer must be dropped before
    /// [`commit`](Self::commit).
    pub fn put(&self, guid: Guid, hash: u32) -> Option<BufWriter<File>> {
        if self.entry_path(guid, hash).exists() {
            return None;
        }
        if !self.staging.lock().insert((guid, hash)) {
            return None;
        }

        let path = self.staging_path(guid, hash);
        let create = path
            .parent()
            .map(std::fs::create_dir_all)
            .transpose()
            .and_then(|_| File::create(&path));
        match create {
            Ok(file) => Some(BufWriter::new(file)),
            Err(e) => {
                log::warn!("unable to stage cache entry {guid}/{hash:08x}: {e}");
                self.staging.lock().remove(&(guid, hash));
                None
            }
        }
    }

    /// Publishes a staged entry, making it visible to readers.
    pub fn commit(&self, guid: Guid, hash: u32) -> bool {
        if !self.staging.lock().remove(&(guid, hash)) {
            return false;
        }
        match std::fs::rename(self.staging_path(guid, hash), self.entry_path(guid, hash)) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("unable to commit cache entry {guid}/{hash:08x}: {e}");
                false
            }
        }
    }

    /// Abandons a staged entry and removes its staging file.
    pub fn discard(&self, guid: Guid, hash: u32) {
        if self.staging.lock().remove(&(guid, hash)) {
            let _ = std::fs::remove_file(self.staging_path(guid, hash));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn cache() -> (tempfile::TempDir, BuildCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = BuildCache::new(dir.path());
        (dir, cache)
    }

    #[test]
    fn put_commit_get() {
        let (_dir, cache) = cache();
        let guid = Guid::from_u128(1);

        let mut w = cache.put(guid, 0xabcd).unwrap();
        w.write_all(b"entry bytes").unwrap();
        drop(w);
        assert!(cache.commit(guid, 0xabcd));

        let mut r = cache.get(guid, 0xabcd).unwrap();
        let mut bytes = Vec::new();
        r.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes, b"entry bytes");
    }

    #[test]
    fn uncommitted_entry_is_invisible() {
        let (_dir, cache) = cache();
        let guid = Guid::from_u128(1);

        let mut w = cache.put(guid, 1).unwrap();
        w.write_all(b"partial").unwrap();
        drop(w);

        assert!(cache.get(guid, 1).is_none());
    }

    #[test]
    fn put_refuses_existing_or_staged() {
        let (_dir, cache) = cache();
        let guid = Guid::from_u128(1);

        let w = cache.put(guid, 1).unwrap();
        assert!(cache.put(guid, 1).is_none(), "staging in progress");
        drop(w);
        cache.commit(guid, 1);
        assert!(cache.put(guid, 1).is_none(), "entry exists");
    }

    #[test]
    fn discard_removes_staging_file() {
        let (dir, cache) = cache();
        let guid = Guid::from_u128(1);

        let mut w = cache.put(guid, 1).unwrap();
        w.write_all(b"junk").unwrap();
        drop(w);
        cache.discard(guid, 1);

        assert!(cache.get(guid, 1).is_none());
        // Nothing left under the guid directory.
        let entries: Vec<_> = std::fs::read_dir(dir.path().join(guid.to_string()))
            .unwrap()
            .collect();
        assert!(entries.is_empty());
        // A later put succeeds.
        assert!(cache.put(guid, 1).is_some());
    }

    #[test]
    fn distinct_hashes_are_distinct_entries() {
        let (_dir, cache) = cache();
        let guid = Guid::from_u128(1);

        let mut w = cache.put(guid, 1).unwrap();
        w.write_all(b"one").unwrap();
        drop(w);
        cache.commit(guid, 1);

        assert!(cache.get(guid, 2).is_none());
        assert!(cache.get(Guid::from_u128(2), 1).is_none());
    }

    #[test]
    fn commit_without_put_fails() {
        let (_dir, cache) = cache();
        assert!(!cache.commit(Guid::from_u128(1), 1));
    }
}
