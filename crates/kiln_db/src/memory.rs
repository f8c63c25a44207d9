//! In-memory object database.
//!
//! Serves as the source and output store in tests and embedded tools. Data
//! stream stamps come from a per-database monotonic clock so "unchanged since
//! last write" checks behave deterministically.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use kiln_common::Guid;
use parking_lot::{Mutex, RwLock};

use crate::asset::Asset;
use crate::database::{Instance, InstanceHandle, ObjectDatabase};
use crate::error::DbError;

/// An in-memory [`ObjectDatabase`].
pub struct MemoryDatabase {
    inner: Arc<DbInner>,
}

struct DbInner {
    state: Mutex<DbState>,
    clock: AtomicU64,
}

#[derive(Default)]
struct DbState {
    by_guid: HashMap<Guid, Arc<MemoryInstance>>,
    by_path: HashMap<String, Guid>,
}

struct MemoryInstance {
    guid: Guid,
    db: Weak<DbInner>,
    state: RwLock<InstanceState>,
}

struct InstanceState {
    path: String,
    object: Option<Arc<dyn Asset>>,
    data: BTreeMap<String, DataBlob>,
    committed: bool,
}

struct DataBlob {
    bytes: Vec<u8>,
    stamp: u64,
}

impl MemoryDatabase {
    /// Creates an empty database.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DbInner {
                state: Mutex::new(DbState::default()),
                clock: AtomicU64::new(0),
            }),
        }
    }

    /// Overrides the stamp of a data stream, for tests that exercise the
    /// stamp-reuse path in dependency hashing.
    pub fn set_data_stamp(&self, guid: Guid, name: &str, stamp: u64) {
        let instance = { self.inner.state.lock().by_guid.get(&guid).cloned() };
        if let Some(instance) = instance {
            let mut state = instance.state.write();
            if let Some(blob) = state.data.get_mut(name) {
                blob.stamp = stamp;
            }
        }
    }

    /// Returns the number of committed instances.
    pub fn committed_count(&self) -> usize {
        let state = self.inner.state.lock();
        state
            .by_guid
            .values()
            .filter(|i| i.state.read().committed)
            .count()
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl DbInner {
    fn detach(&self, guid: Guid) {
        let mut state = self.state.lock();
        if let Some(instance) = state.by_guid.remove(&guid) {
            let path = instance.state.read().path.clone();
            if state.by_path.get(&path) == Some(&guid) {
                state.by_path.remove(&path);
            }
        }
    }
}

impl ObjectDatabase for MemoryDatabase {
    fn instance(&self, guid: Guid) -> Option<InstanceHandle> {
        let state = self.inner.state.lock();
        let instance = state.by_guid.get(&guid)?;
        if !instance.state.read().committed {
            return None;
        }
        Some(instance.clone() as InstanceHandle)
    }

    fn instance_by_path(&self, path: &str) -> Option<InstanceHandle> {
        let guid = { *self.inner.state.lock().by_path.get(path)? };
        self.instance(guid)
    }

    fn create_instance(&self, path: &str, guid: Guid) -> Result<InstanceHandle, DbError> {
        if guid.is_nil() {
            return Err(DbError::InvalidGuid { guid });
        }

        let instance = Arc::new(MemoryInstance {
            guid,
            db: Arc::downgrade(&self.inner),
            state: RwLock::new(InstanceState {
                path: path.to_string(),
                object: None,
                data: BTreeMap::new(),
                committed: false,
            }),
        });

        let mut state = self.inner.state.lock();
        // Displace any previous holder of this guid or path.
        if let Some(old) = state.by_guid.remove(&guid) {
            let old_path = old.state.read().path.clone();
            if state.by_path.get(&old_path) == Some(&guid) {
                state.by_path.remove(&old_path);
            }
        }
        if let Some(old_guid) = state.by_path.remove(path) {
            state.by_guid.remove(&old_guid);
        }
        state.by_guid.insert(guid, instance.clone());
        state.by_path.insert(path.to_string(), guid);

        Ok(instance as InstanceHandle)
    }
}

impl Instance for MemoryInstance {
    fn guid(&self) -> Guid {
        self.guid
    }

    fn path(&self) -> String {
        self.state.read().path.clone()
    }

    fn set_object(&self, object: Arc<dyn Asset>) -> Result<(), DbError> {
        self.state.write().object = Some(object);
        Ok(())
    }

    fn object(&self) -> Option<Arc<dyn Asset>> {
        self.state.read().object.clone()
    }

    fn write_data(&self, name: &str, bytes: &[u8]) -> Result<(), DbError> {
        let stamp = match self.db.upgrade() {
            Some(db) => db.clock.fetch_add(1, Ordering::Relaxed) + 1,
            None => 0,
        };
        self.state.write().data.insert(
            name.to_string(),
            DataBlob {
                bytes: bytes.to_vec(),
                stamp,
            },
        );
        Ok(())
    }

    fn read_data(&self, name: &str) -> Option<Vec<u8>> {
        self.state.read().data.get(name).map(|b| b.bytes.clone())
    }

    fn data_names(&self) -> Vec<String> {
        self.state.read().data.keys().cloned().collect()
    }

    fn data_stamp(&self, name: &str) -> Option<u64> {
        self.state.read().data.get(name).map(|b| b.stamp)
    }

    fn commit(&self) -> bool {
        self.state.write().committed = true;
        true
    }

    fn revert(&self) -> bool {
        let committed = self.state.read().committed;
        if !committed {
            if let Some(db) = self.db.upgrade() {
                db.detach(self.guid);
            }
        }
        true
    }

    fn checkout(&self) -> bool {
        true
    }

    fn remove(&self) -> bool {
        match self.db.upgrade() {
            Some(db) => {
                db.detach(self.guid);
                true
            }
            None => false,
        }
    }
}
