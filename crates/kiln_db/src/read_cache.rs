//! Read-only object cache over a source database.

use std::collections::HashMap;
use std::sync::Arc;

use kiln_common::Guid;
use parking_lot::Mutex;

use crate::asset::Asset;
use crate::database::ObjectDatabase;

/// Caches source objects for one build's lifetime.
///
/// The first read of a guid goes to the database; later reads are served
/// from the cache. Both walkers and the builder share one cache so an asset
/// referenced by many nodes is checked out exactly once.
pub struct InstanceReadCache {
    db: Arc<dyn ObjectDatabase>,
    objects: Mutex<HashMap<Guid, Arc<dyn Asset>>>,
}

impl InstanceReadCache {
    /// Creates a cache over the given source database.
    pub fn new(db: Arc<dyn ObjectDatabase>) -> Self {
        Self {
            db,
            objects: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the object for `guid`, reading through to the database on the
    /// first request. `None` if the instance is missing or has no object.
    pub fn get_object_read_only(&self, guid: Guid) -> Option<Arc<dyn Asset>> {
        if guid.is_nil() {
            return None;
        }
        if let Some(object) = self.objects.lock().get(&guid) {
            return Some(object.clone());
        }
        let object = self.db.instance(guid)?.object()?;
        self.objects
            .lock()
            .entry(guid)
            .or_insert_with(|| object.clone());
        Some(object)
    }

    /// Drops all cached objects, forcing re-reads.
    pub fn clear(&self) {
        self.objects.lock().clear();
    }
}
