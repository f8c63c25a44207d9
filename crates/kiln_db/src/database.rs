//! Database and instance traits.

use std::sync::Arc;

use kiln_common::Guid;

use crate::asset::Asset;
use crate::error::DbError;

/// A shared handle to a database instance.
pub type InstanceHandle = Arc<dyn Instance>;

/// A named, guid-addressed object with optional named data streams.
///
/// Newly created instances are invisible to readers until
/// [`commit`](Instance::commit); [`revert`](Instance::revert) discards an
/// uncommitted instance.
pub trait Instance: Send + Sync {
    /// The instance's stable identifier.
    fn guid(&self) -> Guid;

    /// The instance's database path.
    fn path(&self) -> String;

    /// Sets the instance's object graph.
    fn set_object(&self, object: Arc<dyn Asset>) -> Result<(), DbError>;

    /// Returns the instance's object graph, if one was set.
    fn object(&self) -> Option<Arc<dyn Asset>>;

    /// Writes (or replaces) a named data stream, advancing its stamp.
    fn write_data(&self, name: &str, bytes: &[u8]) -> Result<(), DbError>;

    /// Reads a named data stream.
    fn read_data(&self, name: &str) -> Option<Vec<u8>>;

    /// Returns the names of all data streams, in stable (sorted) order.
    fn data_names(&self) -> Vec<String>;

    /// Returns the last-write stamp of a data stream, in milliseconds.
    fn data_stamp(&self, name: &str) -> Option<u64>;

    /// Makes the instance visible to readers.
    fn commit(&self) -> bool;

    /// Discards an uncommitted instance; a no-op on committed ones.
    fn revert(&self) -> bool;

    /// Opens the instance for modification.
    fn checkout(&self) -> bool;

    /// Removes the instance from the database.
    fn remove(&self) -> bool;
}

/// A named-object database holding committed instances.
pub trait ObjectDatabase: Send + Sync {
    /// Looks up a committed instance by guid.
    fn instance(&self, guid: Guid) -> Option<InstanceHandle>;

    /// Looks up a committed instance by path.
    fn instance_by_path(&self, path: &str) -> Option<InstanceHandle>;

    /// Creates a new, uncommitted instance.
    ///
    /// An existing instance with the same guid (at any path) is displaced.
    fn create_instance(&self, path: &str, guid: Guid) -> Result<InstanceHandle, DbError>;
}
