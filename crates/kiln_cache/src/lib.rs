//! Build cache and persisted hash store.
//!
//! The build cache stores the committed output instances of one build node
//! as a single entry keyed by output guid and combined dependency hash.
//! The hash store persists per-guid composite hashes and external file
//! stamps between sessions so unchanged work can be detected and skipped.
//! All reads are fail-safe: corruption or missing files result in cache
//! misses rather than errors.

#![warn(missing_docs)]

pub mod blob;
pub mod entry;
pub mod error;
pub mod store;

pub use blob::BuildCache;
pub use entry::{read_entry, write_entry};
pub use error::CacheError;
pub use store::{FileStamp, HashStore};
