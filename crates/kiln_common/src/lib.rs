//! Shared foundational types for the Kiln asset build pipeline.
//!
//! This crate provides asset identifiers, the content hashing primitives the
//! incremental rebuild logic is keyed on, node flag and build reason bitsets,
//! wire codec helpers, and the shared worker pool used by the parallel
//! dependency walker and the builder's dispatch phase.

#![warn(missing_docs)]

pub mod flags;
pub mod guid;
pub mod hash;
pub mod pool;
pub mod wire;

pub use flags::{BuildReason, NodeFlag};
pub use guid::Guid;
pub use hash::{AssetTypeTag, CompositeHash, ContentHasher, HashError};
pub use pool::{PoolError, TaskGroup, WorkerPool};
