//! The named-object database collaborator consumed by the build pipeline.
//!
//! Source assets are typed object graphs stored as instances; output
//! instances are created by pipelines, written, and committed. This crate
//! defines the database and instance traits, an in-memory implementation,
//! the per-build read-only object cache, the asset decoder registry, and the
//! isolated-instance blob codec used by the build cache.

#![warn(missing_docs)]

pub mod asset;
pub mod database;
pub mod error;
pub mod isolate;
pub mod memory;
pub mod read_cache;

pub use asset::{encode_asset, Asset, AssetCodecs};
pub use database::{Instance, InstanceHandle, ObjectDatabase};
pub use error::DbError;
pub use isolate::{instantiate_isolated, parse_isolated, read_isolated, write_isolated, IsolatedPayload};
pub use memory::MemoryDatabase;
pub use read_cache::InstanceReadCache;
