//! Dependency graph arena for the build pipeline.
//!
//! A build walks source assets and records one [`DependencyNode`] per output
//! instance, held in a [`DependencySet`] arena and addressed by
//! [`NodeIndex`]. Edges are stored as child index sets on each node; the
//! guid-to-index map enforces that each output guid is registered at most
//! once per walk.

#![warn(missing_docs)]

pub mod node;
pub mod set;

pub use node::{DependencyNode, ExternalFile, NodeIndex};
pub use set::DependencySet;
