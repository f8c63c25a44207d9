//! Incremental build orchestration.
//!
//! The walkers turn source assets into a [`DependencySet`](kiln_graph::DependencySet)
//! by calling each pipeline's dependency scan, then the
//! [`PipelineBuilder`] analyzes which nodes are stale against the persisted
//! hash store and dispatches the dirty ones across the worker pool, serving
//! unchanged outputs from the build cache.

#![warn(missing_docs)]

pub mod builder;
pub mod depends;
pub mod listener;
pub mod parallel;
pub mod profile;
pub mod sequential;

pub use builder::PipelineBuilder;
pub use listener::{BuildListener, BuildResult};
pub use parallel::ParallelWalker;
pub use profile::{BuildReport, PipelineTiming};
pub use sequential::SequentialWalker;
