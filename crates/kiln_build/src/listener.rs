//! Build progress notification.

use kiln_graph::DependencyNode;

/// Outcome of building one node.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BuildResult {
    /// The node's outputs were produced (or served from the cache).
    Succeeded,

    /// The node's pipeline reported failure.
    Failed,

    /// The build was stopped before the node ran.
    Aborted,
}

/// Receives progress callbacks during build dispatch.
///
/// Callbacks arrive from worker threads, possibly interleaved; `progress`
/// counts dispatched work items out of `total` queued ones.
pub trait BuildListener: Send + Sync {
    /// A node's build is starting.
    fn begin_build(&self, progress: usize, total: usize, node: &DependencyNode);

    /// A node's build finished with `result`.
    fn end_build(&self, progress: usize, total: usize, node: &DependencyNode, result: BuildResult);
}
