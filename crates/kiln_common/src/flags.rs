//! Flag bitsets attached to dependency nodes and build work items.

use enumset::EnumSetType;

/// Per-node flags accumulated while walking dependencies.
///
/// Flags are OR-merged when the same output guid is registered more than
/// once, so a node referenced both for bookkeeping and for building carries
/// both markers.
#[derive(EnumSetType, Debug)]
pub enum NodeFlag {
    /// The node's pipeline must produce output instances.
    Build,

    /// The referencing node's dirtiness depends on this edge: changes to the
    /// child propagate upward as `DependencyModified`.
    Use,

    /// The node was registered explicitly rather than discovered.
    ForceAdd,

    /// Dependency scanning failed for this node; it is excluded from
    /// analysis and dispatch.
    Failed,
}

/// Why a node is scheduled for building.
#[derive(EnumSetType, Debug)]
pub enum BuildReason {
    /// The node's own composite hash no longer matches the persisted record
    /// (or no record exists).
    SourceModified,

    /// A transitively Use-flagged descendant was source-modified.
    DependencyModified,

    /// A full rebuild was requested.
    Forced,
}
