//! Dependency nodes.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use enumset::EnumSet;
use kiln_common::{CompositeHash, Guid, NodeFlag};
use kiln_db::Asset;

/// Index of a node within a [`DependencySet`](crate::DependencySet).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeIndex(u32);

impl NodeIndex {
    /// Wraps a raw arena offset.
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw arena offset.
    pub fn as_raw(self) -> u32 {
        self.0
    }

    /// The raw offset as a usize, for slice indexing.
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// A file outside the database that an output depends on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternalFile {
    /// Absolute path of the file.
    pub path: PathBuf,

    /// Last-write time in milliseconds, captured during the walk.
    pub last_write_ms: u64,
}

/// One output instance discovered during a dependency walk.
///
/// Hash fields hold the node's own contribution only; transitive
/// accumulation over `Use` children happens at analysis time.
#[derive(Clone)]
pub struct DependencyNode {
    /// Guid of the output instance this node will produce.
    pub output_guid: Guid,

    /// Name of the pipeline responsible for building the node.
    pub pipeline_name: &'static str,

    /// Version-qualified hash of that pipeline.
    pub pipeline_hash: u32,

    /// Guid of the source instance, when the asset came from the database.
    pub source_instance_guid: Option<Guid>,

    /// The source object graph to build from.
    pub source_asset: Option<Arc<dyn Asset>>,

    /// Database path at which the output instance is created.
    pub output_path: String,

    /// Build, Use, ForceAdd and Failed markers.
    pub flags: EnumSet<NodeFlag>,

    /// Indices of nodes this node depends on.
    pub children: BTreeSet<NodeIndex>,

    /// Hash of the source object graph.
    pub source_asset_hash: u32,

    /// Hash of the source instance's data streams.
    pub source_data_hash: u32,

    /// Hash of the referenced external files.
    pub files_hash: u32,

    /// External files referenced by this node.
    pub external_files: Vec<ExternalFile>,
}

impl DependencyNode {
    /// Creates a node with empty hashes, no children and no files.
    pub fn new(
        output_guid: Guid,
        pipeline_name: &'static str,
        pipeline_hash: u32,
        output_path: String,
        flags: EnumSet<NodeFlag>,
    ) -> Self {
        Self {
            output_guid,
            pipeline_name,
            pipeline_hash,
            source_instance_guid: None,
            source_asset: None,
            output_path,
            flags,
            children: BTreeSet::new(),
            source_asset_hash: 0,
            source_data_hash: 0,
            files_hash: 0,
            external_files: Vec::new(),
        }
    }

    /// This node's own hash contribution, before accumulation.
    pub fn local_hash(&self) -> CompositeHash {
        CompositeHash {
            pipeline_hash: self.pipeline_hash,
            source_asset_hash: self.source_asset_hash,
            source_data_hash: self.source_data_hash,
            files_hash: self.files_hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_hash_mirrors_fields() {
        let mut node = DependencyNode::new(
            Guid::from_u128(1),
            "tests.Pipeline",
            7,
            "out/a".to_string(),
            NodeFlag::Build.into(),
        );
        node.source_asset_hash = 11;
        node.source_data_hash = 13;
        node.files_hash = 17;

        let h = node.local_hash();
        assert_eq!(h.pipeline_hash, 7);
        assert_eq!(h.source_asset_hash, 11);
        assert_eq!(h.source_data_hash, 13);
        assert_eq!(h.files_hash, 17);
    }

    #[test]
    fn node_index_ordering() {
        let a = NodeIndex::from_raw(1);
        let b = NodeIndex::from_raw(2);
        assert!(a < b);
        assert_eq!(a.as_usize(), 1);
        assert_eq!(b.as_raw(), 2);
    }
}
