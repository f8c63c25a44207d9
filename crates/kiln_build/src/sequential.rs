//! Depth-first, single-threaded dependency walking.

use std::cell::Cell;
use std::path::Path;
use std::sync::Arc;

use enumset::EnumSet;
use kiln_cache::HashStore;
use kiln_common::{AssetTypeTag, Guid, NodeFlag};
use kiln_db::{Asset, InstanceReadCache, ObjectDatabase};
use kiln_graph::{DependencySet, NodeIndex};
use kiln_pipeline::{DependencyWalker, PipelineDescriptor, PipelineRegistry};

use crate::depends::{Registered, WalkShared};

/// Walks dependencies depth-first on the calling thread.
///
/// Expansion happens inline: declaring an output recursively scans it before
/// the declaring call returns. Nodes deeper than the depth limit are still
/// registered and hashed but their own dependencies are not scanned.
pub struct SequentialWalker {
    shared: WalkShared,
    depth: Cell<u32>,
    max_depth: u32,
}

impl SequentialWalker {
    /// Creates a walker over the given collaborators.
    pub fn new(
        registry: Arc<PipelineRegistry>,
        source_db: Arc<dyn ObjectDatabase>,
        read_cache: Arc<InstanceReadCache>,
        hash_store: Arc<HashStore>,
        max_depth: u32,
    ) -> Self {
        Self {
            shared: WalkShared::new(registry, source_db, read_cache, hash_store),
            depth: Cell::new(0),
            max_depth,
        }
    }

    /// Finishes the walk, yielding the set and whether it is buildable.
    pub fn into_dependency_set(self) -> (DependencySet, bool) {
        let ok = !self.shared.is_failed();
        (self.shared.take_set(), ok)
    }

    fn expand_created(&self, idx: NodeIndex, descriptor: &PipelineDescriptor) {
        let depth = self.depth.get();
        self.depth.set(depth + 1);
        self.shared
            .expand(self, idx, descriptor, depth < self.max_depth);
        self.depth.set(depth);
    }
}

impl DependencyWalker for SequentialWalker {
    fn add_asset(&self, parent: Option<NodeIndex>, asset: &Arc<dyn Asset>) {
        if self.shared.is_failed() {
            return;
        }
        let Some(descriptor) = self.shared.resolve_pipeline(asset.type_tag()) else {
            return;
        };
        let hash = descriptor.pipeline.hash_asset(asset.as_ref());
        self.shared.fold_asset_hash(parent, hash);

        // Embedded objects are scanned at the declaring node's depth.
        let ok = descriptor
            .pipeline
            .build_dependencies(self, parent, None, asset, "", Guid::NIL);
        if !ok {
            match parent {
                Some(parent) => {
                    self.shared.set.lock().get_mut(parent).flags |= NodeFlag::Failed
                }
                None => self.shared.fail("embedded object scan failed at the root"),
            }
        }
    }

    fn add_output(
        &self,
        parent: Option<NodeIndex>,
        asset: Arc<dyn Asset>,
        output_path: &str,
        output_guid: Guid,
        flags: EnumSet<NodeFlag>,
    ) {
        if self.shared.is_failed() {
            return;
        }
        let Some(descriptor) = self.shared.resolve_pipeline(asset.type_tag()) else {
            return;
        };
        let registered = self.shared.register(
            parent,
            None,
            asset,
            descriptor.pipeline.name(),
            descriptor.hash,
            output_path,
            output_guid,
            flags,
        );
        if let Registered::Created(idx) = registered {
            self.expand_created(idx, &descriptor);
        }
    }

    fn add_instance(
        &self,
        parent: Option<NodeIndex>,
        instance_guid: Guid,
        flags: EnumSet<NodeFlag>,
    ) {
        if self.shared.is_failed() {
            return;
        }
        let Some(resolved) = self.shared.resolve_instance(instance_guid) else {
            return;
        };
        let registered = self.shared.register(
            parent,
            Some(instance_guid),
            resolved.asset,
            resolved.descriptor.pipeline.name(),
            resolved.descriptor.hash,
            &resolved.instance.path(),
            instance_guid,
            flags,
        );
        if let Registered::Created(idx) = registered {
            self.expand_created(idx, &resolved.descriptor);
        }
    }

    fn add_file(&self, parent: Option<NodeIndex>, base_path: &Path, file_name: &str) {
        if self.shared.is_failed() {
            return;
        }
        self.shared
            .add_external_file(parent, base_path.join(file_name));
    }

    fn add_pipeline_of(&self, parent: Option<NodeIndex>, tag: AssetTypeTag) {
        if self.shared.is_failed() {
            return;
        }
        if let Some(descriptor) = self.shared.resolve_pipeline(tag) {
            self.shared.fold_pipeline_hash(parent, descriptor.hash);
        }
    }

    fn wait_until_finished(&self) -> bool {
        !self.shared.is_failed()
    }
}
