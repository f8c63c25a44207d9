//! Worker-pool-backed dependency walking.
//!
//! Declaring an output or instance enqueues an expansion job on the shared
//! pool instead of recursing inline, so wide dependency fans scan in
//! parallel. Hash folds into the declaring node (embedded objects, files,
//! pipeline references) stay inline because they mutate the declaring node
//! and must complete before its scan returns.

use std::path::Path;
use std::sync::Arc;

use enumset::EnumSet;
use kiln_cache::HashStore;
use kiln_common::{AssetTypeTag, Guid, NodeFlag, TaskGroup, WorkerPool};
use kiln_db::{Asset, InstanceReadCache, ObjectDatabase};
use kiln_graph::{DependencySet, NodeIndex};
use kiln_pipeline::{DependencyWalker, PipelineDescriptor, PipelineRegistry};

use crate::depends::{Registered, WalkShared};

/// Walks dependencies across the worker pool.
///
/// Produces the same set as [`SequentialWalker`](crate::SequentialWalker)
/// for the same roots, up to node discovery order.
pub struct ParallelWalker {
    root: TaskView,
}

/// A walker view at one declaration depth.
///
/// Expansion jobs get a fresh view one level deeper, which is how the depth
/// limit propagates through spawned tasks.
#[derive(Clone)]
struct TaskView {
    shared: Arc<WalkShared>,
    tasks: TaskGroup,
    max_depth: u32,
    depth: u32,
}

impl ParallelWalker {
    /// Creates a walker dispatching onto `pool`.
    pub fn new(
        registry: Arc<PipelineRegistry>,
        source_db: Arc<dyn ObjectDatabase>,
        read_cache: Arc<InstanceReadCache>,
        hash_store: Arc<HashStore>,
        pool: &Arc<WorkerPool>,
        max_depth: u32,
    ) -> Self {
        Self {
            root: TaskView {
                shared: Arc::new(WalkShared::new(registry, source_db, read_cache, hash_store)),
                tasks: pool.group(),
                max_depth,
                depth: 0,
            },
        }
    }

    /// Finishes the walk, yielding the set and whether it is buildable.
    /// Blocks until all expansion jobs have drained.
    pub fn into_dependency_set(self) -> (DependencySet, bool) {
        self.root.tasks.wait();
        let ok = !self.root.shared.is_failed();
        (self.root.shared.take_set(), ok)
    }
}

impl TaskView {
    fn deeper(&self) -> TaskView {
        TaskView {
            shared: Arc::clone(&self.shared),
            tasks: self.tasks.clone(),
            max_depth: self.max_depth,
            depth: self.depth + 1,
        }
    }

    /// Expands a freshly created node on a pool task.
    fn spawn_expand(&self, idx: NodeIndex, descriptor: Arc<PipelineDescriptor>) {
        let view = self.deeper();
        let scan = self.depth < self.max_depth;
        self.tasks.spawn(move || {
            view.shared.expand(&view, idx, &descriptor, scan);
        });
    }
}

impl DependencyWalker for TaskView {
    fn add_asset(&self, parent: Option<NodeIndex>, asset: &Arc<dyn Asset>) {
        if self.shared.is_failed() {
            return;
        }
        let Some(descriptor) = self.shared.resolve_pipeline(asset.type_tag()) else {
            return;
        };
        let hash = descriptor.pipeline.hash_asset(asset.as_ref());
        self.shared.fold_asset_hash(parent, hash);

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
        let view = self.clone();
        let output_path = output_path.to_string();
        self.tasks.spawn(move || {
            if view.shared.is_failed() {
                return;
            }
            let Some(descriptor) = view.shared.resolve_pipeline(asset.type_tag()) else {
                return;
            };
            let registered = view.shared.register(
                parent,
                None,
                asset,
                descriptor.pipeline.name(),
                descriptor.hash,
                &output_path,
                output_guid,
                flags,
            );
            if let Registered::Created(idx) = registered {
                view.spawn_expand(idx, descriptor);
            }
        });
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
        let view = self.clone();
        self.tasks.spawn(move || {
            if view.shared.is_failed() {
                return;
            }
            let Some(resolved) = view.shared.resolve_instance(instance_guid) else {
                return;
            };
            let registered = view.shared.register(
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
                view.spawn_expand(idx, resolved.descriptor);
            }
        });
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
        self.tasks.wait();
        !self.shared.is_failed()
    }
}

impl DependencyWalker for ParallelWalker {
    fn add_asset(&self, parent: Option<NodeIndex>, asset: &Arc<dyn Asset>) {
        self.root.add_asset(parent, asset);
    }

    fn add_output(
        &self,
        parent: Option<NodeIndex>,
        asset: Arc<dyn Asset>,
        output_path: &str,
        output_guid: Guid,
        flags: EnumSet<NodeFlag>,
    ) {
        self.root
            .add_output(parent, asset, output_path, output_guid, flags);
    }

    fn add_instance(
        &self,
        parent: Option<NodeIndex>,
        instance_guid: Guid,
        flags: EnumSet<NodeFlag>,
    ) {
        self.root.add_instance(parent, instance_guid, flags);
    }

    fn add_file(&self, parent: Option<NodeIndex>, base_path: &Path, file_name: &str) {
        self.root.add_file(parent, base_path, file_name);
    }

    fn add_pipeline_of(&self, parent: Option<NodeIndex>, tag: AssetTypeTag) {
        self.root.add_pipeline_of(parent, tag);
    }

    fn wait_until_finished(&self) -> bool {
        self.root.wait_until_finished()
    }
}
