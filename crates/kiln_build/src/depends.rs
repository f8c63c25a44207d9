//! State and helpers shared by the sequential and parallel walkers.
//!
//! Both walkers register nodes into one guid-deduplicated
//! [`DependencySet`] and hash sources the same way; they differ only in how
//! node expansion is scheduled. A failure anywhere in a walk (missing
//! pipeline, missing source, unreadable data) poisons the whole walk: the
//! resulting set must not be built from, because incomplete dependencies
//! would produce wrong hashes and stale outputs. Declarations arriving after
//! the poison are ignored.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use enumset::EnumSet;
use kiln_cache::{FileStamp, HashStore};
use kiln_common::{AssetTypeTag, ContentHasher, Guid, NodeFlag};
use kiln_db::{Asset, InstanceHandle, InstanceReadCache, ObjectDatabase};
use kiln_graph::{DependencyNode, DependencySet, ExternalFile, NodeIndex};
use kiln_pipeline::{DependencyWalker, PipelineDescriptor, PipelineRegistry};
use parking_lot::Mutex;

/// Result of registering an output guid in the set.
pub(crate) enum Registered {
    /// The guid was already present; flags were OR-merged.
    Existing(NodeIndex),

    /// A fresh node was added and still needs expansion and hashing.
    Created(NodeIndex),
}

/// A source instance resolved to its object and pipeline.
pub(crate) struct ResolvedInstance {
    pub instance: InstanceHandle,
    pub asset: Arc<dyn Asset>,
    pub descriptor: Arc<PipelineDescriptor>,
}

/// Walk state shared between a walker and its expansion jobs.
pub(crate) struct WalkShared {
    pub registry: Arc<PipelineRegistry>,
    pub source_db: Arc<dyn ObjectDatabase>,
    pub read_cache: Arc<InstanceReadCache>,
    pub hash_store: Arc<HashStore>,
    pub set: Mutex<DependencySet>,
    failed: AtomicBool,
}

impl WalkShared {
    pub(crate) fn new(
        registry: Arc<PipelineRegistry>,
        source_db: Arc<dyn ObjectDatabase>,
        read_cache: Arc<InstanceReadCache>,
        hash_store: Arc<HashStore>,
    ) -> Self {
        Self {
            registry,
            source_db,
            read_cache,
            hash_store,
            set: Mutex::new(DependencySet::new()),
            failed: AtomicBool::new(false),
        }
    }

    /// Marks the whole walk as failed.
    pub(crate) fn fail(&self, message: impl AsRef<str>) {
        log::error!("dependency walk failed: {}", message.as_ref());
        self.failed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Takes the accumulated set out of the walk state.
    pub(crate) fn take_set(&self) -> DependencySet {
        std::mem::take(&mut *self.set.lock())
    }

    /// Finds the pipeline for an asset type; a miss poisons the walk.
    pub(crate) fn resolve_pipeline(&self, tag: AssetTypeTag) -> Option<Arc<PipelineDescriptor>> {
        let descriptor = self.registry.find(tag);
        if descriptor.is_none() {
            self.fail(format!("no pipeline registered for asset type {tag}"));
        }
        descriptor
    }

    /// Resolves a source instance to its object and pipeline; any miss
    /// poisons the walk.
    pub(crate) fn resolve_instance(&self, guid: Guid) -> Option<ResolvedInstance> {
        let Some(instance) = self.source_db.instance(guid) else {
            self.fail(format!("missing source instance {guid}"));
            return None;
        };
        let Some(asset) = self.read_cache.get_object_read_only(guid) else {
            self.fail(format!("source instance {guid} has no object"));
            return None;
        };
        let descriptor = self.resolve_pipeline(asset.type_tag())?;
        Some(ResolvedInstance {
            instance,
            asset,
            descriptor,
        })
    }

    /// Registers an output guid, OR-merging flags and linking the parent
    /// edge. A created node still needs expansion and hashing.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn register(
        &self,
        parent: Option<NodeIndex>,
        source_instance_guid: Option<Guid>,
        source_asset: Arc<dyn Asset>,
        pipeline_name: &'static str,
        pipeline_hash: u32,
        output_path: &str,
        output_guid: Guid,
        flags: EnumSet<NodeFlag>,
    ) -> Registered {
        let mut set = self.set.lock();
        let registered = match set.index_of(output_guid) {
            Some(idx) => {
                set.get_mut(idx).flags |= flags;
                Registered::Existing(idx)
            }
            None => {
                let mut node = DependencyNode::new(
                    output_guid,
                    pipeline_name,
                    pipeline_hash,
                    output_path.to_string(),
                    flags,
                );
                node.source_instance_guid = source_instance_guid;
                node.source_asset = Some(source_asset);
                Registered::Created(set.add(node))
            }
        };
        if let Some(parent) = parent {
            let idx = match registered {
                Registered::Existing(idx) | Registered::Created(idx) => idx,
            };
            if parent != idx {
                set.get_mut(parent).children.insert(idx);
            }
        }
        registered
    }

    /// Folds an embedded object's hash into a node's source-asset hash.
    pub(crate) fn fold_asset_hash(&self, parent: Option<NodeIndex>, hash: u32) {
        if let Some(parent) = parent {
            let mut set = self.set.lock();
            let node = set.get_mut(parent);
            node.source_asset_hash = node.source_asset_hash.wrapping_add(hash);
        }
    }

    /// Folds another pipeline's hash into a node's pipeline hash.
    pub(crate) fn fold_pipeline_hash(&self, parent: Option<NodeIndex>, hash: u32) {
        if let Some(parent) = parent {
            let mut set = self.set.lock();
            let node = set.get_mut(parent);
            node.pipeline_hash = node.pipeline_hash.wrapping_add(hash);
        }
    }

    /// Records an external file dependency on a node. A missing or
    /// unreadable file poisons the walk.
    pub(crate) fn add_external_file(&self, parent: Option<NodeIndex>, path: PathBuf) {
        let Some(parent) = parent else {
            log::warn!("file dependency {} declared without a node", path.display());
            return;
        };
        let Some((hash, last_write_ms)) = self.hash_external_file(&path) else {
            return;
        };
        let mut set = self.set.lock();
        let node = set.get_mut(parent);
        node.files_hash = node.files_hash.wrapping_add(hash);
        node.external_files.push(ExternalFile {
            path,
            last_write_ms,
        });
    }

    /// Hashes a file, reusing the recorded hash while its stamp and size are
    /// unchanged.
    fn hash_external_file(&self, path: &Path) -> Option<(u32, u64)> {
        let (last_write_ms, size) = match file_stamp(path) {
            Ok(stamp) => stamp,
            Err(e) => {
                self.fail(format!("unable to stat file {}: {e}", path.display()));
                return None;
            }
        };

        if let Some(recorded) = self.hash_store.get_file(path) {
            if recorded.last_write_ms == last_write_ms && recorded.size == size {
                return Some((recorded.hash, last_write_ms));
            }
        }

        let hash = std::fs::File::open(path)
            .map_err(kiln_common::HashError::from)
            .and_then(ContentHasher::hash_reader);
        match hash {
            Ok(hash) => {
                self.hash_store.set_file(
                    path,
                    FileStamp {
                        last_write_ms,
                        size,
                        hash,
                    },
                );
                Some((hash, last_write_ms))
            }
            Err(e) => {
                self.fail(format!("unable to hash file {}: {e}", path.display()));
                None
            }
        }
    }

    /// Fills in a node's own hash contributions after expansion: the source
    /// object hash and, for database-backed sources, the data stream hashes.
    ///
    /// Embedded-object folds from the expansion are already in
    /// `source_asset_hash`, so the base hash is added rather than assigned.
    pub(crate) fn compute_hashes(&self, idx: NodeIndex, descriptor: &PipelineDescriptor) {
        let (asset, source_guid) = {
            let set = self.set.lock();
            let node = set.get(idx);
            (node.source_asset.clone(), node.source_instance_guid)
        };
        let Some(asset) = asset else {
            self.fail("node registered without a source object");
            return;
        };

        let asset_hash = descriptor.pipeline.hash_asset(asset.as_ref());

        let mut data_hash = 0u32;
        if let Some(guid) = source_guid {
            let Some(instance) = self.source_db.instance(guid) else {
                self.fail(format!("source instance {guid} disappeared during walk"));
                return;
            };
            for name in instance.data_names() {
                let Some(hash) = self.hash_data_stream(&instance, guid, &name) else {
                    return;
                };
                data_hash = data_hash.wrapping_add(hash);
            }
        }

        let mut set = self.set.lock();
        let node = set.get_mut(idx);
        node.source_asset_hash = node.source_asset_hash.wrapping_add(asset_hash);
        node.source_data_hash = node.source_data_hash.wrapping_add(data_hash);
    }

    /// Hashes one data stream, reusing the recorded hash while the stream's
    /// stamp is unchanged. Streams are keyed in the store under a synthetic
    /// `<guid>/<name>` path.
    fn hash_data_stream(&self, instance: &InstanceHandle, guid: Guid, name: &str) -> Option<u32> {
        let key = PathBuf::from(format!("{guid}/{name}"));
        let stamp = instance.data_stamp(name).unwrap_or(0);

        if let Some(recorded) = self.hash_store.get_file(&key) {
            if recorded.last_write_ms == stamp {
                return Some(recorded.hash);
            }
        }

        let Some(bytes) = instance.read_data(name) else {
            self.fail(format!("unable to read data stream {guid}/{name}"));
            return None;
        };
        let hash = ContentHasher::hash_bytes(&bytes);
        self.hash_store.set_file(
            &key,
            FileStamp {
                last_write_ms: stamp,
                size: bytes.len() as u64,
                hash,
            },
        );
        Some(hash)
    }

    /// Runs a created node's dependency scan and fills in its hashes.
    ///
    /// A pipeline that reports scan failure marks only this node as failed;
    /// the rest of the walk continues.
    pub(crate) fn expand(
        &self,
        walker: &dyn DependencyWalker,
        idx: NodeIndex,
        descriptor: &PipelineDescriptor,
        scan: bool,
    ) {
        let (asset, source_guid, output_path, output_guid) = {
            let set = self.set.lock();
            let node = set.get(idx);
            (
                node.source_asset.clone(),
                node.source_instance_guid,
                node.output_path.clone(),
                node.output_guid,
            )
        };
        let Some(asset) = asset else {
            self.fail("node registered without a source object");
            return;
        };

        if scan {
            let source_instance = source_guid.and_then(|g| self.source_db.instance(g));
            let ok = descriptor.pipeline.build_dependencies(
                walker,
                Some(idx),
                source_instance.as_ref(),
                &asset,
                &output_path,
                output_guid,
            );
            if !ok {
                log::error!(
                    "pipeline '{}' failed to scan dependencies of {output_guid}",
                    descriptor.pipeline.name()
                );
                self.set.lock().get_mut(idx).flags |= NodeFlag::Failed;
                return;
            }
        }

        self.compute_hashes(idx, descriptor);
    }
}

/// Last-write time in milliseconds since the epoch, and size in bytes.
pub(crate) fn file_stamp(path: &Path) -> std::io::Result<(u64, u64)> {
    let metadata = std::fs::metadata(path)?;
    let modified = metadata.modified()?;
    let ms = modified
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    Ok((ms, metadata.len()))
}
