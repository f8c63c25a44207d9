//! Staleness analysis and build dispatch.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use enumset::EnumSet;
use kiln_cache::{read_entry, write_entry, BuildCache, CacheError, HashStore};
use kiln_common::{
    BuildReason, CompositeHash, Guid, NodeFlag, PoolError, WorkerPool,
};
use kiln_db::{
    Asset, AssetCodecs, DbError, InstanceHandle, InstanceReadCache, ObjectDatabase,
};
use kiln_graph::{DependencySet, NodeIndex};
use kiln_pipeline::{BuildAccess, BuildParams, BuildSettings, PipelineRegistry};
use parking_lot::{Mutex, ReentrantMutex};

use crate::listener::{BuildListener, BuildResult};
use crate::parallel::ParallelWalker;
use crate::profile::{BuildReport, Profiler};
use crate::sequential::SequentialWalker;

/// The composite dependency hash of a node: its own contribution plus that
/// of every transitively Use-flagged descendant, each counted once.
pub fn composite_hash(set: &DependencySet, idx: NodeIndex) -> CompositeHash {
    let mut hash = set.get(idx).local_hash();
    let mut visited = HashSet::new();
    visited.insert(idx);
    accumulate_descendants(set, idx, &mut hash, &mut visited);
    hash
}

fn accumulate_descendants(
    set: &DependencySet,
    idx: NodeIndex,
    hash: &mut CompositeHash,
    visited: &mut HashSet<NodeIndex>,
) {
    for &child in &set.get(idx).children {
        if !visited.insert(child) {
            continue;
        }
        let node = set.get(child);
        if node.flags.contains(NodeFlag::Use) {
            hash.accumulate(&node.local_hash());
            accumulate_descendants(set, child, hash, visited);
        }
    }
}

struct WorkItem {
    index: NodeIndex,
    reason: EnumSet<BuildReason>,
}

/// One dispatch's shared state: the set being built and the work queue.
struct BuildRun {
    builder: Arc<PipelineBuilder>,
    set: Arc<DependencySet>,
    queue: Mutex<VecDeque<WorkItem>>,
    total: usize,
    progress: AtomicUsize,
}

type ProductMemo = HashMap<u32, Vec<(Arc<dyn Asset>, Arc<dyn Asset>)>>;

/// Orchestrates incremental builds over a dependency set.
///
/// Analysis compares each node's composite hash against the persisted hash
/// store, propagates dirtiness up Use edges, and queues the dirty
/// Build-flagged nodes. Dispatch runs the queue across the worker pool when
/// it is large enough to be worth it, serving unchanged outputs from the
/// build cache.
pub struct PipelineBuilder {
    registry: Arc<PipelineRegistry>,
    source_db: Arc<dyn ObjectDatabase>,
    output_db: Arc<dyn ObjectDatabase>,
    codecs: Arc<AssetCodecs>,
    hash_store: Arc<HashStore>,
    read_cache: Arc<InstanceReadCache>,
    cache: Option<Arc<BuildCache>>,
    listener: Option<Arc<dyn BuildListener>>,
    pool: Arc<WorkerPool>,
    settings: BuildSettings,
    profiler: Profiler,

    // Product builds are memoized at most once per source object. The
    // reentrant lock is held across lookup and build so two nodes asking for
    // the same product serialize, while a product building another product
    // on the same thread can re-enter.
    built_products: ReentrantMutex<RefCell<ProductMemo>>,

    // Serializes output instance creation so relocation checks don't race.
    create_lock: Mutex<()>,

    stop: AtomicBool,
    succeeded: AtomicUsize,
    built: AtomicUsize,
    failed: AtomicUsize,
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,
}

impl PipelineBuilder {
    /// Creates a builder over the given collaborators, constructing its
    /// worker pool from the settings.
    pub fn new(
        registry: Arc<PipelineRegistry>,
        source_db: Arc<dyn ObjectDatabase>,
        output_db: Arc<dyn ObjectDatabase>,
        codecs: Arc<AssetCodecs>,
        hash_store: Arc<HashStore>,
        settings: BuildSettings,
    ) -> Result<Self, PoolError> {
        let pool = Arc::new(WorkerPool::new(settings.worker_threads)?);
        let read_cache = Arc::new(InstanceReadCache::new(Arc::clone(&source_db)));
        Ok(Self {
            registry,
            source_db,
            output_db,
            codecs,
            hash_store,
            read_cache,
            cache: None,
            listener: None,
            pool,
            settings,
            profiler: Profiler::default(),
            built_products: ReentrantMutex::new(RefCell::new(HashMap::new())),
            create_lock: Mutex::new(()),
            stop: AtomicBool::new(false),
            succeeded: AtomicUsize::new(0),
            built: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
            cache_misses: AtomicUsize::new(0),
        })
    }

    /// Attaches a build cache.
    pub fn with_cache(mut self, cache: Arc<BuildCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Attaches a progress listener.
    pub fn with_listener(mut self, listener: Arc<dyn BuildListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// A sequential walker sharing this builder's collaborators.
    pub fn sequential_walker(&self) -> SequentialWalker {
        SequentialWalker::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.source_db),
            Arc::clone(&self.read_cache),
            Arc::clone(&self.hash_store),
            self.settings.max_walk_depth,
        )
    }

    /// A parallel walker sharing this builder's collaborators and pool.
    pub fn parallel_walker(&self) -> ParallelWalker {
        ParallelWalker::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.source_db),
            Arc::clone(&self.read_cache),
            Arc::clone(&self.hash_store),
            &self.pool,
            self.settings.max_walk_depth,
        )
    }

    /// Requests a cooperative stop: queued nodes abort instead of building.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// The last build's outcome summary.
    pub fn report(&self) -> BuildReport {
        BuildReport {
            succeeded: self.succeeded.load(Ordering::SeqCst),
            built: self.built.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            cache_hits: self.cache_hits.load(Ordering::SeqCst),
            cache_misses: self.cache_misses.load(Ordering::SeqCst),
            timings: self.profiler.snapshot(),
        }
    }

    /// Builds every stale node of the set. Returns true when no node failed.
    ///
    /// With `rebuild` set, every buildable node is queued regardless of its
    /// recorded hash.
    pub fn build(self: &Arc<Self>, set: &Arc<DependencySet>, rebuild: bool) -> bool {
        self.stop.store(false, Ordering::SeqCst);
        self.profiler.reset();
        for counter in [
            &self.succeeded,
            &self.built,
            &self.failed,
            &self.cache_hits,
            &self.cache_misses,
        ] {
            counter.store(0, Ordering::SeqCst);
        }

        let queue = self.analyze(set, rebuild);
        let total = queue.len();
        let buildable = set
            .iter()
            .filter(|(_, n)| n.flags.contains(NodeFlag::Build) && !n.flags.contains(NodeFlag::Failed))
            .count();
        self.succeeded.store(buildable - total, Ordering::SeqCst);
        log::info!("building {total} of {buildable} outputs");

        let run = Arc::new(BuildRun {
            builder: Arc::clone(self),
            set: Arc::clone(set),
            queue: Mutex::new(VecDeque::from(queue)),
            total,
            progress: AtomicUsize::new(0),
        });

        let threads = self.pool.threads();
        if self.settings.threaded_build && total >= threads * 2 {
            let group = self.pool.group();
            for _ in 0..threads {
                let run = Arc::clone(&run);
                group.spawn(move || worker_loop(&run));
            }
            group.wait();
        } else {
            worker_loop(&run);
        }

        self.failed.load(Ordering::SeqCst) == 0
    }

    /// Decides which nodes need building and why.
    fn analyze(&self, set: &DependencySet, rebuild: bool) -> Vec<WorkItem> {
        let count = set.len();
        let mut reasons: Vec<EnumSet<BuildReason>> = vec![EnumSet::empty(); count];
        let mut hashes: Vec<CompositeHash> = vec![CompositeHash::default(); count];

        for (idx, node) in set.iter() {
            if node.flags.contains(NodeFlag::Failed) {
                continue;
            }
            let current = composite_hash(set, idx);
            hashes[idx.as_usize()] = current;
            if rebuild {
                reasons[idx.as_usize()] |= BuildReason::Forced;
                continue;
            }
            if self.hash_store.get_dependency(node.output_guid) != Some(current) {
                reasons[idx.as_usize()] |= BuildReason::SourceModified;
            }
        }

        // Dirtiness flows from a Use-flagged child to every node depending
        // on it, transitively.
        let mut parents: Vec<Vec<NodeIndex>> = vec![Vec::new(); count];
        for (idx, node) in set.iter() {
            for &child in &node.children {
                parents[child.as_usize()].push(idx);
            }
        }
        let mut worklist: Vec<NodeIndex> = set
            .indices()
            .filter(|i| !reasons[i.as_usize()].is_empty())
            .collect();
        while let Some(idx) = worklist.pop() {
            if !set.get(idx).flags.contains(NodeFlag::Use) {
                continue;
            }
            for &parent in &parents[idx.as_usize()] {
                let reason = &mut reasons[parent.as_usize()];
                if reason.contains(BuildReason::DependencyModified) {
                    continue;
                }
                let newly_dirty = reason.is_empty();
                *reason |= BuildReason::DependencyModified;
                if newly_dirty {
                    worklist.push(parent);
                }
            }
        }

        // Non-build nodes carry no outputs; recording their hash now is all
        // that is needed for the next session to see them as clean.
        for (idx, node) in set.iter() {
            if !node.flags.contains(NodeFlag::Build)
                && !node.flags.contains(NodeFlag::Failed)
                && !reasons[idx.as_usize()].is_empty()
            {
                self.hash_store
                    .set_dependency(node.output_guid, hashes[idx.as_usize()]);
            }
        }

        set.iter()
            .filter(|(idx, node)| {
                node.flags.contains(NodeFlag::Build)
                    && !node.flags.contains(NodeFlag::Failed)
                    && !reasons[idx.as_usize()].is_empty()
            })
            .map(|(idx, _)| WorkItem {
                index: idx,
                reason: reasons[idx.as_usize()],
            })
            .collect()
    }

    /// Builds one node: cache probe, pipeline dispatch, cache write, hash
    /// record. Ad-hoc (nested) builds pass `parent_sink` so their outputs
    /// fold into the parent's cache entry instead of their own.
    fn perform_build(
        self: &Arc<Self>,
        run: &Arc<BuildRun>,
        idx: NodeIndex,
        reason: EnumSet<BuildReason>,
        params: Option<&Arc<BuildParams>>,
        parent_sink: Option<&Mutex<Vec<InstanceHandle>>>,
    ) -> BuildResult {
        if self.is_stopped() {
            return BuildResult::Aborted;
        }

        let set = &run.set;
        let node = set.get(idx);
        let guid = node.output_guid;
        let current = composite_hash(set, idx);
        let top_level = parent_sink.is_none();

        if !node.flags.contains(NodeFlag::Build) {
            self.hash_store.set_dependency(guid, current);
            return BuildResult::Succeeded;
        }

        let Some(asset) = node.source_asset.clone() else {
            log::error!("output {guid} has no source object");
            return BuildResult::Failed;
        };
        let Some(descriptor) = self.registry.find(asset.type_tag()) else {
            log::error!("no pipeline registered for asset type {}", asset.type_tag());
            return BuildResult::Failed;
        };
        let pipeline = &descriptor.pipeline;

        let caching =
            self.settings.use_cache && params.is_none() && pipeline.should_cache();

        if caching {
            if let Some(cache) = &self.cache {
                if let Some(mut reader) = cache.get(guid, current.combined()) {
                    // An unchanged record means the outputs are already in
                    // the output database; only new or changed outputs need
                    // materializing from the entry.
                    let reuse = self.hash_store.get_dependency(guid) == Some(current);
                    match read_entry(&mut reader, self.output_db.as_ref(), &self.codecs, reuse) {
                        Ok(instances) => {
                            log::debug!("{guid} served from cache ({current})");
                            if let Some(sink) = parent_sink {
                                sink.lock().extend(instances);
                            }
                            if top_level {
                                self.cache_hits.fetch_add(1, Ordering::SeqCst);
                                self.hash_store.set_dependency(guid, current);
                            }
                            return BuildResult::Succeeded;
                        }
                        Err(e) => log::warn!("discarding corrupt cache entry for {guid}: {e}"),
                    }
                }
                if top_level {
                    self.cache_misses.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        let source_instance = match node.source_instance_guid {
            Some(source_guid) => match self.source_db.instance(source_guid) {
                Some(instance) => Some(instance),
                None => {
                    log::error!("source instance {source_guid} disappeared before build");
                    return BuildResult::Failed;
                }
            },
            None => None,
        };

        let sink = Mutex::new(Vec::new());
        let context = BuildContext {
            run,
            sink: &sink,
        };

        log::debug!(
            "building {guid} with '{}' (reason {reason:?})",
            node.pipeline_name
        );
        let started = Instant::now();
        let ok = pipeline.build_output(
            &context,
            set,
            node,
            source_instance.as_ref(),
            &asset,
            &node.output_path,
            guid,
            params,
            reason,
        );
        self.profiler.add(node.pipeline_name, started.elapsed());

        if !ok {
            if self.is_stopped() {
                return BuildResult::Aborted;
            }
            log::error!("pipeline '{}' failed to build {guid}", node.pipeline_name);
            return BuildResult::Failed;
        }

        let instances = sink.into_inner();
        if caching && top_level {
            if let Some(cache) = &self.cache {
                self.write_cache_entry(cache, guid, current.combined(), &instances);
            }
        }
        if let Some(sink) = parent_sink {
            sink.lock().extend(instances);
        }
        if top_level {
            self.hash_store.set_dependency(guid, current);
        }
        BuildResult::Succeeded
    }

    fn write_cache_entry(
        &self,
        cache: &BuildCache,
        guid: Guid,
        combined: u32,
        instances: &[InstanceHandle],
    ) {
        use std::io::Write;

        let Some(mut writer) = cache.put(guid, combined) else {
            return;
        };
        let written = write_entry(&mut writer, instances)
            .and_then(|()| writer.flush().map_err(CacheError::from));
        drop(writer);
        match written {
            Ok(()) => {
                cache.commit(guid, combined);
            }
            Err(e) => {
                log::warn!("unable to write cache entry for {guid}: {e}");
                cache.discard(guid, combined);
            }
        }
    }
}

fn worker_loop(run: &Arc<BuildRun>) {
    let builder = &run.builder;
    loop {
        let Some(item) = run.queue.lock().pop_front() else {
            break;
        };
        let progress = run.progress.fetch_add(1, Ordering::SeqCst) + 1;
        let node = run.set.get(item.index);

        if let Some(listener) = &builder.listener {
            listener.begin_build(progress, run.total, node);
        }
        let result = builder.perform_build(run, item.index, item.reason, None, None);
        match result {
            BuildResult::Succeeded => {
                builder.succeeded.fetch_add(1, Ordering::SeqCst);
                builder.built.fetch_add(1, Ordering::SeqCst);
            }
            BuildResult::Failed => {
                builder.failed.fetch_add(1, Ordering::SeqCst);
            }
            BuildResult::Aborted => {}
        }
        if let Some(listener) = &builder.listener {
            listener.end_build(progress, run.total, node, result);
        }
    }
}

/// The database access surface handed to one node's pipeline.
struct BuildContext<'a> {
    run: &'a Arc<BuildRun>,
    sink: &'a Mutex<Vec<InstanceHandle>>,
}

impl BuildAccess for BuildContext<'_> {
    fn create_output_instance(&self, path: &str, guid: Guid) -> Result<InstanceHandle, DbError> {
        if guid.is_nil() {
            return Err(DbError::InvalidGuid { guid });
        }
        let builder = &self.run.builder;
        let _guard = builder.create_lock.lock();
        if let Some(existing) = builder.output_db.instance(guid) {
            if existing.path() != path {
                // The output moved; the guid follows it.
                existing.checkout();
                if !existing.remove() {
                    return Err(DbError::ReplaceFailed {
                        guid,
                        path: existing.path(),
                    });
                }
            }
        }
        let instance = builder.output_db.create_instance(path, guid)?;
        self.sink.lock().push(instance.clone());
        Ok(instance)
    }

    fn get_object_read_only(&self, guid: Guid) -> Option<Arc<dyn Asset>> {
        self.run.builder.read_cache.get_object_read_only(guid)
    }

    fn data_access_cache(&self) -> Arc<InstanceReadCache> {
        Arc::clone(&self.run.builder.read_cache)
    }

    fn build_product(
        &self,
        asset: &Arc<dyn Asset>,
        params: Option<&Arc<BuildParams>>,
    ) -> Option<Arc<dyn Asset>> {
        let builder = &self.run.builder;
        let descriptor = builder.registry.find(asset.type_tag())?;
        let hash = descriptor.pipeline.hash_asset(asset.as_ref());

        let memo = builder.built_products.lock();
        {
            let memo = memo.borrow();
            if let Some(products) = memo.get(&hash) {
                for (source, product) in products {
                    if Arc::ptr_eq(source, asset) {
                        return Some(Arc::clone(product));
                    }
                }
            }
        }

        let product = descriptor.pipeline.build_product(self, asset, params)?;
        memo.borrow_mut()
            .entry(hash)
            .or_default()
            .push((Arc::clone(asset), Arc::clone(&product)));
        Some(product)
    }

    fn build_ad_hoc(
        &self,
        asset: Arc<dyn Asset>,
        output_path: &str,
        output_guid: Guid,
        params: Option<&Arc<BuildParams>>,
    ) -> bool {
        use kiln_pipeline::DependencyWalker;

        let builder = &self.run.builder;
        let walker = builder.sequential_walker();
        walker.add_output(None, asset, output_path, output_guid, NodeFlag::Build.into());
        let (set, ok) = walker.into_dependency_set();
        if !ok {
            log::error!("ad-hoc dependency walk failed for {output_guid}");
            return false;
        }

        let set = Arc::new(set);
        let run = Arc::new(BuildRun {
            builder: Arc::clone(builder),
            set: Arc::clone(&set),
            queue: Mutex::new(VecDeque::new()),
            total: 0,
            progress: AtomicUsize::new(0),
        });

        // Reverse discovery order builds leaves before the nodes that
        // consume them. Only the root receives the caller's parameters.
        for idx in set.indices().rev() {
            let node_params = if idx.as_usize() == 0 { params } else { None };
            let result = builder.perform_build(
                &run,
                idx,
                BuildReason::SourceModified.into(),
                node_params,
                Some(self.sink),
            );
            if result != BuildResult::Succeeded {
                return false;
            }
        }
        true
    }
}
