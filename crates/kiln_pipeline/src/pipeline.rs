//! The pipeline trait.

use std::sync::Arc;

use enumset::EnumSet;
use kiln_common::{AssetTypeTag, BuildReason, Guid};
use kiln_db::{Asset, InstanceHandle};
use kiln_graph::{DependencyNode, DependencySet, NodeIndex};

use crate::access::{BuildAccess, BuildParams};
use crate::settings::BuildSettings;
use crate::walker::DependencyWalker;

/// Converts source assets of declared types into output instances.
///
/// Implementations are registered once per build session and shared across
/// worker threads, so all methods take `&self`. Version bumps in
/// [`version`](Pipeline::version) invalidate every previously cached output
/// of the pipeline.
pub trait Pipeline: Send + Sync {
    /// Stable pipeline name, used in logs and hashing.
    fn name(&self) -> &'static str;

    /// Pipeline version; folded into the pipeline hash.
    fn version(&self) -> u32;

    /// Asset type tags this pipeline accepts.
    fn asset_types(&self) -> &'static [AssetTypeTag];

    /// One-time initialization from settings. Returning false aborts
    /// registration.
    fn create(&mut self, settings: &BuildSettings) -> bool {
        let _ = settings;
        true
    }

    /// Whether outputs of this pipeline may be served from the build cache.
    fn should_cache(&self) -> bool {
        true
    }

    /// Hashes the source object graph. The result feeds the node's
    /// source-asset hash.
    fn hash_asset(&self, asset: &dyn Asset) -> u32;

    /// Declares everything the build of `output_guid` depends on by calling
    /// back into `walker`. Returning false marks the node as failed.
    #[allow(clippy::too_many_arguments)]
    fn build_dependencies(
        &self,
        walker: &dyn DependencyWalker,
        parent: Option<NodeIndex>,
        source_instance: Option<&InstanceHandle>,
        source_asset: &Arc<dyn Asset>,
        output_path: &str,
        output_guid: Guid,
    ) -> bool;

    /// Builds the node's output instances through `access`. Returning false
    /// marks the build failed; any instances already committed stay put.
    #[allow(clippy::too_many_arguments)]
    fn build_output(
        &self,
        access: &dyn BuildAccess,
        set: &DependencySet,
        node: &DependencyNode,
        source_instance: Option<&InstanceHandle>,
        source_asset: &Arc<dyn Asset>,
        output_path: &str,
        output_guid: Guid,
        params: Option<&Arc<BuildParams>>,
        reason: EnumSet<BuildReason>,
    ) -> bool;

    /// Builds a transient, non-persisted product from an object graph.
    /// The default declines.
    fn build_product(
        &self,
        access: &dyn BuildAccess,
        asset: &Arc<dyn Asset>,
        params: Option<&Arc<BuildParams>>,
    ) -> Option<Arc<dyn Asset>> {
        let _ = (access, asset, params);
        None
    }
}
