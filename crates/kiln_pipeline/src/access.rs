//! The build-time database access surface handed to pipelines.

use std::any::Any;
use std::sync::Arc;

use kiln_common::Guid;
use kiln_db::{Asset, DbError, InstanceHandle, InstanceReadCache};

/// Opaque per-build parameters passed through to pipelines.
pub type BuildParams = dyn Any + Send + Sync;

/// What a pipeline may do while building one node.
///
/// Handed to [`build_output`](crate::Pipeline::build_output) so pipelines can
/// create output instances, read source objects, and request nested builds
/// without seeing the orchestrator itself.
pub trait BuildAccess {
    /// Creates an uncommitted output instance at `path`.
    ///
    /// If an instance with `guid` already exists at a different path it is
    /// relocated. The instance is tracked so it lands in the node's cache
    /// entry when committed.
    fn create_output_instance(&self, path: &str, guid: Guid) -> Result<InstanceHandle, DbError>;

    /// Reads a source object by guid through the per-build cache.
    fn get_object_read_only(&self, guid: Guid) -> Option<Arc<dyn Asset>>;

    /// The shared per-build read cache, for pipelines that batch reads.
    fn data_access_cache(&self) -> Arc<InstanceReadCache>;

    /// Builds a transient product from an object graph, memoized for the
    /// duration of the top-level build. Returns `None` when no pipeline
    /// accepts the object or the product build fails.
    fn build_product(
        &self,
        asset: &Arc<dyn Asset>,
        params: Option<&Arc<BuildParams>>,
    ) -> Option<Arc<dyn Asset>>;

    /// Synchronously builds an object graph as a nested output of the
    /// current node. Outputs are folded into the current node's cache entry.
    fn build_ad_hoc(
        &self,
        asset: Arc<dyn Asset>,
        output_path: &str,
        output_guid: Guid,
        params: Option<&Arc<BuildParams>>,
    ) -> bool;
}
