//! The dependency walker consumed by `Pipeline::build_dependencies`.

use std::path::Path;
use std::sync::Arc;

use enumset::EnumSet;
use kiln_common::{AssetTypeTag, Guid, NodeFlag};
use kiln_db::Asset;
use kiln_graph::NodeIndex;

/// Records the dependencies a pipeline declares for a source asset.
///
/// Pipelines receive a walker and their node's index during
/// [`build_dependencies`](crate::Pipeline::build_dependencies) and call back
/// into it for every output, referenced instance, embedded object and
/// external file the build of that node depends on. The `parent` argument
/// threads the declaring node through nested calls; `None` declares a root.
pub trait DependencyWalker {
    /// Folds an embedded object's hash contribution into `parent` and
    /// recurses into the object's own declared dependencies at the same
    /// depth. No node is created.
    fn add_asset(&self, parent: Option<NodeIndex>, asset: &Arc<dyn Asset>);

    /// Declares an output instance produced from an in-memory object graph.
    fn add_output(
        &self,
        parent: Option<NodeIndex>,
        asset: Arc<dyn Asset>,
        output_path: &str,
        output_guid: Guid,
        flags: EnumSet<NodeFlag>,
    );

    /// Declares a dependency on the output of another source instance,
    /// looked up by guid in the source database.
    fn add_instance(&self, parent: Option<NodeIndex>, instance_guid: Guid, flags: EnumSet<NodeFlag>);

    /// Declares a dependency on an external file, resolved against
    /// `base_path`.
    fn add_file(&self, parent: Option<NodeIndex>, base_path: &Path, file_name: &str);

    /// Folds the hash of the pipeline registered for `tag` into `parent`
    /// without declaring any instance dependency.
    fn add_pipeline_of(&self, parent: Option<NodeIndex>, tag: AssetTypeTag);

    /// Blocks until all pending walk work has drained. Returns false when
    /// any part of the walk failed.
    fn wait_until_finished(&self) -> bool;
}
