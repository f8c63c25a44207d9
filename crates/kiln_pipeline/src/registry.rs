//! Pipeline registration and lookup.

use std::collections::HashMap;
use std::sync::Arc;

use kiln_common::{AssetTypeTag, ContentHasher};

use crate::pipeline::Pipeline;
use crate::settings::BuildSettings;

/// Errors raised while registering pipelines.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A pipeline's `create` hook returned false.
    #[error("pipeline '{name}' failed to initialize")]
    CreateFailed {
        /// The pipeline's name.
        name: &'static str,
    },

    /// Two pipelines claimed the same asset type.
    #[error("asset type {tag} claimed by both '{existing}' and '{name}'")]
    DuplicateAssetType {
        /// The contested tag.
        tag: AssetTypeTag,
        /// The pipeline already registered for the tag.
        existing: &'static str,
        /// The pipeline attempting to register.
        name: &'static str,
    },
}

/// A registered pipeline with its precomputed hash.
pub struct PipelineDescriptor {
    /// The pipeline itself.
    pub pipeline: Arc<dyn Pipeline>,

    /// Hash of the pipeline's name and version. Any change to either
    /// invalidates cached outputs.
    pub hash: u32,
}

/// Maps asset type tags to the pipeline that builds them.
///
/// Populated once at session start; lookups during walks and builds are
/// read-only and lock-free.
#[derive(Default)]
pub struct PipelineRegistry {
    by_type: HashMap<AssetTypeTag, Arc<PipelineDescriptor>>,
}

impl PipelineRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Initializes a pipeline and registers it for all its asset types.
    pub fn register(
        &mut self,
        mut pipeline: Box<dyn Pipeline>,
        settings: &BuildSettings,
    ) -> Result<(), RegistryError> {
        if !pipeline.create(settings) {
            return Err(RegistryError::CreateFailed {
                name: pipeline.name(),
            });
        }

        let name = pipeline.name();
        let hash = ContentHasher::hash_bytes(name.as_bytes()).wrapping_add(pipeline.version());
        let descriptor = Arc::new(PipelineDescriptor {
            pipeline: Arc::from(pipeline),
            hash,
        });

        for &tag in descriptor.pipeline.asset_types() {
            if let Some(existing) = self.by_type.get(&tag) {
                return Err(RegistryError::DuplicateAssetType {
                    tag,
                    existing: existing.pipeline.name(),
                    name,
                });
            }
            self.by_type.insert(tag, descriptor.clone());
        }
        Ok(())
    }

    /// Finds the pipeline registered for an asset type.
    pub fn find(&self, tag: AssetTypeTag) -> Option<Arc<PipelineDescriptor>> {
        self.by_type.get(&tag).cloned()
    }

    /// Number of registered asset types.
    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    /// True when no pipeline is registered.
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}
