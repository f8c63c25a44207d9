//! Shared fixtures: a texture pipeline with no dependencies and a model
//! pipeline that depends on textures.

use std::any::Any;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use enumset::EnumSet;
use kiln_build::{BuildListener, PipelineBuilder};
use kiln_cache::{BuildCache, HashStore};
use kiln_common::{AssetTypeTag, BuildReason, ContentHasher, Guid, NodeFlag};
use kiln_db::{
    encode_asset, Asset, AssetCodecs, DbError, Instance, InstanceHandle, MemoryDatabase,
    ObjectDatabase,
};
use kiln_graph::{DependencyNode, DependencySet, NodeIndex};
use kiln_pipeline::{
    BuildAccess, BuildParams, BuildSettings, DependencyWalker, Pipeline, PipelineRegistry,
};
use serde::{Deserialize, Serialize};

pub const TEXTURE_TAG: AssetTypeTag = AssetTypeTag::new("support.Texture");
pub const MODEL_TAG: AssetTypeTag = AssetTypeTag::new("support.Model");

const TEXTURE_TYPES: &[AssetTypeTag] = &[TEXTURE_TAG];
const MODEL_TYPES: &[AssetTypeTag] = &[MODEL_TAG];

/// Guid used by the model pipeline's nested (ad-hoc) texture output.
pub const AD_HOC_GUID: Guid = Guid::from_u128(0xadc);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Serialize, Deserialize, Clone)]
pub struct TextureAsset {
    pub name: String,
    pub brightness: u32,
}

impl Asset for TextureAsset {
    fn type_tag(&self) -> AssetTypeTag {
        TEXTURE_TAG
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn encode(&self) -> Result<Vec<u8>, DbError> {
        encode_asset(self)
    }
}

#[derive(Serialize, Deserialize, Clone)]
pub struct ModelAsset {
    pub name: String,
    pub textures: Vec<Guid>,
}

impl Asset for ModelAsset {
    fn type_tag(&self) -> AssetTypeTag {
        MODEL_TAG
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn encode(&self) -> Result<Vec<u8>, DbError> {
        encode_asset(self)
    }
}

pub struct TexturePipeline {
    pub version: u32,
    pub builds: Arc<AtomicUsize>,
    pub product_builds: Arc<AtomicUsize>,
    pub fail_builds: Arc<AtomicBool>,
    pub watch_dir: Option<PathBuf>,
}

impl Pipeline for TexturePipeline {
    fn name(&self) -> &'static str {
        "support.TexturePipeline"
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn asset_types(&self) -> &'static [AssetTypeTag] {
        TEXTURE_TYPES
    }

    fn hash_asset(&self, asset: &dyn Asset) -> u32 {
        let texture = asset
            .as_any()
            .downcast_ref::<TextureAsset>()
            .expect("texture pipeline fed a non-texture");
        ContentHasher::hash_object(texture).expect("texture is serializable")
    }

    fn build_dependencies(
        &self,
        walker: &dyn DependencyWalker,
        parent: Option<NodeIndex>,
        _source_instance: Option<&InstanceHandle>,
        _source_asset: &Arc<dyn Asset>,
        _output_path: &str,
        _output_guid: Guid,
    ) -> bool {
        if let Some(dir) = &self.watch_dir {
            walker.add_file(parent, dir, "palette.bin");
        }
        true
    }

    fn build_output(
        &self,
        access: &dyn BuildAccess,
        _set: &DependencySet,
        _node: &DependencyNode,
        _source_instance: Option<&InstanceHandle>,
        source_asset: &Arc<dyn Asset>,
        output_path: &str,
        output_guid: Guid,
        _params: Option<&Arc<BuildParams>>,
        _reason: EnumSet<BuildReason>,
    ) -> bool {
        if self.fail_builds.load(Ordering::SeqCst) {
            return false;
        }
        let Ok(instance) = access.create_output_instance(output_path, output_guid) else {
            return false;
        };
        if instance.set_object(source_asset.clone()).is_err() {
            return false;
        }
        if instance.write_data("pixels", b"compressed pixels").is_err() {
            return false;
        }
        instance.commit();
        self.builds.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn build_product(
        &self,
        _access: &dyn BuildAccess,
        asset: &Arc<dyn Asset>,
        _params: Option<&Arc<BuildParams>>,
    ) -> Option<Arc<dyn Asset>> {
        let texture = asset.as_any().downcast_ref::<TextureAsset>()?;
        self.product_builds.fetch_add(1, Ordering::SeqCst);
        Some(Arc::new(TextureAsset {
            name: format!("{}_product", texture.name),
            brightness: texture.brightness + 100,
        }))
    }
}

pub struct ModelPipeline {
    pub builds: Arc<AtomicUsize>,
    pub ad_hoc: bool,
    pub use_products: bool,
}

impl Pipeline for ModelPipeline {
    fn name(&self) -> &'static str {
        "support.ModelPipeline"
    }

    fn version(&self) -> u32 {
        1
    }

    fn asset_types(&self) -> &'static [AssetTypeTag] {
        MODEL_TYPES
    }

    fn hash_asset(&self, asset: &dyn Asset) -> u32 {
        let model = asset
            .as_any()
            .downcast_ref::<ModelAsset>()
            .expect("model pipeline fed a non-model");
        ContentHasher::hash_object(model).expect("model is serializable")
    }

    fn build_dependencies(
        &self,
        walker: &dyn DependencyWalker,
        parent: Option<NodeIndex>,
        _source_instance: Option<&InstanceHandle>,
        source_asset: &Arc<dyn Asset>,
        _output_path: &str,
        _output_guid: Guid,
    ) -> bool {
        let Some(model) = source_asset.as_any().downcast_ref::<ModelAsset>() else {
            return false;
        };
        for &texture in &model.textures {
            walker.add_instance(parent, texture, NodeFlag::Build | NodeFlag::Use);
        }
        true
    }

    fn build_output(
        &self,
        access: &dyn BuildAccess,
        _set: &DependencySet,
        _node: &DependencyNode,
        _source_instance: Option<&InstanceHandle>,
        source_asset: &Arc<dyn Asset>,
        output_path: &str,
        output_guid: Guid,
        _params: Option<&Arc<BuildParams>>,
        _reason: EnumSet<BuildReason>,
    ) -> bool {
        let Some(model) = source_asset.as_any().downcast_ref::<ModelAsset>() else {
            return false;
        };

        if self.use_products {
            for &texture in &model.textures {
                let Some(object) = access.get_object_read_only(texture) else {
                    return false;
                };
                if access.build_product(&object, None).is_none() {
                    return false;
                }
            }
        }

        if self.ad_hoc {
            let nested = TextureAsset {
                name: "generated".to_string(),
                brightness: 7,
            };
            if !access.build_ad_hoc(Arc::new(nested), "adhoc/texture", AD_HOC_GUID, None) {
                return false;
            }
        }

        let Ok(instance) = access.create_output_instance(output_path, output_guid) else {
            return false;
        };
        if instance.set_object(source_asset.clone()).is_err() {
            return false;
        }
        instance.commit();
        self.builds.fetch_add(1, Ordering::SeqCst);
        true
    }
}

/// Everything a scenario needs: databases, stores, pipelines, builder.
pub struct Harness {
    pub source: Arc<MemoryDatabase>,
    pub output: Arc<MemoryDatabase>,
    pub hash_store: Arc<HashStore>,
    pub builder: Arc<PipelineBuilder>,
    pub texture_builds: Arc<AtomicUsize>,
    pub model_builds: Arc<AtomicUsize>,
    pub product_builds: Arc<AtomicUsize>,
    pub fail_texture_builds: Arc<AtomicBool>,
}

/// Knobs for constructing a [`Harness`]; defaults give a plain uncached
/// single-threaded setup.
#[derive(Default)]
pub struct HarnessOptions {
    pub source: Option<Arc<MemoryDatabase>>,
    pub hash_store: Option<Arc<HashStore>>,
    pub cache: Option<Arc<BuildCache>>,
    pub listener: Option<Arc<dyn BuildListener>>,
    pub settings: Option<BuildSettings>,
    pub texture_watch_dir: Option<PathBuf>,
    pub texture_version: Option<u32>,
    pub model_ad_hoc: bool,
    pub model_use_products: bool,
}

impl Harness {
    pub fn new(options: HarnessOptions) -> Self {
        init_logging();

        let settings = options.settings.unwrap_or_else(|| BuildSettings {
            threaded_build: false,
            worker_threads: 2,
            ..BuildSettings::default()
        });

        let texture_builds = Arc::new(AtomicUsize::new(0));
        let model_builds = Arc::new(AtomicUsize::new(0));
        let product_builds = Arc::new(AtomicUsize::new(0));
        let fail_texture_builds = Arc::new(AtomicBool::new(false));

        let mut registry = PipelineRegistry::new();
        registry
            .register(
                Box::new(TexturePipeline {
                    version: options.texture_version.unwrap_or(1),
                    builds: texture_builds.clone(),
                    product_builds: product_builds.clone(),
                    fail_builds: fail_texture_builds.clone(),
                    watch_dir: options.texture_watch_dir,
                }),
                &settings,
            )
            .unwrap();
        registry
            .register(
                Box::new(ModelPipeline {
                    builds: model_builds.clone(),
                    ad_hoc: options.model_ad_hoc,
                    use_products: options.model_use_products,
                }),
                &settings,
            )
            .unwrap();

        let mut codecs = AssetCodecs::new();
        codecs.register::<TextureAsset>(TEXTURE_TAG);
        codecs.register::<ModelAsset>(MODEL_TAG);

        let source = options
            .source
            .unwrap_or_else(|| Arc::new(MemoryDatabase::new()));
        let output = Arc::new(MemoryDatabase::new());
        let hash_store = options.hash_store.unwrap_or_else(|| Arc::new(HashStore::new()));

        let mut builder = PipelineBuilder::new(
            Arc::new(registry),
            source.clone(),
            output.clone(),
            Arc::new(codecs),
            hash_store.clone(),
            settings,
        )
        .unwrap();
        if let Some(cache) = options.cache {
            builder = builder.with_cache(cache);
        }
        if let Some(listener) = options.listener {
            builder = builder.with_listener(listener);
        }

        Self {
            source,
            output,
            hash_store,
            builder: Arc::new(builder),
            texture_builds,
            model_builds,
            product_builds,
            fail_texture_builds,
        }
    }

    /// Walks the given source instances sequentially; panics on a poisoned
    /// walk.
    pub fn walk(&self, roots: &[Guid]) -> Arc<DependencySet> {
        let walker = self.builder.sequential_walker();
        for &root in roots {
            walker.add_instance(None, root, NodeFlag::Build | NodeFlag::Use);
        }
        let (set, ok) = walker.into_dependency_set();
        assert!(ok, "dependency walk failed");
        Arc::new(set)
    }

    /// Walks roots sequentially without asserting success.
    pub fn try_walk(&self, roots: &[Guid]) -> (DependencySet, bool) {
        let walker = self.builder.sequential_walker();
        for &root in roots {
            walker.add_instance(None, root, NodeFlag::Build | NodeFlag::Use);
        }
        walker.into_dependency_set()
    }
}

pub fn guid(n: u128) -> Guid {
    Guid::from_u128(n)
}

pub fn add_texture(db: &MemoryDatabase, path: &str, id: Guid, name: &str, brightness: u32) {
    let instance = db.create_instance(path, id).unwrap();
    instance
        .set_object(Arc::new(TextureAsset {
            name: name.to_string(),
            brightness,
        }))
        .unwrap();
    instance.commit();
}

pub fn add_model(db: &MemoryDatabase, path: &str, id: Guid, name: &str, textures: &[Guid]) {
    let instance = db.create_instance(path, id).unwrap();
    instance
        .set_object(Arc::new(ModelAsset {
            name: name.to_string(),
            textures: textures.to_vec(),
        }))
        .unwrap();
    instance.commit();
}
