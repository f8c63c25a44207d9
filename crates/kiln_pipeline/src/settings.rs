//! TOML-backed build settings.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Errors that can occur when loading or validating a `kiln.toml` settings
/// file.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// An I/O error occurred while reading the settings file.
    #[error("failed to read settings: {0}")]
    IoError(#[from] std::io::Error),

    /// The TOML content could not be parsed.
    #[error("failed to parse settings: {0}")]
    ParseError(String),

    /// A settings value failed validation.
    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Build session configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildSettings {
    /// Dispatch builds across worker threads when the workset is large
    /// enough.
    pub threaded_build: bool,

    /// Worker thread count; 0 means one per logical core.
    pub worker_threads: usize,

    /// Maximum dependency walk depth.
    pub max_walk_depth: u32,

    /// Serve unchanged outputs from the build cache. Ignored when no
    /// `cache_dir` is configured.
    pub use_cache: bool,

    /// Root directory of the on-disk build cache.
    pub cache_dir: Option<PathBuf>,

    /// Free-form per-pipeline settings, read in `Pipeline::create`.
    pub custom: HashMap<String, toml::Value>,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            threaded_build: true,
            worker_threads: 0,
            max_walk_depth: 64,
            use_cache: true,
            cache_dir: None,
            custom: HashMap::new(),
        }
    }
}

/// Loads and validates `<project_dir>/kiln.toml`.
pub fn load_settings(project_dir: &Path) -> Result<BuildSettings, SettingsError> {
    let path = project_dir.join("kiln.toml");
    let content = std::fs::read_to_string(&path)?;
    load_settings_from_str(&content)
}

/// Parses and validates settings from a string.
///
/// Useful for testing without filesystem dependencies.
pub fn load_settings_from_str(content: &str) -> Result<BuildSettings, SettingsError> {
    let settings: BuildSettings =
        toml::from_str(content).map_err(|e| SettingsError::ParseError(e.to_string()))?;
    validate_settings(&settings)?;
    Ok(settings)
}

fn validate_settings(settings: &BuildSettings) -> Result<(), SettingsError> {
    if settings.max_walk_depth == 0 {
        return Err(SettingsError::ValidationError(
            "max_walk_depth must be at least 1".to_string(),
        ));
    }
    Ok(())
}
