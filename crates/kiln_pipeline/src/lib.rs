//! Pipeline contracts for the kiln build system.
//!
//! A pipeline converts one type of source asset into output instances. This
//! crate defines the [`Pipeline`] trait, the [`DependencyWalker`] and
//! [`BuildAccess`] collaborator traits consumed by pipeline implementations,
//! the [`PipelineRegistry`] that resolves asset types to pipelines, and the
//! TOML-backed [`BuildSettings`].

#![warn(missing_docs)]

pub mod access;
pub mod pipeline;
pub mod registry;
pub mod settings;
pub mod walker;

pub use access::{BuildAccess, BuildParams};
pub use pipeline::Pipeline;
pub use registry::{PipelineDescriptor, PipelineRegistry, RegistryError};
pub use settings::{load_settings, load_settings_from_str, BuildSettings, SettingsError};
pub use walker::DependencyWalker;
