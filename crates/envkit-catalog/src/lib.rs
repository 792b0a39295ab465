//! Extension catalog for envkit.
//!
//! This crate provides the extension definition schema, profile schema,
//! and the immutable [`Catalog`] snapshot the lifecycle engine consumes.

pub mod catalog;
pub mod definition;
pub mod error;
pub mod profile;

pub use catalog::{Catalog, DanglingReference};
pub use definition::{
    ExtensionCategory, ExtensionDefinition, HybridStep, InitHook, InstallMethod, InstallSpec,
    PackageManager, PackageStep, RemoveSpec, ResourceAccess, ResourceNeeds, ResourceTag,
    ScriptStep, SecretRef, SharedResource, TemplateMode, TemplateStep, ValidationCommand,
    ValidationSpec, validate_id,
};
pub use error::{Error, Result};
pub use profile::Profile;
