use std::path::PathBuf;

/// Errors raised while loading or validating the extension catalog.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Filesystem or parse failure in the underlying store.
    #[error(transparent)]
    Fs(#[from] envkit_fs::Error),

    /// Catalog root directory does not exist.
    #[error("extension catalog not found: {0}")]
    CatalogNotFound(PathBuf),

    /// Extension directory has no definition file.
    #[error("no extension definition in {0}")]
    DefinitionNotFound(PathBuf),

    /// Two definitions share the same id.
    #[error("duplicate extension id '{0}'")]
    DuplicateId(String),

    /// Invalid extension id.
    #[error("invalid extension id '{id}': {reason}")]
    InvalidId { id: String, reason: String },

    /// Invalid semver version string.
    #[error("invalid version '{version}' for extension '{id}': {source}")]
    InvalidVersion {
        id: String,
        version: String,
        source: semver::Error,
    },

    /// Directory name and declared id disagree.
    #[error("extension in directory '{dir}' declares id '{id}'")]
    IdMismatch { dir: String, id: String },

    /// Extension lists itself in a relation field.
    #[error("extension '{id}' references itself in {field}")]
    SelfReference { id: String, field: &'static str },

    /// Profile names an extension the catalog does not contain.
    #[error("profile '{profile}' references unknown extension '{member}'")]
    UnknownProfileMember { profile: String, member: String },
}

pub type Result<T> = std::result::Result<T, Error>;
