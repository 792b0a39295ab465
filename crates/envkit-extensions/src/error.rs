//! Error taxonomy for the lifecycle engine
//!
//! Each engine phase has its own enum so callers can match a whole phase
//! (`Error::Gate(_)`) or a single failure. Every message names the
//! extension ids involved and what has to change for the call to succeed.

use std::path::PathBuf;
use std::time::Duration;

use envkit_catalog::ResourceTag;

use crate::rate_limit::OperationClass;
use crate::template::TemplateError;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level engine error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Fs(#[from] envkit_fs::Error),

    #[error(transparent)]
    Catalog(#[from] envkit_catalog::Error),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    /// No machine-size table exists for the provider.
    #[error("unknown provider '{provider}' (known providers: {known})")]
    UnknownProvider { provider: String, known: String },

    /// A tracing subscriber could not be installed.
    #[error("failed to initialize logging: {0}")]
    Logging(String),
}

impl Error {
    /// Short name of the phase that produced this error, recorded in audit
    /// records.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Fs(_) | Self::Catalog(_) => "io",
            Self::Resolution(_) => "resolve",
            Self::Gate(GateError::RateLimited { .. }) => "rate-limit",
            Self::Gate(_) => "collision",
            Self::Execution(e) => e.stage(),
            Self::Concurrency(_) => "lock",
            Self::UnknownProvider { .. } => "sizing",
            Self::Logging(_) => "logging",
        }
    }
}

/// Failures while turning a request into a plan.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    /// The dependency graph has a cycle; lists every node on it.
    #[error("dependency cycle detected among: {}", .members.join(", "))]
    CycleDetected { members: Vec<String> },

    #[error("extension '{extension}' depends on '{dependency}', which is not in the catalog")]
    UnknownDependency {
        extension: String,
        dependency: String,
    },

    #[error("unknown extension '{0}'")]
    UnknownExtension(String),

    #[error("unknown profile '{0}'")]
    UnknownProfile(String),

    #[error(
        "cannot remove '{extension}': active extensions depend on it ({}); remove them first or use cascade",
        .dependents.join(", ")
    )]
    DependentsStillActive {
        extension: String,
        dependents: Vec<String>,
    },
}

/// Refusals raised before anything is executed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error(
        "'{candidate}' conflicts with active extension '{blocker}'; remove '{blocker}' before installing '{candidate}'"
    )]
    ExtensionConflict { candidate: String, blocker: String },

    #[error(
        "'{candidate}' wants resource '{resource}' already claimed by '{owner}' with no declared compatibility; remove '{owner}' or install with an explicit ownership override"
    )]
    UnknownOwnershipConflict {
        candidate: String,
        owner: String,
        resource: ResourceTag,
    },

    #[error("actor '{actor}' exceeded the {operation} rate limit; retry after {}s", .retry_after.as_secs())]
    RateLimited {
        actor: String,
        operation: OperationClass,
        retry_after: Duration,
    },
}

/// Failures while running an install, removal, or validation.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("script path '{path}' for '{extension}' rejected: {reason}")]
    PathTraversalRejected {
        extension: String,
        path: String,
        reason: String,
    },

    #[error("script '{}' for '{extension}' does not exist", .path.display())]
    ScriptNotFound { extension: String, path: PathBuf },

    #[error("required secret '{secret}' for '{extension}' is unavailable")]
    SecretUnavailable { extension: String, secret: String },

    #[error("'{extension}' {step} exceeded its timeout of {}s", .timeout.as_secs())]
    InstallTimeout {
        extension: String,
        step: String,
        timeout: Duration,
    },

    #[error("'{extension}' {step} failed (exit code: {exit_code:?}): {stderr_tail}")]
    InstallFailed {
        extension: String,
        step: String,
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    #[error("validation of '{extension}' failed for command '{command}': {reason}")]
    ValidationFailed {
        extension: String,
        command: String,
        reason: String,
    },

    #[error("invalid package '{package}' for '{extension}': {reason}")]
    InvalidPackageSpec {
        extension: String,
        package: String,
        reason: String,
    },

    #[error("template for '{extension}' failed: {source}")]
    Template {
        extension: String,
        #[source]
        source: TemplateError,
    },

    #[error("removing '{extension}' deletes user data; confirm the removal to proceed")]
    ConfirmationRequired { extension: String },

    #[error("'{extension}' is protected and cannot be removed")]
    ProtectedExtension { extension: String },

    #[error("'{extension}' is not installed")]
    NotInstalled { extension: String },
}

impl ExecutionError {
    fn stage(&self) -> &'static str {
        match self {
            Self::PathTraversalRejected { .. } | Self::ScriptNotFound { .. } => "sandbox",
            Self::SecretUnavailable { .. } => "secrets",
            Self::ValidationFailed { .. } => "validation",
            Self::ConfirmationRequired { .. }
            | Self::ProtectedExtension { .. }
            | Self::NotInstalled { .. } => "precondition",
            Self::InstallTimeout { .. }
            | Self::InstallFailed { .. }
            | Self::InvalidPackageSpec { .. }
            | Self::Template { .. } => "execute",
        }
    }
}

/// Contention on shared workspace state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConcurrencyError {
    #[error("manifest at {} is locked by another process (waited {waited:?})", .path.display())]
    ManifestLocked { path: PathBuf, waited: Duration },

    #[error("rate-limit state at {} is locked by another process (waited {waited:?})", .path.display())]
    RateLimitLocked { path: PathBuf, waited: Duration },
}
