//! Extension lifecycle engine for envkit.
//!
//! This crate resolves install and removal plans, gates candidates against
//! the active extension set, runs guarded installs, bounds mutating
//! operations per actor, sizes infrastructure for a plan, and runs project
//! initialization hooks. [`Engine`] is the entry point.

pub mod audit;
pub mod collision;
pub mod config;
pub mod dependency;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod installer;
pub mod logging;
pub mod manifest;
pub mod process;
pub mod rate_limit;
pub mod resources;
pub mod secrets;
pub mod template;
pub mod validation;

pub use audit::{AuditAction, AuditLog, AuditOutcome, AuditRecord};
pub use collision::{CollisionPolicy, CollisionReport, TagDecision};
pub use config::{EngineConfig, RateLimitConfig};
pub use dependency::{PlanDirection, ResolutionPlan, ResolveRequest};
pub use engine::{
    Engine, InstallOptions, InstallResult, InstalledExtension, MemberStatus, ProfileInstallResult,
    RemoveOptions, RemoveResult,
};
pub use error::{ConcurrencyError, Error, ExecutionError, GateError, ResolutionError, Result};
pub use hooks::{HookReport, HookResult, HookStatus};
pub use manifest::{Manifest, ManifestEntry, ManifestStore, ResourceClaim};
pub use rate_limit::{OperationClass, RateLimitBucket, RateLimiter};
pub use resources::{ResourceTier, SizingDecision};
pub use secrets::{EnvSecretsProvider, SecretValue, SecretsProvider, StaticSecretsProvider};
pub use validation::ValidationReport;
