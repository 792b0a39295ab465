//! Engine facade
//!
//! The [`Engine`] owns an immutable catalog snapshot and the handles on a
//! workspace's mutable state (manifest, rate-limit buckets, audit log).
//! Every mutating operation runs under the manifest lock for its whole
//! duration and leaves exactly one audit record per attempted extension.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Utc;
use envkit_catalog::{Catalog, ExtensionDefinition, ResourceTag};

use crate::audit::{AuditAction, AuditLog, AuditRecord};
use crate::collision;
use crate::config::EngineConfig;
use crate::dependency::{self, ResolutionPlan, ResolveRequest};
use crate::error::{Error, ExecutionError, ResolutionError, Result};
use crate::hooks::{self, HookReport};
use crate::installer::{self, InstallContext};
use crate::manifest::{Manifest, ManifestEntry, ManifestStore, ManifestTransaction};
use crate::rate_limit::{OperationClass, RateLimiter};
use crate::resources::{self, SizingDecision};
use crate::secrets::{EnvSecretsProvider, SecretsProvider, resolve_secrets};
use crate::validation::{self, ValidationReport};

/// Options for [`Engine::install_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    /// Proceed past resources already claimed by an extension that declared
    /// no compatibility. Safety conflicts are never overridable.
    pub allow_unknown_ownership: bool,
}

/// Options for [`Engine::remove_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    /// Remove active dependents first instead of refusing.
    pub cascade: bool,
    /// Acknowledge removals that destroy user data.
    pub confirmed: bool,
    /// Drop manifest entries instead of marking them inactive.
    pub purge: bool,
}

/// One extension the engine actually installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledExtension {
    pub id: String,
    pub version: String,
    /// Whether an entry already existed and was updated in place.
    pub reinstalled: bool,
    /// Shared resources written in merge mode.
    pub merged: Vec<ResourceTag>,
    pub steps: Vec<String>,
}

/// Result of [`Engine::install`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallResult {
    pub requested: String,
    /// Full resolved plan, dependencies first.
    pub plan: Vec<String>,
    pub installed: Vec<InstalledExtension>,
    /// Dependencies that were already active and were not executed.
    pub already_active: Vec<String>,
}

/// Result of [`Engine::remove`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveResult {
    pub requested: String,
    /// Removed ids, dependents first.
    pub removed: Vec<String>,
    pub purged: bool,
}

/// Per-member outcome of a profile install.
#[derive(Debug)]
pub enum MemberStatus {
    Installed(InstalledExtension),
    AlreadyInstalled,
    Failed(Error),
    /// Not attempted because a dependency failed.
    Skipped { blocked_by: String },
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberStatus::Installed(_) => f.write_str("installed"),
            MemberStatus::AlreadyInstalled => f.write_str("already installed"),
            MemberStatus::Failed(e) => write!(f, "failed: {e}"),
            MemberStatus::Skipped { blocked_by } => write!(f, "skipped: '{blocked_by}' failed"),
        }
    }
}

/// Result of [`Engine::install_profile`], in plan order.
#[derive(Debug)]
pub struct ProfileInstallResult {
    pub profile: String,
    pub members: Vec<(String, MemberStatus)>,
}

impl ProfileInstallResult {
    pub fn plan(&self) -> Vec<&str> {
        self.members.iter().map(|(id, _)| id.as_str()).collect()
    }

    pub fn status(&self, id: &str) -> Option<&MemberStatus> {
        self.members.iter().find(|(m, _)| m == id).map(|(_, s)| s)
    }

    pub fn installed(&self) -> Vec<&str> {
        self.filter(|s| matches!(s, MemberStatus::Installed(_)))
    }

    pub fn failed(&self) -> Vec<&str> {
        self.filter(|s| matches!(s, MemberStatus::Failed(_)))
    }

    /// Whether every member ended up active.
    pub fn is_complete(&self) -> bool {
        self.members
            .iter()
            .all(|(_, s)| matches!(s, MemberStatus::Installed(_) | MemberStatus::AlreadyInstalled))
    }

    fn filter(&self, pred: impl Fn(&MemberStatus) -> bool) -> Vec<&str> {
        self.members
            .iter()
            .filter(|(_, s)| pred(s))
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

/// The extension lifecycle engine for one workspace.
pub struct Engine {
    catalog: Catalog,
    workspace: PathBuf,
    config: EngineConfig,
    secrets: Box<dyn SecretsProvider>,
    manifest: ManifestStore,
    rate_limiter: RateLimiter,
    audit: AuditLog,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("workspace", &self.workspace)
            .field("extensions", &self.catalog.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an engine for `workspace`.
    ///
    /// Configuration is read from `<workspace>/.envkit/config.toml` when
    /// present and secrets come from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn new(catalog: Catalog, workspace: impl Into<PathBuf>) -> Result<Self> {
        let workspace = workspace.into();
        let config = EngineConfig::load(&workspace)?;
        Ok(Self::with_config(catalog, workspace, config))
    }

    /// Create an engine with an explicit configuration.
    pub fn with_config(catalog: Catalog, workspace: impl Into<PathBuf>, config: EngineConfig) -> Self {
        let workspace = workspace.into();
        tracing::debug!(
            workspace = %workspace.display(),
            extensions = catalog.len(),
            "Engine created"
        );
        Self {
            manifest: ManifestStore::new(&workspace, config.lock_timeout()),
            rate_limiter: RateLimiter::new(&workspace, &config),
            audit: AuditLog::new(&workspace),
            secrets: Box::new(EnvSecretsProvider),
            catalog,
            workspace,
            config,
        }
    }

    /// Replace the secrets provider.
    pub fn with_secrets(mut self, provider: impl SecretsProvider + 'static) -> Self {
        self.secrets = Box::new(provider);
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Expand a request into an ordered plan. Read-only.
    pub fn resolve(&self, request: &ResolveRequest) -> Result<ResolutionPlan> {
        Ok(dependency::resolve_install(&self.catalog, request)?)
    }

    /// Install `id` and any inactive dependencies.
    pub fn install(&self, id: &str, actor: &str) -> Result<InstallResult> {
        self.install_with(id, actor, InstallOptions::default())
    }

    /// Install `id` with explicit options.
    ///
    /// Dependencies that are already active are left alone; the requested
    /// extension itself is always executed, so a repeated install updates
    /// its manifest entry in place. The call takes one rate-limit token no
    /// matter how many dependencies it pulls in. A failing member stops the
    /// run; members before it stay installed.
    pub fn install_with(&self, id: &str, actor: &str, options: InstallOptions) -> Result<InstallResult> {
        let fail = |e: Error| self.audit_failure(actor, AuditAction::Install, id, false, e);

        let plan = self.resolve(&ResolveRequest::extension(id)).map_err(fail)?;
        let mut tx = self.manifest.begin().map_err(fail)?;
        self.rate_limiter
            .acquire(actor, OperationClass::Install)
            .map_err(fail)?;

        let mut result = InstallResult {
            requested: id.to_string(),
            plan: plan.ids().into_iter().map(str::to_string).collect(),
            installed: Vec::new(),
            already_active: Vec::new(),
        };

        for def in plan.iter() {
            if def.id != id && tx.manifest().is_active(&def.id) {
                self.note_drift(tx.manifest(), def);
                result.already_active.push(def.id.clone());
                continue;
            }
            let installed = self.install_member(&mut tx, def, actor, false, options)?;
            result.installed.push(installed);
        }

        tracing::info!(
            extension = %id,
            actor = %actor,
            installed = result.installed.len(),
            "Install complete"
        );
        Ok(result)
    }

    /// Install every member of `profile` as one rate-limit exempt batch.
    ///
    /// Members run sequentially in plan order. Active members are reported
    /// as [`MemberStatus::AlreadyInstalled`]. A failed member does not stop
    /// the batch, but everything that depends on it is skipped.
    ///
    /// # Errors
    ///
    /// Only resolution and lock failures are returned as `Err`; member
    /// failures are reported per member.
    pub fn install_profile(&self, profile: &str, actor: &str) -> Result<ProfileInstallResult> {
        let resource = format!("profile:{profile}");
        let plan = self
            .resolve(&ResolveRequest::profile(profile))
            .map_err(|e| self.audit_failure(actor, AuditAction::Install, &resource, true, e))?;
        let mut tx = self
            .manifest
            .begin()
            .map_err(|e| self.audit_failure(actor, AuditAction::Install, &resource, true, e))?;

        let mut blocked: BTreeMap<String, String> = BTreeMap::new();
        let mut members = Vec::with_capacity(plan.len());

        for def in plan.iter() {
            let blocker = def
                .dependencies
                .iter()
                .find_map(|dep| blocked.get(dep).cloned());

            let status = if let Some(root) = blocker {
                tracing::warn!(extension = %def.id, blocked_by = %root, "Skipping profile member");
                blocked.insert(def.id.clone(), root.clone());
                MemberStatus::Skipped { blocked_by: root }
            } else if tx.manifest().is_active(&def.id) {
                self.note_drift(tx.manifest(), def);
                MemberStatus::AlreadyInstalled
            } else {
                match self.install_member(&mut tx, def, actor, true, InstallOptions::default()) {
                    Ok(installed) => MemberStatus::Installed(installed),
                    Err(e) => {
                        blocked.insert(def.id.clone(), def.id.clone());
                        MemberStatus::Failed(e)
                    }
                }
            };
            members.push((def.id.clone(), status));
        }

        let result = ProfileInstallResult {
            profile: profile.to_string(),
            members,
        };
        tracing::info!(
            profile = %profile,
            actor = %actor,
            installed = result.installed().len(),
            failed = result.failed().len(),
            "Profile install complete"
        );
        Ok(result)
    }

    /// Remove `id`; with `cascade`, remove its active dependents first.
    pub fn remove(&self, id: &str, actor: &str, cascade: bool) -> Result<RemoveResult> {
        self.remove_with(
            id,
            actor,
            RemoveOptions {
                cascade,
                ..RemoveOptions::default()
            },
        )
    }

    /// Remove `id` with explicit options.
    ///
    /// Preconditions (installed, not protected, confirmed when required)
    /// are checked for every plan member before anything runs. A cascade
    /// takes a single rate-limit token.
    pub fn remove_with(&self, id: &str, actor: &str, options: RemoveOptions) -> Result<RemoveResult> {
        let fail = |e: Error| self.audit_failure(actor, AuditAction::Remove, id, false, e);

        let mut tx = self.manifest.begin().map_err(fail)?;
        let active = tx.manifest().active_ids();
        let plan = dependency::resolve_removal(&self.catalog, id, &active, options.cascade)
            .map_err(|e| fail(e.into()))?;

        if !tx.manifest().is_active(id) {
            return Err(fail(
                ExecutionError::NotInstalled {
                    extension: id.to_string(),
                }
                .into(),
            ));
        }
        for def in plan.iter() {
            check_removable(def, options).map_err(|e| fail(e.into()))?;
        }
        self.rate_limiter
            .acquire(actor, OperationClass::Remove)
            .map_err(fail)?;

        let mut removed = Vec::with_capacity(plan.len());
        for def in plan.iter() {
            self.remove_member(&mut tx, def, actor, options)?;
            removed.push(def.id.clone());
        }

        tracing::info!(extension = %id, actor = %actor, removed = ?removed, "Removal complete");
        Ok(RemoveResult {
            requested: id.to_string(),
            removed,
            purged: options.purge,
        })
    }

    /// Size `plan` for `provider`. Pure.
    pub fn compute_resource_tier(&self, plan: &ResolutionPlan, provider: &str) -> Result<SizingDecision> {
        resources::compute_resource_tier(plan, provider)
    }

    /// Run init hooks of all active extensions against `workspace`.
    pub fn run_project_init_hooks(&self, workspace: &Path) -> Result<HookReport> {
        let manifest = self.manifest.load()?;
        Ok(hooks::run_project_init_hooks(
            workspace,
            &manifest,
            &self.catalog,
            &self.config,
        ))
    }

    /// Every manifest entry, active or not, sorted by id.
    pub fn list_manifest(&self) -> Result<Vec<ManifestEntry>> {
        Ok(self.manifest.load()?.entries().cloned().collect())
    }

    /// Snapshot of the last committed manifest, claims included.
    pub fn manifest(&self) -> Result<Manifest> {
        self.manifest.load()
    }

    /// Run the validation commands of an installed extension.
    ///
    /// Never touches the manifest and is not audited.
    pub fn validate(&self, id: &str) -> Result<ValidationReport> {
        let def = self
            .catalog
            .get(id)
            .ok_or_else(|| ResolutionError::UnknownExtension(id.to_string()))?;
        if !self.manifest.load()?.is_active(id) {
            return Err(ExecutionError::NotInstalled {
                extension: id.to_string(),
            }
            .into());
        }
        Ok(validation::validate_extension(def, &self.workspace, &self.config)?)
    }

    pub fn audit_records(&self) -> Result<Vec<AuditRecord>> {
        self.audit.records()
    }

    fn install_member(
        &self,
        tx: &mut ManifestTransaction,
        def: &ExtensionDefinition,
        actor: &str,
        batch: bool,
        options: InstallOptions,
    ) -> Result<InstalledExtension> {
        match self.try_install(tx, def, options) {
            Ok(installed) => {
                let record = AuditRecord::success(
                    actor,
                    AuditAction::Install,
                    &def.id,
                    format!("{} {}", def.version, installed.steps.join("; ")),
                )
                .in_batch(batch);
                self.audit.append(&record)?;
                Ok(installed)
            }
            Err(e) => Err(self.audit_failure(actor, AuditAction::Install, &def.id, batch, e)),
        }
    }

    fn try_install(
        &self,
        tx: &mut ManifestTransaction,
        def: &ExtensionDefinition,
        options: InstallOptions,
    ) -> Result<InstalledExtension> {
        let report = collision::evaluate(def, tx.manifest(), &self.catalog);
        report.gate(options.allow_unknown_ownership)?;

        let extension_dir = self.catalog.extension_dir(&def.id);
        installer::check_sandbox(def, &extension_dir, &self.workspace)?;

        let secrets = resolve_secrets(self.secrets.as_ref(), def)?;
        let merge_tags: BTreeSet<ResourceTag> = report.merge_tags();
        let ctx = InstallContext {
            definition: def,
            extension_dir: &extension_dir,
            workspace: &self.workspace,
            config: &self.config,
            secrets: &secrets,
            merge_tags: &merge_tags,
        };
        let execution = installer::run_install(&ctx)?;

        let reinstalled = tx.manifest().get(&def.id).is_some();
        tx.manifest_mut().record_install(def, Utc::now());
        tx.commit()?;

        Ok(InstalledExtension {
            id: def.id.clone(),
            version: def.version.clone(),
            reinstalled,
            merged: merge_tags.into_iter().collect(),
            steps: execution.steps,
        })
    }

    fn remove_member(
        &self,
        tx: &mut ManifestTransaction,
        def: &ExtensionDefinition,
        actor: &str,
        options: RemoveOptions,
    ) -> Result<()> {
        let attempt = || -> Result<String> {
            let extension_dir = self.catalog.extension_dir(&def.id);
            installer::check_sandbox(def, &extension_dir, &self.workspace)?;

            let no_tags = BTreeSet::new();
            let ctx = InstallContext {
                definition: def,
                extension_dir: &extension_dir,
                workspace: &self.workspace,
                config: &self.config,
                secrets: &[],
                merge_tags: &no_tags,
            };
            let execution = installer::run_removal(&ctx)?;
            Ok(execution.summary())
        };

        match attempt() {
            Ok(summary) => {
                tx.manifest_mut()
                    .record_removal(&def.id, Utc::now(), options.purge);
                tx.commit()
                    .map_err(|e| self.audit_failure(actor, AuditAction::Remove, &def.id, false, e))?;
                self.audit.append(&AuditRecord::success(
                    actor,
                    AuditAction::Remove,
                    &def.id,
                    summary,
                ))?;
                Ok(())
            }
            Err(e) => Err(self.audit_failure(actor, AuditAction::Remove, &def.id, false, e)),
        }
    }

    /// Append a failure record and hand the error back unchanged.
    fn audit_failure(&self, actor: &str, action: AuditAction, resource: &str, batch: bool, error: Error) -> Error {
        tracing::warn!(
            resource = %resource,
            actor = %actor,
            stage = error.stage(),
            error = %error,
            "Operation failed"
        );
        let record = AuditRecord::failure(actor, action, resource, &error).in_batch(batch);
        if let Err(audit_error) = self.audit.append(&record) {
            tracing::error!(error = %audit_error, "Failed to write audit record");
        }
        error
    }

    fn note_drift(&self, manifest: &Manifest, def: &ExtensionDefinition) {
        if manifest.get(&def.id).is_some_and(|e| e.is_stale(def)) {
            tracing::warn!(
                extension = %def.id,
                "Catalog definition changed since install; reinstall to apply"
            );
        }
    }
}

fn check_removable(def: &ExtensionDefinition, options: RemoveOptions) -> std::result::Result<(), ExecutionError> {
    if def.protected {
        return Err(ExecutionError::ProtectedExtension {
            extension: def.id.clone(),
        });
    }
    if def.remove.as_ref().is_some_and(|r| r.requires_confirmation) && !options.confirmed {
        return Err(ExecutionError::ConfirmationRequired {
            extension: def.id.clone(),
        });
    }
    Ok(())
}
