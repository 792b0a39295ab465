//! Durable record of active extensions and their resource claims
//!
//! The manifest is the only mutable state shared between engine
//! invocations. Reads go through [`ManifestStore::load`], which sees either
//! the previous or the next committed version because commits are
//! write-then-rename. Writes go through a [`ManifestTransaction`], which
//! holds the exclusive manifest lock for as long as it lives.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use envkit_catalog::{ExtensionDefinition, ResourceAccess, ResourceTag};
use envkit_fs::{ConfigStore, FileLock, StatePath};
use serde::{Deserialize, Serialize};

use crate::error::{ConcurrencyError, Error, Result};

const SCHEMA_VERSION: u32 = 1;

/// One installed (or previously installed) extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub extension_id: String,
    pub version: String,
    pub installed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_at: Option<DateTime<Utc>>,
    pub active: bool,
    /// Init-hook priority captured at install time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    pub install_count: u32,
    /// Digest of the definition as it was installed.
    pub digest: String,
}

impl ManifestEntry {
    /// Whether the catalog definition changed since this entry was written.
    pub fn is_stale(&self, def: &ExtensionDefinition) -> bool {
        self.version != def.version || self.digest != def.digest()
    }
}

/// An accepted right over a shared resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceClaim {
    pub extension_id: String,
    pub tag: ResourceTag,
    pub access: ResourceAccess,
}

/// In-memory manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default = "schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    entries: BTreeMap<String, ManifestEntry>,
    #[serde(default)]
    claims: Vec<ResourceClaim>,
}

fn schema_version() -> u32 {
    SCHEMA_VERSION
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            entries: BTreeMap::new(),
            claims: Vec::new(),
        }
    }
}

impl Manifest {
    pub fn get(&self, id: &str) -> Option<&ManifestEntry> {
        self.entries.get(id)
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.entries.get(id).is_some_and(|e| e.active)
    }

    pub fn active_ids(&self) -> BTreeSet<String> {
        self.active_entries().map(|e| e.extension_id.clone()).collect()
    }

    pub fn active_entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.values().filter(|e| e.active)
    }

    /// Every entry, active or not, sorted by id.
    pub fn entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.values()
    }

    pub fn claims(&self) -> &[ResourceClaim] {
        &self.claims
    }

    /// Claims on `tag` held by other extensions.
    pub fn owners_of(&self, tag: &ResourceTag) -> Vec<&ResourceClaim> {
        self.claims.iter().filter(|c| &c.tag == tag).collect()
    }

    pub fn claims_of(&self, id: &str) -> Vec<&ResourceClaim> {
        self.claims.iter().filter(|c| c.extension_id == id).collect()
    }

    /// Record a successful install, updating an existing entry in place.
    pub fn record_install(&mut self, def: &ExtensionDefinition, now: DateTime<Utc>) -> &ManifestEntry {
        let priority = def.init_hook.as_ref().map(|h| h.priority);
        let digest = def.digest();

        let entry = self
            .entries
            .entry(def.id.clone())
            .and_modify(|e| {
                e.version = def.version.clone();
                e.updated_at = now;
                e.removed_at = None;
                e.active = true;
                e.priority = priority;
                e.install_count += 1;
                e.digest = digest.clone();
            })
            .or_insert_with(|| ManifestEntry {
                extension_id: def.id.clone(),
                version: def.version.clone(),
                installed_at: now,
                updated_at: now,
                removed_at: None,
                active: true,
                priority,
                install_count: 1,
                digest: digest.clone(),
            });

        self.claims.retain(|c| c.extension_id != def.id);
        self.claims
            .extend(def.shared_resources.iter().map(|r| ResourceClaim {
                extension_id: def.id.clone(),
                tag: r.tag.clone(),
                access: r.access,
            }));

        entry
    }

    /// Record a removal. Soft removal keeps the entry as inactive; `purge`
    /// drops it. Claims are cleared either way.
    pub fn record_removal(&mut self, id: &str, now: DateTime<Utc>, purge: bool) {
        self.claims.retain(|c| c.extension_id != id);
        if purge {
            self.entries.remove(id);
        } else if let Some(entry) = self.entries.get_mut(id) {
            entry.active = false;
            entry.removed_at = Some(now);
            entry.updated_at = now;
        }
    }
}

/// Locked, atomically committed access to the manifest file.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
}

impl ManifestStore {
    pub fn new(workspace: &Path, lock_timeout: Duration) -> Self {
        Self {
            path: StatePath::Manifest.under(workspace),
            lock_path: StatePath::ManifestLock.under(workspace),
            lock_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the last committed manifest without taking the lock.
    pub fn load(&self) -> Result<Manifest> {
        if !self.path.exists() {
            return Ok(Manifest::default());
        }
        Ok(ConfigStore::new().load(&self.path)?)
    }

    /// Take the manifest lock and read the current state.
    ///
    /// Fails with [`ConcurrencyError::ManifestLocked`] once the configured
    /// timeout has passed.
    pub fn begin(&self) -> Result<ManifestTransaction> {
        let lock = FileLock::acquire(&self.lock_path, self.lock_timeout).map_err(|e| match e {
            envkit_fs::Error::LockTimeout { waited, .. } => {
                Error::from(ConcurrencyError::ManifestLocked {
                    path: self.path.clone(),
                    waited,
                })
            }
            other => Error::from(other),
        })?;

        let manifest = self.load()?;
        Ok(ManifestTransaction {
            _lock: lock,
            path: self.path.clone(),
            manifest,
        })
    }
}

/// Exclusive read-modify-write session on the manifest.
///
/// Changes are only persisted by [`ManifestTransaction::commit`]; dropping
/// the transaction releases the lock and discards uncommitted changes.
#[derive(Debug)]
pub struct ManifestTransaction {
    _lock: FileLock,
    path: PathBuf,
    manifest: Manifest,
}

impl ManifestTransaction {
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn manifest_mut(&mut self) -> &mut Manifest {
        &mut self.manifest
    }

    /// Persist the current state; the lock stays held.
    pub fn commit(&mut self) -> Result<()> {
        ConfigStore::new().save(&self.path, &self.manifest)?;
        tracing::debug!(
            path = %self.path.display(),
            active = self.manifest.active_entries().count(),
            "Manifest committed"
        );
        Ok(())
    }
}
