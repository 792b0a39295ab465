//! Immutable catalog snapshot and its on-disk loader

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use envkit_fs::ConfigStore;

use crate::definition::{ExtensionCategory, ExtensionDefinition};
use crate::error::{Error, Result};
use crate::profile::{Profile, ProfilesFile};

/// Subdirectory holding one directory per extension.
pub const EXTENSIONS_DIR: &str = "extensions";

/// Profile registry file at the catalog root.
pub const PROFILES_FILE: &str = "profiles.toml";

/// Definition file names tried in order inside an extension directory.
pub const DEFINITION_FILES: &[&str] = &[
    "extension.toml",
    "extension.yaml",
    "extension.yml",
    "extension.json",
];

/// A dependency or conflict naming an id the catalog does not contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingReference {
    pub extension: String,
    pub field: &'static str,
    pub missing: String,
}

/// Read-only snapshot of every known extension and profile.
///
/// Built once and handed to the engine; nothing mutates it afterwards.
#[derive(Debug, Clone)]
pub struct Catalog {
    root: PathBuf,
    extensions: BTreeMap<String, ExtensionDefinition>,
    profiles: BTreeMap<String, Profile>,
}

impl Catalog {
    /// Build a catalog from already-parsed parts.
    ///
    /// `root` is the directory whose `extensions/<id>/` subdirectories hold
    /// each extension's scripts and templates.
    pub fn from_parts(
        root: impl Into<PathBuf>,
        definitions: impl IntoIterator<Item = ExtensionDefinition>,
        profiles: impl IntoIterator<Item = Profile>,
    ) -> Result<Self> {
        let mut extensions = BTreeMap::new();
        for def in definitions {
            def.validate()?;
            if extensions.contains_key(&def.id) {
                return Err(Error::DuplicateId(def.id));
            }
            extensions.insert(def.id.clone(), def);
        }

        let mut by_name = BTreeMap::new();
        for profile in profiles {
            if let Some(member) = profile
                .extensions
                .iter()
                .find(|m| !extensions.contains_key(m.as_str()))
            {
                return Err(Error::UnknownProfileMember {
                    profile: profile.name.clone(),
                    member: member.clone(),
                });
            }
            by_name.insert(profile.name.clone(), profile);
        }

        let catalog = Self {
            root: root.into(),
            extensions,
            profiles: by_name,
        };

        for dangling in catalog.verify_references() {
            tracing::warn!(
                extension = %dangling.extension,
                field = dangling.field,
                missing = %dangling.missing,
                "Catalog references unknown extension"
            );
        }

        Ok(catalog)
    }

    /// Load a catalog from its directory layout.
    pub fn load(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(Error::CatalogNotFound(root.to_path_buf()));
        }

        let store = ConfigStore::new();
        let profiles_path = root.join(PROFILES_FILE);
        let profiles = if profiles_path.exists() {
            store.load::<ProfilesFile>(&profiles_path)?.into_profiles()
        } else {
            BTreeMap::new()
        };

        let mut definitions = Vec::new();
        let extensions_dir = root.join(EXTENSIONS_DIR);
        if extensions_dir.is_dir() {
            let mut dirs: Vec<PathBuf> = fs::read_dir(&extensions_dir)
                .map_err(|e| envkit_fs::Error::io(&extensions_dir, e))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_dir())
                .collect();
            dirs.sort();

            let mut seen = HashSet::new();
            for dir in dirs {
                let def = load_definition(&store, &dir)?;
                let dir_name = dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if dir_name != def.id {
                    return Err(Error::IdMismatch {
                        dir: dir_name,
                        id: def.id,
                    });
                }
                if !seen.insert(def.id.clone()) {
                    return Err(Error::DuplicateId(def.id));
                }
                definitions.push(def);
            }
        }

        let catalog = Self::from_parts(root, definitions, profiles.into_values())?;
        tracing::info!(
            root = %root.display(),
            extensions = catalog.len(),
            profiles = catalog.profiles.len(),
            "Catalog loaded"
        );
        Ok(catalog)
    }

    /// Report dependency and conflict ids that do not resolve.
    pub fn verify_references(&self) -> Vec<DanglingReference> {
        let mut dangling = Vec::new();
        for def in self.extensions.values() {
            for (field, ids) in [("dependencies", &def.dependencies), ("conflicts", &def.conflicts)] {
                for id in ids.iter().filter(|id| !self.extensions.contains_key(id.as_str())) {
                    dangling.push(DanglingReference {
                        extension: def.id.clone(),
                        field,
                        missing: id.clone(),
                    });
                }
            }
        }
        dangling
    }

    pub fn get(&self, id: &str) -> Option<&ExtensionDefinition> {
        self.extensions.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.extensions.contains_key(id)
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    /// All extension ids (sorted).
    pub fn ids(&self) -> Vec<&str> {
        self.extensions.keys().map(String::as_str).collect()
    }

    /// All profiles (sorted by name).
    pub fn profiles(&self) -> Vec<&Profile> {
        self.profiles.values().collect()
    }

    /// Definitions in one category (sorted by id).
    pub fn by_category(&self, category: ExtensionCategory) -> Vec<&ExtensionDefinition> {
        self.extensions
            .values()
            .filter(|d| d.category == category)
            .collect()
    }

    /// Directory holding an extension's scripts and templates.
    pub fn extension_dir(&self, id: &str) -> PathBuf {
        self.root.join(EXTENSIONS_DIR).join(id)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}

fn load_definition(store: &ConfigStore, dir: &Path) -> Result<ExtensionDefinition> {
    let path = DEFINITION_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
        .ok_or_else(|| Error::DefinitionNotFound(dir.to_path_buf()))?;

    let def: ExtensionDefinition = store.load(&path)?;
    tracing::debug!(extension = %def.id, path = %path.display(), "Loaded extension definition");
    Ok(def)
}
