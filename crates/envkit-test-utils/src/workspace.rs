//! [`TestWorkspace`]: a temporary catalog plus a temporary workspace.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use envkit_catalog::{Catalog, ExtensionDefinition};
use tempfile::TempDir;

/// A scratch directory holding `catalog/` and `workspace/` side by side.
///
/// Extensions added here are written to disk in the catalog layout and
/// loaded back through [`Catalog::load`], so tests exercise the same path
/// production code does.
///
/// # Example
///
/// ```rust,no_run
/// use envkit_test_utils::{ExtensionBuilder, TestWorkspace};
///
/// let ws = TestWorkspace::new();
/// ws.add_extension(&ExtensionBuilder::new("nodejs").build());
/// ws.add_counting_script("nodejs", "install.sh");
/// let catalog = ws.catalog();
/// assert!(catalog.contains("nodejs"));
/// ```
pub struct TestWorkspace {
    temp_dir: TempDir,
    profiles: Mutex<Vec<(String, Vec<String>)>>,
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

impl TestWorkspace {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("catalog").join("extensions")).unwrap();
        fs::create_dir_all(temp_dir.path().join("workspace")).unwrap();
        Self {
            temp_dir,
            profiles: Default::default(),
        }
    }

    /// Root of the on-disk catalog.
    pub fn catalog_root(&self) -> PathBuf {
        self.temp_dir.path().join("catalog")
    }

    /// Root of the workspace the engine manages.
    pub fn workspace(&self) -> PathBuf {
        self.temp_dir.path().join("workspace")
    }

    pub fn extension_dir(&self, id: &str) -> PathBuf {
        self.catalog_root().join("extensions").join(id)
    }

    /// Write `extensions/<id>/extension.toml`.
    pub fn add_extension(&self, def: &ExtensionDefinition) {
        let dir = self.extension_dir(&def.id);
        fs::create_dir_all(&dir).unwrap();
        let body = toml::to_string_pretty(def).unwrap();
        fs::write(dir.join("extension.toml"), body).unwrap();
    }

    /// Write an arbitrary file into an extension directory.
    pub fn add_extension_file(&self, id: &str, relative: &str, content: &str) {
        let path = self.extension_dir(id).join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// Write a script that records each invocation under the workspace.
    ///
    /// See [`TestWorkspace::invocation_count`].
    pub fn add_counting_script(&self, id: &str, relative: &str) {
        let body = format!(
            "#!/bin/sh\nset -e\necho \"$ENVKIT_EXTENSION_VERSION\" >> \"$ENVKIT_WORKSPACE/.calls-{id}-{name}\"\n",
            name = relative.replace('/', "_"),
        );
        self.add_extension_file(id, relative, &body);
    }

    /// How many times a counting script has run.
    pub fn invocation_count(&self, id: &str, relative: &str) -> usize {
        let path = self
            .workspace()
            .join(format!(".calls-{id}-{}", relative.replace('/', "_")));
        fs::read_to_string(path)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    /// Register a profile; written to `profiles.toml` on every call.
    pub fn add_profile(&self, name: &str, members: &[&str]) {
        let mut profiles = self.profiles.lock().unwrap();
        profiles.push((
            name.to_string(),
            members.iter().map(|m| m.to_string()).collect(),
        ));

        let mut body = String::new();
        for (name, members) in profiles.iter() {
            let list = members
                .iter()
                .map(|m| format!("\"{m}\""))
                .collect::<Vec<_>>()
                .join(", ");
            body.push_str(&format!("[profiles.{name}]\nextensions = [{list}]\n\n"));
        }
        fs::write(self.catalog_root().join("profiles.toml"), body).unwrap();
    }

    /// Write `.envkit/config.toml` in the workspace.
    pub fn write_config(&self, content: &str) {
        let dir = self.workspace().join(".envkit");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("config.toml"), content).unwrap();
    }

    /// Load the catalog from disk.
    pub fn catalog(&self) -> Catalog {
        Catalog::load(&self.catalog_root()).unwrap()
    }

    pub fn read_workspace_file(&self, relative: &str) -> String {
        fs::read_to_string(self.workspace().join(relative)).unwrap()
    }

    pub fn workspace_file_exists(&self, relative: &str) -> bool {
        self.workspace().join(relative).exists()
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }
}
