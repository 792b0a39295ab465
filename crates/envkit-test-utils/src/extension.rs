//! [`ExtensionBuilder`] for constructing definitions in tests.

use envkit_catalog::{
    ExtensionCategory, ExtensionDefinition, HybridStep, InitHook, InstallMethod, InstallSpec,
    PackageManager, PackageStep, RemoveSpec, ResourceAccess, ResourceNeeds, ResourceTag,
    ScriptStep, SecretRef, SharedResource, TemplateMode, TemplateStep, ValidationCommand,
    ValidationSpec,
};

/// Fluent builder for [`ExtensionDefinition`].
///
/// Defaults to version `1.0.0`, category `languages`, and an install method
/// that runs `install.sh` from the extension directory.
///
/// # Example
///
/// ```rust
/// use envkit_test_utils::ExtensionBuilder;
///
/// let def = ExtensionBuilder::new("claude-code")
///     .depends_on("nodejs")
///     .merges("claude-dir")
///     .resources(400, 256, 60)
///     .build();
/// assert!(def.dependencies.contains("nodejs"));
/// ```
#[derive(Debug, Clone)]
pub struct ExtensionBuilder {
    def: ExtensionDefinition,
}

impl ExtensionBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            def: ExtensionDefinition {
                id: id.to_string(),
                version: "1.0.0".to_string(),
                category: ExtensionCategory::Languages,
                description: None,
                protected: false,
                dependencies: Default::default(),
                conflicts: Default::default(),
                shared_resources: Vec::new(),
                install: InstallSpec {
                    timeout_sec: None,
                    method: InstallMethod::Script(ScriptStep {
                        path: "install.sh".to_string(),
                        shell: None,
                        args: Vec::new(),
                    }),
                },
                remove: None,
                resources: ResourceNeeds::default(),
                init_hook: None,
                validation: ValidationSpec::default(),
                secrets: Vec::new(),
            },
        }
    }

    pub fn version(mut self, version: &str) -> Self {
        self.def.version = version.to_string();
        self
    }

    pub fn category(mut self, category: ExtensionCategory) -> Self {
        self.def.category = category;
        self
    }

    pub fn protected(mut self) -> Self {
        self.def.protected = true;
        self
    }

    pub fn depends_on(mut self, id: &str) -> Self {
        self.def.dependencies.insert(id.to_string());
        self
    }

    pub fn conflicts_with(mut self, id: &str) -> Self {
        self.def.conflicts.insert(id.to_string());
        self
    }

    /// Claim `tag` exclusively.
    pub fn owns(mut self, tag: &str) -> Self {
        self.def.shared_resources.push(SharedResource {
            tag: ResourceTag::new(tag),
            access: ResourceAccess::Exclusive,
        });
        self
    }

    /// Claim `tag` with merge semantics.
    pub fn merges(mut self, tag: &str) -> Self {
        self.def.shared_resources.push(SharedResource {
            tag: ResourceTag::new(tag),
            access: ResourceAccess::Merge,
        });
        self
    }

    /// Install by running `path` from the extension directory.
    pub fn script(mut self, path: &str) -> Self {
        self.def.install.method = InstallMethod::Script(ScriptStep {
            path: path.to_string(),
            shell: None,
            args: Vec::new(),
        });
        self
    }

    pub fn packages(mut self, manager: PackageManager, packages: &[&str]) -> Self {
        self.def.install.method = InstallMethod::PackageManager(PackageStep {
            manager,
            packages: packages.iter().map(|p| p.to_string()).collect(),
        });
        self
    }

    /// Install by rendering `source` into the workspace at `destination`.
    pub fn template(mut self, source: &str, destination: &str, mode: TemplateMode) -> Self {
        let resource = self.def.shared_resources.first().map(|r| r.tag.clone());
        self.def.install.method = InstallMethod::Template(TemplateStep {
            source: source.to_string(),
            destination: destination.to_string(),
            mode,
            resource,
        });
        self
    }

    pub fn hybrid(mut self, step: HybridStep) -> Self {
        self.def.install.method = InstallMethod::Hybrid(step);
        self
    }

    pub fn install_timeout(mut self, secs: u64) -> Self {
        self.def.install.timeout_sec = Some(secs);
        self
    }

    pub fn remove_script(mut self, path: &str) -> Self {
        let remove = self.def.remove.get_or_insert_with(RemoveSpec::default);
        remove.script = Some(ScriptStep {
            path: path.to_string(),
            shell: None,
            args: Vec::new(),
        });
        self
    }

    pub fn requires_confirmation(mut self) -> Self {
        self.def
            .remove
            .get_or_insert_with(RemoveSpec::default)
            .requires_confirmation = true;
        self
    }

    pub fn resources(mut self, disk_mb: u64, memory_mb: u64, install_time_sec: u64) -> Self {
        self.def.resources = ResourceNeeds {
            disk_mb,
            memory_mb,
            install_time_sec,
        };
        self
    }

    pub fn init_hook(mut self, priority: i32, command: &str, marker: &str) -> Self {
        self.def.init_hook = Some(InitHook {
            priority,
            command: command.to_string(),
            marker: marker.to_string(),
        });
        self
    }

    pub fn validation(mut self, name: &str, version_flag: &str, pattern: Option<&str>) -> Self {
        self.def.validation.commands.push(ValidationCommand {
            name: name.to_string(),
            version_flag: version_flag.to_string(),
            expected_pattern: pattern.map(str::to_string),
        });
        self
    }

    pub fn secret(mut self, name: &str, required: bool) -> Self {
        self.def.secrets.push(SecretRef {
            name: name.to_string(),
            key: None,
            required,
        });
        self
    }

    pub fn build(self) -> ExtensionDefinition {
        self.def
    }
}
