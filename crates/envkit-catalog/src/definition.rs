//! Extension definition schema - loaded from `extensions/<id>/extension.toml`
//!
//! A definition is immutable once loaded. The engine reads it to plan,
//! gate, execute and size installs, but never writes it back.
//!
//! # Example TOML
//!
//! ```toml
//! id = "claude-code"
//! version = "1.4.0"
//! category = "claude"
//! dependencies = ["nodejs"]
//! conflicts = ["claude-code-legacy"]
//!
//! [[shared_resources]]
//! tag = "claude-dir"
//! access = "merge"
//!
//! [install]
//! timeout_sec = 300
//!
//! [install.method]
//! type = "script"
//! path = "install.sh"
//!
//! [resources]
//! disk_mb = 400
//! memory_mb = 256
//! install_time_sec = 60
//!
//! [init_hook]
//! priority = 20
//! command = "claude init --workspace ${WORKSPACE}"
//! marker = ".claude/.initialized"
//!
//! [[validation.commands]]
//! name = "claude"
//! expected_pattern = "^\\d+\\.\\d+"
//!
//! [[secrets]]
//! name = "ANTHROPIC_API_KEY"
//! ```

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Name of a shared configuration surface (e.g. `claude-dir`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceTag(String);

impl ResourceTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceTag {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Extension categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtensionCategory {
    AiAgents,
    AiDev,
    Claude,
    Cloud,
    Desktop,
    Devops,
    Documentation,
    Languages,
    Mcp,
    Productivity,
    Research,
    Testing,
}

impl fmt::Display for ExtensionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AiAgents => "ai-agents",
            Self::AiDev => "ai-dev",
            Self::Claude => "claude",
            Self::Cloud => "cloud",
            Self::Desktop => "desktop",
            Self::Devops => "devops",
            Self::Documentation => "documentation",
            Self::Languages => "languages",
            Self::Mcp => "mcp",
            Self::Productivity => "productivity",
            Self::Research => "research",
            Self::Testing => "testing",
        };
        f.write_str(name)
    }
}

/// Complete extension definition.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExtensionDefinition {
    /// Unique identifier (lowercase, digits, `-` or `_`).
    pub id: String,
    /// Semver version string.
    pub version: String,
    pub category: ExtensionCategory,
    #[serde(default)]
    pub description: Option<String>,
    /// Protected extensions are part of the base image and cannot be removed.
    #[serde(default)]
    pub protected: bool,
    /// Ids this extension needs active before it can be installed.
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// Ids that must never be active alongside this extension.
    #[serde(default)]
    pub conflicts: BTreeSet<String>,
    /// Shared configuration surfaces this extension writes to.
    #[serde(default)]
    pub shared_resources: Vec<SharedResource>,
    pub install: InstallSpec,
    #[serde(default)]
    pub remove: Option<RemoveSpec>,
    #[serde(default)]
    pub resources: ResourceNeeds,
    #[serde(default)]
    pub init_hook: Option<InitHook>,
    #[serde(default)]
    pub validation: ValidationSpec,
    #[serde(default)]
    pub secrets: Vec<SecretRef>,
}

/// A declared right over a shared resource.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SharedResource {
    pub tag: ResourceTag,
    #[serde(default)]
    pub access: ResourceAccess,
}

/// How an extension expects to use a shared resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceAccess {
    /// Assumes sole control of the resource.
    #[default]
    Exclusive,
    /// Appends to or deep-merges into the resource and tolerates co-owners.
    Merge,
}

/// Installation configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InstallSpec {
    /// Upper bound for the whole install step; engine default when unset.
    #[serde(default)]
    pub timeout_sec: Option<u64>,
    pub method: InstallMethod,
}

/// Closed set of install methods.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InstallMethod {
    Script(ScriptStep),
    PackageManager(PackageStep),
    Template(TemplateStep),
    Hybrid(HybridStep),
}

impl InstallMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Script(_) => "script",
            Self::PackageManager(_) => "package-manager",
            Self::Template(_) => "template",
            Self::Hybrid(_) => "hybrid",
        }
    }
}

/// A script shipped inside the extension directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ScriptStep {
    /// Path relative to the extension directory.
    pub path: String,
    /// Interpreter; engine default when unset.
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Packages installed through a package manager.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PackageStep {
    pub manager: PackageManager,
    pub packages: Vec<String>,
}

/// Supported package managers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Apt,
    Npm,
    Mise,
    Pip,
    Cargo,
}

impl PackageManager {
    /// Program and leading arguments for installing packages.
    pub fn install_argv(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            Self::Apt => ("apt-get", &["install", "-y", "--no-install-recommends"]),
            Self::Npm => ("npm", &["install", "--global"]),
            Self::Mise => ("mise", &["use", "--global"]),
            Self::Pip => ("pip", &["install", "--user"]),
            Self::Cargo => ("cargo", &["install", "--locked"]),
        }
    }

    /// Program and leading arguments for removing packages.
    pub fn uninstall_argv(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            Self::Apt => ("apt-get", &["remove", "-y"]),
            Self::Npm => ("npm", &["uninstall", "--global"]),
            Self::Mise => ("mise", &["uninstall"]),
            Self::Pip => ("pip", &["uninstall", "-y"]),
            Self::Cargo => ("cargo", &["uninstall"]),
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.install_argv().0)
    }
}

/// A configuration file rendered from a template.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TemplateStep {
    /// Template path relative to the extension directory.
    pub source: String,
    /// Destination path relative to the workspace root.
    pub destination: String,
    #[serde(default)]
    pub mode: TemplateMode,
    /// Shared resource the destination belongs to, if any.
    #[serde(default)]
    pub resource: Option<ResourceTag>,
}

/// How a rendered template is written to its destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateMode {
    #[default]
    Overwrite,
    Append,
    MergeJson,
    MergeYaml,
    SkipIfExists,
}

/// Package installation followed by a script and any templates.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct HybridStep {
    #[serde(default)]
    pub packages: Option<PackageStep>,
    #[serde(default)]
    pub script: Option<ScriptStep>,
    #[serde(default)]
    pub templates: Vec<TemplateStep>,
}

/// Removal configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct RemoveSpec {
    /// Removal deletes user data and needs explicit confirmation.
    #[serde(default)]
    pub requires_confirmation: bool,
    #[serde(default)]
    pub script: Option<ScriptStep>,
    #[serde(default)]
    pub packages: Option<PackageStep>,
    #[serde(default)]
    pub timeout_sec: Option<u64>,
}

/// Declared resource needs, summed for infrastructure sizing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ResourceNeeds {
    #[serde(default)]
    pub disk_mb: u64,
    #[serde(default)]
    pub memory_mb: u64,
    #[serde(default)]
    pub install_time_sec: u64,
}

/// Project initialization hook run after the environment is live.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InitHook {
    /// Lower runs first.
    #[serde(default = "default_priority")]
    pub priority: i32,
    pub command: String,
    /// Workspace-relative path whose presence means the hook already ran.
    pub marker: String,
}

fn default_priority() -> i32 {
    100
}

/// Post-install validation commands.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct ValidationSpec {
    #[serde(default)]
    pub timeout_sec: Option<u64>,
    #[serde(default)]
    pub commands: Vec<ValidationCommand>,
}

/// Command validation
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ValidationCommand {
    /// Program name looked up on PATH.
    pub name: String,
    #[serde(default = "default_version_flag")]
    pub version_flag: String,
    /// Regex the combined output must match.
    #[serde(default)]
    pub expected_pattern: Option<String>,
}

fn default_version_flag() -> String {
    "--version".to_string()
}

/// A secret the install step needs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SecretRef {
    /// Environment variable name exposed to the install step.
    pub name: String,
    /// Lookup key in the secrets provider; defaults to `name`.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_true() -> bool {
    true
}

impl SecretRef {
    pub fn lookup_key(&self) -> &str {
        self.key.as_deref().unwrap_or(&self.name)
    }
}

impl ExtensionDefinition {
    /// Validate fields the engine depends on.
    pub fn validate(&self) -> Result<()> {
        validate_id(&self.id)?;

        semver::Version::parse(&self.version).map_err(|e| Error::InvalidVersion {
            id: self.id.clone(),
            version: self.version.clone(),
            source: e,
        })?;

        if self.dependencies.contains(&self.id) {
            return Err(Error::SelfReference {
                id: self.id.clone(),
                field: "dependencies",
            });
        }
        if self.conflicts.contains(&self.id) {
            return Err(Error::SelfReference {
                id: self.id.clone(),
                field: "conflicts",
            });
        }

        Ok(())
    }

    /// Declared access for `tag`, if this extension claims it.
    pub fn access_for(&self, tag: &ResourceTag) -> Option<ResourceAccess> {
        self.shared_resources
            .iter()
            .find(|r| &r.tag == tag)
            .map(|r| r.access)
    }

    /// Whether this extension names `other` as a conflict.
    pub fn conflicts_with(&self, other: &str) -> bool {
        self.conflicts.contains(other)
    }

    /// Every script the install method would execute.
    pub fn install_scripts(&self) -> Vec<&ScriptStep> {
        match &self.install.method {
            InstallMethod::Script(step) => vec![step],
            InstallMethod::Hybrid(step) => step.script.iter().collect(),
            InstallMethod::PackageManager(_) | InstallMethod::Template(_) => Vec::new(),
        }
    }

    /// Every template the install method would render.
    pub fn install_templates(&self) -> Vec<&TemplateStep> {
        match &self.install.method {
            InstallMethod::Template(step) => vec![step],
            InstallMethod::Hybrid(step) => step.templates.iter().collect(),
            InstallMethod::Script(_) | InstallMethod::PackageManager(_) => Vec::new(),
        }
    }

    /// Stable fingerprint of this definition.
    pub fn digest(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        envkit_fs::checksum::compute_content_checksum(&canonical)
    }
}

/// Check that an id is non-empty and uses `[a-z0-9_-]`.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::InvalidId {
            id: id.to_string(),
            reason: "extension id must not be empty".to_string(),
        });
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(Error::InvalidId {
            id: id.to_string(),
            reason: "extension id must contain only lowercase letters, digits, hyphens, or underscores"
                .to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const FULL: &str = r#"
id = "claude-code"
version = "1.4.0"
category = "claude"
dependencies = ["nodejs"]
conflicts = ["claude-code-legacy"]

[[shared_resources]]
tag = "claude-dir"
access = "merge"

[install]
timeout_sec = 120

[install.method]
type = "script"
path = "install.sh"

[resources]
disk_mb = 400
memory_mb = 256
install_time_sec = 60

[init_hook]
command = "claude init"
marker = ".claude/.initialized"

[[validation.commands]]
name = "claude"
expected_pattern = "^\\d+"

[[secrets]]
name = "ANTHROPIC_API_KEY"
"#;

    #[test]
    fn test_parse_full_definition() {
        let def: ExtensionDefinition = toml::from_str(FULL).unwrap();
        def.validate().unwrap();

        assert_eq!(def.id, "claude-code");
        assert_eq!(def.category, ExtensionCategory::Claude);
        assert!(def.dependencies.contains("nodejs"));
        assert_eq!(
            def.access_for(&ResourceTag::new("claude-dir")),
            Some(ResourceAccess::Merge)
        );
        assert_eq!(def.install.timeout_sec, Some(120));
        assert_eq!(def.install.method.name(), "script");
        assert_eq!(def.resources.disk_mb, 400);
        assert_eq!(def.init_hook.as_ref().unwrap().priority, 100);
        assert_eq!(def.validation.commands[0].version_flag, "--version");
        assert!(def.secrets[0].required);
        assert_eq!(def.secrets[0].lookup_key(), "ANTHROPIC_API_KEY");
        assert_eq!(def.install_scripts().len(), 1);
    }

    #[test]
    fn test_unknown_install_method_is_rejected() {
        let toml_str = r#"
id = "weird"
version = "1.0.0"
category = "testing"

[install.method]
type = "curl-pipe-bash"
url = "https://example.com"
"#;
        assert!(toml::from_str::<ExtensionDefinition>(toml_str).is_err());
    }

    #[test]
    fn test_invalid_version_rejected() {
        let mut def: ExtensionDefinition = toml::from_str(FULL).unwrap();
        def.version = "latest".to_string();
        let err = def.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidVersion { .. }), "got: {err:?}");
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut def: ExtensionDefinition = toml::from_str(FULL).unwrap();
        def.dependencies.insert("claude-code".to_string());
        let err = def.validate().unwrap_err();
        assert!(matches!(err, Error::SelfReference { field: "dependencies", .. }));
    }

    #[test]
    fn test_invalid_ids() {
        assert!(validate_id("").is_err());
        assert!(validate_id("Claude").is_err());
        assert!(validate_id("a b").is_err());
        validate_id("ai-toolkit_2").unwrap();
    }

    #[test]
    fn test_hybrid_collects_scripts_and_templates() {
        let yaml = r#"
id: hybrid-tool
version: 0.2.0
category: devops
install:
  method:
    type: hybrid
    packages:
      manager: apt
      packages: [jq]
    script:
      path: setup.sh
    templates:
      - source: settings.json
        destination: .config/tool/settings.json
        mode: merge-json
        resource: tool-config
"#;
        let def: ExtensionDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(def.install_scripts().len(), 1);
        let templates = def.install_templates();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].mode, TemplateMode::MergeJson);
    }

    #[test]
    fn test_digest_changes_with_definition() {
        let def: ExtensionDefinition = toml::from_str(FULL).unwrap();
        let mut bumped = def.clone();
        bumped.version = "1.5.0".to_string();
        assert_eq!(def.digest(), def.clone().digest());
        assert_ne!(def.digest(), bumped.digest());
    }
}
