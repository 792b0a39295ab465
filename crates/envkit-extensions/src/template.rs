//! Whitelisted variable substitution and template writes
//!
//! Templates and hook commands may reference a fixed set of `${NAME}`
//! variables. Nothing else is expanded: unknown placeholders stay verbatim
//! and no command interpreter ever sees the input.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use envkit_catalog::{ExtensionDefinition, TemplateMode};
use envkit_fs::io;

/// Variables available to templates and hook commands.
pub const VARIABLE_NAMES: &[&str] = &[
    "WORKSPACE",
    "EXTENSION_ID",
    "EXTENSION_VERSION",
    "EXTENSION_DIR",
    "HOME",
];

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error(transparent)]
    Fs(#[from] envkit_fs::Error),

    #[error("cannot merge {format} into {}: {message}", .path.display())]
    Merge {
        path: PathBuf,
        format: &'static str,
        message: String,
    },
}

/// Values for the whitelisted variables.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    vars: BTreeMap<String, String>,
}

impl TemplateVars {
    pub fn for_extension(def: &ExtensionDefinition, extension_dir: &Path, workspace: &Path) -> Self {
        let mut vars = Self::for_workspace(workspace);
        vars.set("EXTENSION_ID", &def.id);
        vars.set("EXTENSION_VERSION", &def.version);
        vars.set("EXTENSION_DIR", &extension_dir.display().to_string());
        vars
    }

    pub fn for_workspace(workspace: &Path) -> Self {
        let mut vars = Self::default();
        vars.set("WORKSPACE", &workspace.display().to_string());
        if let Some(home) = std::env::var_os("HOME") {
            vars.set("HOME", &home.to_string_lossy());
        }
        vars
    }

    fn set(&mut self, name: &str, value: &str) {
        if VARIABLE_NAMES.contains(&name) {
            self.vars.insert(name.to_string(), value.to_string());
        }
    }

    pub fn substitute(&self, input: &str) -> String {
        substitute_vars(input, &self.vars)
    }
}

/// Substitute `${VAR_NAME}` patterns with values from `vars`.
pub fn substitute_vars(input: &str, vars: &BTreeMap<String, String>) -> String {
    let mut result = input.to_string();
    for (key, value) in vars {
        let pattern = format!("${{{}}}", key);
        result = result.replace(&pattern, value);
    }
    result
}

/// What a template write did to its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateWrite {
    Written,
    Appended,
    Merged,
    /// Destination already held the content.
    Unchanged,
    /// `skip-if-exists` and the destination exists.
    Skipped,
}

/// Mode to use once the collision detector has decided a resource is
/// shared. An `overwrite` of a merged resource becomes a structural merge
/// (JSON/YAML) or an append.
pub fn effective_mode(declared: TemplateMode, merge: bool, destination: &Path) -> TemplateMode {
    if !merge || declared != TemplateMode::Overwrite {
        return declared;
    }
    match destination
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => TemplateMode::MergeJson,
        Some("yaml" | "yml") => TemplateMode::MergeYaml,
        _ => TemplateMode::Append,
    }
}

/// Write rendered template content to `destination`.
pub fn write_rendered(
    rendered: &str,
    destination: &Path,
    mode: TemplateMode,
) -> Result<TemplateWrite, TemplateError> {
    let existing = io::read_text_if_exists(destination)?;

    let (content, outcome) = match (mode, existing) {
        (TemplateMode::SkipIfExists, Some(_)) => return Ok(TemplateWrite::Skipped),
        (TemplateMode::Overwrite | TemplateMode::SkipIfExists, _) => {
            (rendered.to_string(), TemplateWrite::Written)
        }
        (TemplateMode::Append, None) => (rendered.to_string(), TemplateWrite::Written),
        (TemplateMode::Append, Some(current)) => {
            if current.contains(rendered.trim_end()) {
                return Ok(TemplateWrite::Unchanged);
            }
            let mut combined = current;
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(rendered);
            (combined, TemplateWrite::Appended)
        }
        (TemplateMode::MergeJson, current) => (
            merge_json_text(current.as_deref(), rendered, destination)?,
            TemplateWrite::Merged,
        ),
        (TemplateMode::MergeYaml, current) => (
            merge_yaml_text(current.as_deref(), rendered, destination)?,
            TemplateWrite::Merged,
        ),
    };

    io::write_atomic(destination, content.as_bytes())?;
    Ok(outcome)
}

fn merge_json_text(
    current: Option<&str>,
    rendered: &str,
    path: &Path,
) -> Result<String, TemplateError> {
    let parse = |text: &str| -> Result<serde_json::Value, TemplateError> {
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Object(Default::default()));
        }
        serde_json::from_str(text).map_err(|e| TemplateError::Merge {
            path: path.to_path_buf(),
            format: "JSON",
            message: e.to_string(),
        })
    };

    let mut base = parse(current.unwrap_or(""))?;
    merge_json(&mut base, parse(rendered)?);
    let mut text = serde_json::to_string_pretty(&base).map_err(|e| TemplateError::Merge {
        path: path.to_path_buf(),
        format: "JSON",
        message: e.to_string(),
    })?;
    text.push('\n');
    Ok(text)
}

/// Objects merge key by key, arrays gain missing items, scalars are
/// replaced.
fn merge_json(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base), serde_json::Value::Object(overlay)) => {
            for (key, value) in overlay {
                merge_json(base.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (serde_json::Value::Array(base), serde_json::Value::Array(overlay)) => {
            for item in overlay {
                if !base.contains(&item) {
                    base.push(item);
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn merge_yaml_text(
    current: Option<&str>,
    rendered: &str,
    path: &Path,
) -> Result<String, TemplateError> {
    let parse = |text: &str| -> Result<serde_yaml::Value, TemplateError> {
        if text.trim().is_empty() {
            return Ok(serde_yaml::Value::Mapping(Default::default()));
        }
        serde_yaml::from_str(text).map_err(|e| TemplateError::Merge {
            path: path.to_path_buf(),
            format: "YAML",
            message: e.to_string(),
        })
    };

    let mut base = parse(current.unwrap_or(""))?;
    merge_yaml(&mut base, parse(rendered)?);
    serde_yaml::to_string(&base).map_err(|e| TemplateError::Merge {
        path: path.to_path_buf(),
        format: "YAML",
        message: e.to_string(),
    })
}

fn merge_yaml(base: &mut serde_yaml::Value, overlay: serde_yaml::Value) {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(base), serde_yaml::Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                if let Some(existing) = base.get_mut(&key) {
                    merge_yaml(existing, value);
                } else {
                    base.insert(key, value);
                }
            }
        }
        (serde_yaml::Value::Sequence(base), serde_yaml::Value::Sequence(overlay)) => {
            for item in overlay {
                if !base.contains(&item) {
                    base.push(item);
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
