//! Project initialization hooks, run once the environment is live
//!
//! Hooks are independent per-tool bootstrap steps. They run in ascending
//! priority as cached in the manifest at install time, ties broken by id.
//! A hook whose marker already exists is skipped; a failing hook is
//! recorded and the sequence continues.

use std::fmt;
use std::path::Path;

use envkit_catalog::{Catalog, InitHook};

use crate::config::EngineConfig;
use crate::manifest::Manifest;
use crate::process::{BoundedCommand, ProcessOutcome, run_bounded};
use crate::template::TemplateVars;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookStatus {
    Succeeded,
    /// The idempotency marker was already present.
    SkippedMarkerPresent,
    Failed { reason: String },
}

impl fmt::Display for HookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookStatus::Succeeded => f.write_str("succeeded"),
            HookStatus::SkippedMarkerPresent => f.write_str("skipped (marker present)"),
            HookStatus::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookResult {
    pub extension: String,
    pub priority: i32,
    /// Command after variable substitution.
    pub command: String,
    pub status: HookStatus,
}

/// Outcome of a whole hook run, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookReport {
    pub results: Vec<HookResult>,
}

impl HookReport {
    pub fn failures(&self) -> Vec<&HookResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.status, HookStatus::Failed { .. }))
            .collect()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures().is_empty()
    }

    /// Extension ids in the order their hooks were considered.
    pub fn order(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.extension.as_str()).collect()
    }
}

/// Run the init hook of every active extension against `workspace`.
pub fn run_project_init_hooks(
    workspace: &Path,
    manifest: &Manifest,
    catalog: &Catalog,
    config: &EngineConfig,
) -> HookReport {
    let mut pending: Vec<(i32, &str, &InitHook)> = manifest
        .active_entries()
        .filter_map(|entry| {
            let priority = entry.priority?;
            let Some(hook) = catalog.get(&entry.extension_id).and_then(|d| d.init_hook.as_ref()) else {
                tracing::debug!(
                    extension = %entry.extension_id,
                    "Hook recorded at install is no longer declared"
                );
                return None;
            };
            Some((priority, entry.extension_id.as_str(), hook))
        })
        .collect();
    pending.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

    let mut report = HookReport::default();
    for (priority, id, hook) in pending {
        let vars = match catalog.get(id) {
            Some(def) => TemplateVars::for_extension(def, &catalog.extension_dir(id), workspace),
            None => TemplateVars::for_workspace(workspace),
        };
        // Substituted per word so paths with spaces stay one argument.
        let argv = shell_words::split(&hook.command)
            .map(|words| words.iter().map(|w| vars.substitute(w)).collect::<Vec<_>>());
        let command = match &argv {
            Ok(words) => shell_words::join(words),
            Err(_) => hook.command.clone(),
        };
        let status = run_hook(workspace, id, argv, &hook.marker, config);

        match &status {
            HookStatus::Failed { reason } => {
                tracing::warn!(extension = %id, priority, reason = %reason, "Init hook failed");
            }
            other => tracing::info!(extension = %id, priority, status = %other, "Init hook"),
        }
        report.results.push(HookResult {
            extension: id.to_string(),
            priority,
            command,
            status,
        });
    }

    report
}

fn run_hook(
    workspace: &Path,
    id: &str,
    argv: Result<Vec<String>, shell_words::ParseError>,
    marker: &str,
    config: &EngineConfig,
) -> HookStatus {
    let failed = |reason: String| HookStatus::Failed { reason };

    let marker_path = match envkit_fs::confine(workspace, marker) {
        Ok(path) => path,
        Err(e) => return failed(format!("marker {marker:?} rejected: {e}")),
    };
    if marker_path.exists() {
        return HookStatus::SkippedMarkerPresent;
    }

    let argv = match argv {
        Ok(argv) => argv,
        Err(e) => return failed(format!("cannot parse command: {e}")),
    };
    let Some((program, args)) = argv.split_first() else {
        return failed("empty command".to_string());
    };

    let bounded = BoundedCommand::new(program.as_str(), workspace, config.hook_timeout())
        .args(args.iter().cloned())
        .env("ENVKIT_EXTENSION_ID", id)
        .env("ENVKIT_WORKSPACE", workspace.display().to_string());

    match run_bounded(&bounded) {
        Err(e) => failed(format!("could not start '{program}': {e}")),
        Ok(ProcessOutcome::TimedOut) => failed(format!(
            "timed out after {}s",
            config.hook_timeout().as_secs()
        )),
        Ok(ProcessOutcome::Finished(output)) if !output.success => failed(format!(
            "exit code {:?}: {}",
            output.exit_code,
            output.tail(config.stderr_tail_lines)
        )),
        Ok(ProcessOutcome::Finished(_)) => {
            let stamp = format!("{id} {}\n", chrono::Utc::now().to_rfc3339());
            match envkit_fs::io::write_atomic(&marker_path, stamp.as_bytes()) {
                Ok(()) => HookStatus::Succeeded,
                Err(e) => failed(format!("hook ran but marker could not be written: {e}")),
            }
        }
    }
}
