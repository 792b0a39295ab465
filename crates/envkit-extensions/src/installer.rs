//! Guarded execution of install and removal steps
//!
//! Scripts come from the catalog and are untrusted. Before anything runs,
//! every script and template path is checked to stay inside its sandbox
//! root (the extension directory for sources, the workspace for template
//! destinations). Package managers are invoked with a fixed argv, never
//! through a shell, and every subprocess shares one deadline per step.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use envkit_catalog::{
    ExtensionDefinition, InstallMethod, PackageStep, ResourceTag, ScriptStep, TemplateStep,
};

use crate::config::EngineConfig;
use crate::error::ExecutionError;
use crate::process::{BoundedCommand, ProcessOutcome, run_bounded};
use crate::secrets::SecretValue;
use crate::template::{self, TemplateVars, TemplateWrite};

type Result<T> = std::result::Result<T, ExecutionError>;

/// Characters a package specifier may never contain.
const SHELL_META: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '<', '>', '\\', '"', '\'', '\n', '\r', ' ', '\t', '*', '?',
];

/// Everything an install or removal step needs.
#[derive(Debug, Clone, Copy)]
pub struct InstallContext<'a> {
    pub definition: &'a ExtensionDefinition,
    pub extension_dir: &'a Path,
    pub workspace: &'a Path,
    pub config: &'a EngineConfig,
    pub secrets: &'a [(String, SecretValue)],
    /// Tags the collision detector cleared for merging.
    pub merge_tags: &'a BTreeSet<ResourceTag>,
}

/// Steps that ran, in order, for the audit trail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub steps: Vec<String>,
}

impl ExecutionReport {
    pub fn summary(&self) -> String {
        if self.steps.is_empty() {
            "no steps".to_string()
        } else {
            self.steps.join("; ")
        }
    }
}

/// Shared upper bound for all subprocesses of one step.
struct Deadline {
    started: Instant,
    limit: Duration,
}

impl Deadline {
    fn new(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    fn remaining(&self) -> Option<Duration> {
        self.limit
            .checked_sub(self.started.elapsed())
            .filter(|d| !d.is_zero())
    }
}

/// Check every script and template path `def` declares against its
/// sandbox root, before anything is executed or written.
pub fn check_sandbox(def: &ExtensionDefinition, extension_dir: &Path, workspace: &Path) -> Result<()> {
    let remove_script = def.remove.as_ref().and_then(|r| r.script.as_ref());
    for script in def.install_scripts().into_iter().chain(remove_script) {
        confine_source(def, extension_dir, &script.path)?;
    }
    for step in def.install_templates() {
        confine_source(def, extension_dir, &step.source)?;
        confine_destination(def, workspace, &step.destination)?;
    }
    Ok(())
}

/// Reject package specifiers that could be read as options or shell syntax.
pub fn validate_packages(def: &ExtensionDefinition, step: &PackageStep) -> Result<()> {
    for package in &step.packages {
        let reason = if package.is_empty() {
            Some("empty specifier")
        } else if package.starts_with('-') {
            Some("specifier may not start with '-'")
        } else if package.chars().any(|c| SHELL_META.contains(&c)) {
            Some("shell metacharacter in specifier")
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(ExecutionError::InvalidPackageSpec {
                extension: def.id.clone(),
                package: package.clone(),
                reason: reason.to_string(),
            });
        }
    }
    Ok(())
}

/// Run the definition's install method.
pub fn run_install(ctx: &InstallContext<'_>) -> Result<ExecutionReport> {
    let def = ctx.definition;
    let deadline = Deadline::new(ctx.config.install_timeout(def));
    let mut report = ExecutionReport::default();

    tracing::info!(extension = %def.id, method = def.install.method.name(), "Installing extension");

    match &def.install.method {
        InstallMethod::Script(step) => run_script(ctx, step, &deadline, "install", &mut report)?,
        InstallMethod::PackageManager(step) => {
            run_packages(ctx, step, &deadline, "install", &mut report)?
        }
        InstallMethod::Template(step) => render_template(ctx, step, &mut report)?,
        InstallMethod::Hybrid(step) => {
            if let Some(packages) = &step.packages {
                run_packages(ctx, packages, &deadline, "install", &mut report)?;
            }
            if let Some(script) = &step.script {
                run_script(ctx, script, &deadline, "install", &mut report)?;
            }
            for template in &step.templates {
                render_template(ctx, template, &mut report)?;
            }
        }
    }

    Ok(report)
}

/// Run the definition's removal steps: package uninstall, then script.
pub fn run_removal(ctx: &InstallContext<'_>) -> Result<ExecutionReport> {
    let def = ctx.definition;
    let deadline = Deadline::new(ctx.config.remove_timeout(def));
    let mut report = ExecutionReport::default();

    tracing::info!(extension = %def.id, "Removing extension");

    if let Some(remove) = &def.remove {
        if let Some(packages) = &remove.packages {
            run_packages(ctx, packages, &deadline, "uninstall", &mut report)?;
        }
        if let Some(script) = &remove.script {
            run_script(ctx, script, &deadline, "uninstall", &mut report)?;
        }
    }

    Ok(report)
}

fn run_script(
    ctx: &InstallContext<'_>,
    step: &ScriptStep,
    deadline: &Deadline,
    phase: &str,
    report: &mut ExecutionReport,
) -> Result<()> {
    let def = ctx.definition;
    let script = confine_source(def, ctx.extension_dir, &step.path)?;
    let shell = step.shell.as_deref().unwrap_or(&ctx.config.shell);

    let command = base_command(ctx, shell, deadline)?
        .arg(script.display().to_string())
        .args(step.args.iter().cloned());
    let label = format!("{phase} script {}", step.path);
    execute(ctx, &command, &label, deadline)?;
    report.steps.push(label);
    Ok(())
}

fn run_packages(
    ctx: &InstallContext<'_>,
    step: &PackageStep,
    deadline: &Deadline,
    phase: &str,
    report: &mut ExecutionReport,
) -> Result<()> {
    let def = ctx.definition;
    validate_packages(def, step)?;
    if step.packages.is_empty() {
        return Ok(());
    }

    let (program, leading) = if phase == "uninstall" {
        step.manager.uninstall_argv()
    } else {
        step.manager.install_argv()
    };
    let command = base_command(ctx, program, deadline)?
        .args(leading.iter().copied())
        .args(step.packages.iter().cloned());
    let label = format!("{phase} {} packages {}", step.manager, step.packages.join(" "));
    execute(ctx, &command, &label, deadline)?;
    report.steps.push(label);
    Ok(())
}

fn render_template(
    ctx: &InstallContext<'_>,
    step: &TemplateStep,
    report: &mut ExecutionReport,
) -> Result<()> {
    let def = ctx.definition;
    let source = confine_source(def, ctx.extension_dir, &step.source)?;
    let destination = confine_destination(def, ctx.workspace, &step.destination)?;

    let wrap = |source: template::TemplateError| ExecutionError::Template {
        extension: def.id.clone(),
        source,
    };

    let raw = envkit_fs::io::read_text(&source)
        .map_err(template::TemplateError::from)
        .map_err(wrap)?;
    let rendered = TemplateVars::for_extension(def, ctx.extension_dir, ctx.workspace).substitute(&raw);

    let merge = step
        .resource
        .as_ref()
        .is_some_and(|tag| ctx.merge_tags.contains(tag));
    let mode = template::effective_mode(step.mode, merge, &destination);
    let outcome = template::write_rendered(&rendered, &destination, mode).map_err(wrap)?;

    tracing::debug!(
        extension = %def.id,
        destination = %step.destination,
        mode = ?mode,
        outcome = ?outcome,
        "Template applied"
    );
    let verb = match outcome {
        TemplateWrite::Written => "wrote",
        TemplateWrite::Appended => "appended",
        TemplateWrite::Merged => "merged",
        TemplateWrite::Unchanged => "kept",
        TemplateWrite::Skipped => "skipped",
    };
    report
        .steps
        .push(format!("template {} {verb} {}", step.source, step.destination));
    Ok(())
}

fn base_command(ctx: &InstallContext<'_>, program: &str, deadline: &Deadline) -> Result<BoundedCommand> {
    let def = ctx.definition;
    let remaining = deadline.remaining().ok_or_else(|| ExecutionError::InstallTimeout {
        extension: def.id.clone(),
        step: program.to_string(),
        timeout: deadline.limit,
    })?;

    Ok(BoundedCommand::new(program, ctx.extension_dir, remaining)
        .env("ENVKIT_EXTENSION_ID", def.id.clone())
        .env("ENVKIT_EXTENSION_VERSION", def.version.clone())
        .env("ENVKIT_WORKSPACE", ctx.workspace.display().to_string())
        .env("ENVKIT_EXTENSION_DIR", ctx.extension_dir.display().to_string())
        .secrets(ctx.secrets))
}

fn execute(ctx: &InstallContext<'_>, command: &BoundedCommand, label: &str, deadline: &Deadline) -> Result<()> {
    let def = ctx.definition;
    match run_bounded(command) {
        Err(e) => Err(ExecutionError::InstallFailed {
            extension: def.id.clone(),
            step: label.to_string(),
            exit_code: None,
            stderr_tail: format!("failed to start '{}': {e}", command.program),
        }),
        Ok(ProcessOutcome::TimedOut) => Err(ExecutionError::InstallTimeout {
            extension: def.id.clone(),
            step: label.to_string(),
            timeout: deadline.limit,
        }),
        Ok(ProcessOutcome::Finished(output)) if !output.success => {
            Err(ExecutionError::InstallFailed {
                extension: def.id.clone(),
                step: label.to_string(),
                exit_code: output.exit_code,
                stderr_tail: output.tail(ctx.config.stderr_tail_lines),
            })
        }
        Ok(ProcessOutcome::Finished(_)) => {
            tracing::debug!(extension = %def.id, step = label, "Step finished");
            Ok(())
        }
    }
}

/// Resolve a catalog-declared path inside the extension directory.
fn confine_source(def: &ExtensionDefinition, extension_dir: &Path, relative: &str) -> Result<PathBuf> {
    envkit_fs::reject_unsafe_relative(relative).map_err(|e| rejected(def, relative, e))?;

    let path = envkit_fs::confine(extension_dir, relative).map_err(|e| match e {
        envkit_fs::Error::Io { .. } => ExecutionError::ScriptNotFound {
            extension: def.id.clone(),
            path: extension_dir.join(relative),
        },
        other => rejected(def, relative, other),
    })?;

    if !path.is_file() {
        return Err(ExecutionError::ScriptNotFound {
            extension: def.id.clone(),
            path,
        });
    }
    Ok(path)
}

/// Resolve a template destination inside the workspace.
fn confine_destination(def: &ExtensionDefinition, workspace: &Path, relative: &str) -> Result<PathBuf> {
    envkit_fs::confine(workspace, relative).map_err(|e| rejected(def, relative, e))
}

fn rejected(def: &ExtensionDefinition, path: &str, error: envkit_fs::Error) -> ExecutionError {
    ExecutionError::PathTraversalRejected {
        extension: def.id.clone(),
        path: path.to_string(),
        reason: error.to_string(),
    }
}
