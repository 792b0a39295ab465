//! Post-install validation phase
//!
//! Runs each declared validation command with its version flag and matches
//! the output against the expected pattern. Validation never reads or
//! writes the manifest.

use std::path::Path;

use envkit_catalog::{ExtensionDefinition, ValidationCommand};
use regex::Regex;

use crate::config::EngineConfig;
use crate::error::ExecutionError;
use crate::process::{BoundedCommand, ProcessOutcome, run_bounded};

/// One command that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCommand {
    pub name: String,
    /// First line of the command's output.
    pub reported: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub extension: String,
    pub commands: Vec<ValidatedCommand>,
}

/// Run every validation command `def` declares, stopping at the first
/// mismatch.
pub fn validate_extension(
    def: &ExtensionDefinition,
    workspace: &Path,
    config: &EngineConfig,
) -> Result<ValidationReport, ExecutionError> {
    let timeout = config.validation_timeout(def);
    let mut commands = Vec::with_capacity(def.validation.commands.len());

    for check in &def.validation.commands {
        let failed = |reason: String| ExecutionError::ValidationFailed {
            extension: def.id.clone(),
            command: check.name.clone(),
            reason,
        };

        let pattern = compile(check).map_err(failed)?;
        let command = BoundedCommand::new(&check.name, workspace, timeout).arg(&check.version_flag);

        let output = match run_bounded(&command) {
            Err(e) => return Err(failed(format!("could not run: {e}"))),
            Ok(ProcessOutcome::TimedOut) => {
                return Err(failed(format!("timed out after {}s", timeout.as_secs())));
            }
            Ok(ProcessOutcome::Finished(output)) => output,
        };
        if !output.success {
            return Err(failed(format!(
                "exited with {}",
                output
                    .exit_code
                    .map_or_else(|| "signal".to_string(), |c| c.to_string())
            )));
        }

        let combined = format!("{}{}", output.stdout, output.stderr);
        if let Some(pattern) = &pattern
            && !pattern.is_match(&combined)
        {
            return Err(failed(format!(
                "output {:?} does not match /{}/",
                first_line(&combined),
                pattern.as_str()
            )));
        }

        tracing::debug!(extension = %def.id, command = %check.name, "Validation passed");
        commands.push(ValidatedCommand {
            name: check.name.clone(),
            reported: first_line(&combined).to_string(),
        });
    }

    tracing::info!(extension = %def.id, checks = commands.len(), "Extension validated");
    Ok(ValidationReport {
        extension: def.id.clone(),
        commands,
    })
}

fn compile(check: &ValidationCommand) -> Result<Option<Regex>, String> {
    check
        .expected_pattern
        .as_deref()
        .map(|p| Regex::new(p).map_err(|e| format!("invalid pattern: {e}")))
        .transpose()
}

fn first_line(text: &str) -> &str {
    text.trim().lines().next().unwrap_or_default()
}
