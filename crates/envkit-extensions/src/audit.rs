//! Append-only audit log of mutating decisions (`.envkit/audit.jsonl`).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use envkit_fs::{StatePath, io};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditAction {
    Install,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: AuditAction,
    /// Extension id, or `profile:<name>` for a profile request that never
    /// reached its members.
    pub resource: String,
    pub result: AuditOutcome,
    /// Whether the attempt was part of a rate-limit exempt batch.
    #[serde(default)]
    pub batch: bool,
    /// Phase that failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub details: String,
}

impl AuditRecord {
    pub fn success(actor: &str, action: AuditAction, resource: &str, details: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            actor: actor.to_string(),
            action,
            resource: resource.to_string(),
            result: AuditOutcome::Success,
            batch: false,
            stage: None,
            details: details.into(),
        }
    }

    pub fn failure(actor: &str, action: AuditAction, resource: &str, error: &Error) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            actor: actor.to_string(),
            action,
            resource: resource.to_string(),
            result: AuditOutcome::Failure,
            batch: false,
            stage: Some(error.stage().to_string()),
            details: error.to_string(),
        }
    }

    pub fn in_batch(mut self, batch: bool) -> Self {
        self.batch = batch;
        self
    }
}

/// Handle on a workspace's audit log.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(workspace: &Path) -> Self {
        Self {
            path: StatePath::AuditLog.under(workspace),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single JSON line.
    pub fn append(&self, record: &AuditRecord) -> Result<()> {
        let line = serde_json::to_string(record).map_err(|e| envkit_fs::Error::ConfigSerialize {
            path: self.path.clone(),
            format: "JSON".into(),
            message: e.to_string(),
        })?;
        io::append_line(&self.path, &line)?;
        tracing::info!(
            actor = %record.actor,
            action = ?record.action,
            resource = %record.resource,
            result = ?record.result,
            "Audit record"
        );
        Ok(())
    }

    /// Every record in append order. Lines that do not parse are skipped
    /// with a warning.
    pub fn records(&self) -> Result<Vec<AuditRecord>> {
        let Some(content) = io::read_text_if_exists(&self.path)? else {
            return Ok(Vec::new());
        };

        Ok(content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(number, line)| match serde_json::from_str(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(line = number + 1, error = %e, "Skipping malformed audit line");
                    None
                }
            })
            .collect())
    }
}
