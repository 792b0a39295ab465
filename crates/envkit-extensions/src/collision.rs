//! Collision detection between a candidate and the active extension set
//!
//! For every shared resource the candidate claims, existing owners are
//! looked up in the manifest and the overlap is classified:
//!
//! | Situation                                         | Policy        |
//! |---------------------------------------------------|---------------|
//! | nobody else claims the tag                        | `Allow`       |
//! | candidate and owner both declare `merge`          | `Merge`       |
//! | candidate and owner list each other in conflicts  | `BlockSafety` |
//! | anything else                                     | `BlockUnknown`|
//!
//! Explicit `conflicts` with an active extension block regardless of
//! shared tags. The detector only reports; [`CollisionReport::gate`] turns
//! the report into a refusal.

use std::collections::BTreeSet;

use envkit_catalog::{Catalog, ExtensionDefinition, ResourceAccess, ResourceTag};

use crate::error::GateError;
use crate::manifest::Manifest;

/// Decision for one overlap, ordered from most to least permissive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CollisionPolicy {
    Allow,
    Merge,
    BlockUnknown,
    BlockSafety,
}

/// Decision for one claimed tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagDecision {
    pub tag: ResourceTag,
    pub policy: CollisionPolicy,
    /// Other active extensions holding a claim on the tag.
    pub owners: Vec<String>,
}

/// Everything the detector found for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollisionReport {
    pub candidate: String,
    /// Active extensions the candidate conflicts with, in either direction.
    pub conflicts: Vec<String>,
    pub decisions: Vec<TagDecision>,
}

impl CollisionReport {
    /// Most restrictive policy across the report.
    pub fn policy(&self) -> CollisionPolicy {
        let tag_policy = self
            .decisions
            .iter()
            .map(|d| d.policy)
            .max()
            .unwrap_or(CollisionPolicy::Allow);
        if self.conflicts.is_empty() {
            tag_policy
        } else {
            CollisionPolicy::BlockSafety
        }
    }

    /// Tags the installer must merge into rather than overwrite.
    pub fn merge_tags(&self) -> BTreeSet<ResourceTag> {
        self.decisions
            .iter()
            .filter(|d| d.policy == CollisionPolicy::Merge)
            .map(|d| d.tag.clone())
            .collect()
    }

    /// Refuse the install unless every overlap is acceptable.
    ///
    /// `allow_unknown_ownership` is the explicit override for
    /// [`CollisionPolicy::BlockUnknown`]; nothing overrides a safety block.
    pub fn gate(&self, allow_unknown_ownership: bool) -> Result<(), GateError> {
        if let Some(blocker) = self.conflicts.first() {
            return Err(GateError::ExtensionConflict {
                candidate: self.candidate.clone(),
                blocker: blocker.clone(),
            });
        }

        // A per-tag safety block always names an owner in `conflicts`, so
        // it has already been refused above.
        for decision in &self.decisions {
            match decision.policy {
                CollisionPolicy::Allow | CollisionPolicy::Merge | CollisionPolicy::BlockSafety => {}
                CollisionPolicy::BlockUnknown if allow_unknown_ownership => {
                    tracing::warn!(
                        extension = %self.candidate,
                        resource = %decision.tag,
                        owners = ?decision.owners,
                        "Unknown ownership overlap overridden"
                    );
                }
                CollisionPolicy::BlockUnknown => {
                    return Err(GateError::UnknownOwnershipConflict {
                        candidate: self.candidate.clone(),
                        owner: decision.owners.first().cloned().unwrap_or_default(),
                        resource: decision.tag.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Evaluate `candidate` against the active set recorded in `manifest`.
///
/// The candidate's own entry is ignored, so reinstalling never collides
/// with itself.
pub fn evaluate(candidate: &ExtensionDefinition, manifest: &Manifest, catalog: &Catalog) -> CollisionReport {
    let conflicts: Vec<String> = manifest
        .active_ids()
        .into_iter()
        .filter(|id| *id != candidate.id)
        .filter(|id| {
            candidate.conflicts_with(id)
                || catalog
                    .get(id)
                    .is_some_and(|active| active.conflicts_with(&candidate.id))
        })
        .collect();

    let decisions = candidate
        .shared_resources
        .iter()
        .map(|claim| {
            let owners: Vec<(&str, ResourceAccess)> = manifest
                .owners_of(&claim.tag)
                .into_iter()
                .filter(|c| c.extension_id != candidate.id && manifest.is_active(&c.extension_id))
                .map(|c| (c.extension_id.as_str(), c.access))
                .collect();

            let policy = owners
                .iter()
                .map(|(owner, access)| {
                    if conflicts.iter().any(|c| c == owner) {
                        CollisionPolicy::BlockSafety
                    } else if claim.access == ResourceAccess::Merge && *access == ResourceAccess::Merge {
                        CollisionPolicy::Merge
                    } else {
                        CollisionPolicy::BlockUnknown
                    }
                })
                .max()
                .unwrap_or(CollisionPolicy::Allow);

            TagDecision {
                tag: claim.tag.clone(),
                policy,
                owners: owners.iter().map(|(owner, _)| owner.to_string()).collect(),
            }
        })
        .collect();

    let report = CollisionReport {
        candidate: candidate.id.clone(),
        conflicts,
        decisions,
    };
    tracing::debug!(
        extension = %candidate.id,
        policy = ?report.policy(),
        conflicts = ?report.conflicts,
        "Collision check"
    );
    report
}
