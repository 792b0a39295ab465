//! Profile resource aggregation and provider sizing
//!
//! Pure functions only: nothing here reads the workspace, so sizing can run
//! before any infrastructure exists.

use std::fmt;

use envkit_catalog::ResourceNeeds;
use serde::{Deserialize, Serialize};

use crate::dependency::ResolutionPlan;
use crate::error::{Error, Result};

/// Coarse size class of an aggregated plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceTier {
    Small,
    Medium,
    Large,
    Xlarge,
}

impl ResourceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceTier::Small => "small",
            ResourceTier::Medium => "medium",
            ResourceTier::Large => "large",
            ResourceTier::Xlarge => "xlarge",
        }
    }
}

impl fmt::Display for ResourceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive upper bounds per tier, ascending. Anything above the last row
/// is [`ResourceTier::Xlarge`].
const THRESHOLDS: &[(ResourceTier, ResourceNeeds)] = &[
    (
        ResourceTier::Small,
        ResourceNeeds {
            disk_mb: 10_000,
            memory_mb: 2_048,
            install_time_sec: 600,
        },
    ),
    (
        ResourceTier::Medium,
        ResourceNeeds {
            disk_mb: 30_000,
            memory_mb: 4_096,
            install_time_sec: 1_800,
        },
    ),
    (
        ResourceTier::Large,
        ResourceNeeds {
            disk_mb: 60_000,
            memory_mb: 8_192,
            install_time_sec: 3_600,
        },
    ),
];

/// Providers with a sizing table.
pub const PROVIDERS: &[&str] = &[
    "docker",
    "fly",
    "devpod",
    "e2b",
    "kubernetes",
    "runpod",
    "northflank",
];

/// Machine size per provider, indexed by tier order.
const MACHINE_SIZES: &[(&str, [&str; 4])] = &[
    (
        "docker",
        [
            "cpus=2,memory=4g",
            "cpus=4,memory=8g",
            "cpus=8,memory=16g",
            "cpus=16,memory=32g",
        ],
    ),
    (
        "fly",
        ["shared-cpu-2x", "performance-2x", "performance-4x", "performance-8x"],
    ),
    (
        "devpod",
        ["small", "medium", "large", "xlarge"],
    ),
    (
        "e2b",
        ["2vcpu-4gb", "4vcpu-8gb", "8vcpu-16gb", "16vcpu-32gb"],
    ),
    (
        "kubernetes",
        [
            "cpu=2,memory=4Gi",
            "cpu=4,memory=8Gi",
            "cpu=8,memory=16Gi",
            "cpu=16,memory=32Gi",
        ],
    ),
    (
        "runpod",
        ["cpu3c-2-4", "cpu3c-4-8", "cpu3c-8-16", "cpu3c-16-32"],
    ),
    (
        "northflank",
        ["nf-compute-20", "nf-compute-50", "nf-compute-100", "nf-compute-200"],
    ),
];

/// Sizing result handed to a provider adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizingDecision {
    pub provider: String,
    pub tier: ResourceTier,
    pub machine_size: String,
    pub totals: ResourceNeeds,
}

/// Sum the declared needs of every plan member.
pub fn aggregate(plan: &ResolutionPlan) -> ResourceNeeds {
    plan.iter().fold(ResourceNeeds::default(), |acc, def| ResourceNeeds {
        disk_mb: acc.disk_mb.saturating_add(def.resources.disk_mb),
        memory_mb: acc.memory_mb.saturating_add(def.resources.memory_mb),
        install_time_sec: acc
            .install_time_sec
            .saturating_add(def.resources.install_time_sec),
    })
}

/// Smallest tier whose every bound holds for `totals`.
pub fn classify(totals: &ResourceNeeds) -> ResourceTier {
    THRESHOLDS
        .iter()
        .find(|(_, max)| {
            totals.disk_mb <= max.disk_mb
                && totals.memory_mb <= max.memory_mb
                && totals.install_time_sec <= max.install_time_sec
        })
        .map(|(tier, _)| *tier)
        .unwrap_or(ResourceTier::Xlarge)
}

/// Provider-specific machine size for `tier`.
pub fn machine_size(provider: &str, tier: ResourceTier) -> Result<&'static str> {
    MACHINE_SIZES
        .iter()
        .find(|(name, _)| *name == provider)
        .map(|(_, sizes)| sizes[tier as usize])
        .ok_or_else(|| Error::UnknownProvider {
            provider: provider.to_string(),
            known: PROVIDERS.join(", "),
        })
}

/// Aggregate `plan`, classify it and map it onto `provider`'s sizes.
pub fn compute_resource_tier(plan: &ResolutionPlan, provider: &str) -> Result<SizingDecision> {
    let totals = aggregate(plan);
    let tier = classify(&totals);
    let size = machine_size(provider, tier)?;
    Ok(SizingDecision {
        provider: provider.to_string(),
        tier,
        machine_size: size.to_string(),
        totals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::PlanDirection;
    use envkit_test_utils::ExtensionBuilder;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn plan(needs: &[(u64, u64, u64)]) -> ResolutionPlan {
        let members = needs
            .iter()
            .enumerate()
            .map(|(i, (disk, mem, time))| {
                ExtensionBuilder::new(&format!("ext-{i}"))
                    .resources(*disk, *mem, *time)
                    .build()
            })
            .collect();
        ResolutionPlan::new(PlanDirection::Install, members)
    }

    #[test]
    fn test_minimal_profile_is_small() {
        let plan = plan(&[(1000, 128, 30), (2200, 256, 90)]);
        let decision = compute_resource_tier(&plan, "docker").unwrap();
        assert_eq!(
            decision.totals,
            ResourceNeeds {
                disk_mb: 3200,
                memory_mb: 384,
                install_time_sec: 120
            }
        );
        assert_eq!(decision.tier, ResourceTier::Small);
        assert_eq!(decision.machine_size, "cpus=2,memory=4g");
    }

    #[rstest]
    #[case(10_000, 2_048, 600, ResourceTier::Small)]
    #[case(10_001, 0, 0, ResourceTier::Medium)]
    #[case(0, 4_097, 0, ResourceTier::Large)]
    #[case(0, 0, 3_601, ResourceTier::Xlarge)]
    fn test_thresholds_are_inclusive(
        #[case] disk: u64,
        #[case] mem: u64,
        #[case] time: u64,
        #[case] expected: ResourceTier,
    ) {
        assert_eq!(
            classify(&ResourceNeeds {
                disk_mb: disk,
                memory_mb: mem,
                install_time_sec: time
            }),
            expected
        );
    }

    #[test]
    fn test_empty_plan_is_small() {
        assert_eq!(classify(&aggregate(&plan(&[]))), ResourceTier::Small);
    }

    #[test]
    fn test_sizing_is_pure() {
        let plan = plan(&[(20_000, 3_000, 100), (5_000, 500, 100)]);
        let first = compute_resource_tier(&plan, "fly").unwrap();
        let second = compute_resource_tier(&plan, "fly").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.tier, ResourceTier::Medium);
        assert_eq!(first.machine_size, "performance-2x");
    }

    #[test]
    fn test_every_provider_has_every_tier() {
        for provider in PROVIDERS {
            for tier in [
                ResourceTier::Small,
                ResourceTier::Medium,
                ResourceTier::Large,
                ResourceTier::Xlarge,
            ] {
                assert!(machine_size(provider, tier).is_ok(), "{provider}/{tier}");
            }
        }
    }

    #[test]
    fn test_unknown_provider() {
        let err = compute_resource_tier(&plan(&[]), "mainframe").unwrap_err();
        assert!(matches!(err, Error::UnknownProvider { ref provider, .. } if provider == "mainframe"));
    }

    #[test]
    fn test_aggregate_saturates() {
        let plan = plan(&[(u64::MAX, 0, 0), (1, 0, 0)]);
        assert_eq!(aggregate(&plan).disk_mb, u64::MAX);
    }
}
