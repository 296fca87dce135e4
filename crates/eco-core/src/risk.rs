//! Worst-case aggregation of per-domain risk classifications.

use serde::{Deserialize, Serialize};

use crate::models::{Domain, RiskClassification, RiskLevel};

/// Combined assessment across domains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallRisk {
    /// Highest verified level. `None` when no domain produced data.
    pub level: RiskLevel,
    /// Domains that drove `level`.
    pub driving_domains: Vec<Domain>,
    /// Domains whose analysis could not be completed.
    pub unknown_domains: Vec<Domain>,
    /// Domains classified from a subset of their layers.
    #[serde(default)]
    pub degraded_domains: Vec<Domain>,
    pub classifications: Vec<RiskClassification>,
}

impl OverallRisk {
    /// True when at least one domain could not be analyzed, fully or in part.
    pub fn is_degraded(&self) -> bool {
        !self.unknown_domains.is_empty() || !self.degraded_domains.is_empty()
    }

    /// True when every domain was analyzed and none carries risk.
    pub fn is_verified_clear(&self) -> bool {
        self.level == RiskLevel::None && !self.is_degraded() && !self.classifications.is_empty()
    }
}

/// Aggregate with reporting precedence HIGH > MODERATE > LOW > NONE.
/// UNKNOWN entries never raise or lower the level; they are listed in
/// `unknown_domains` instead.
pub fn aggregate(classifications: &[RiskClassification]) -> OverallRisk {
    let mut level = RiskLevel::None;
    let mut best = 0u8;
    let mut unknown_domains = Vec::new();
    let mut degraded_domains = Vec::new();

    for classification in classifications {
        if classification.degraded && !degraded_domains.contains(&classification.domain) {
            degraded_domains.push(classification.domain);
        }
        match classification.level.precedence() {
            Some(precedence) if precedence > best => {
                best = precedence;
                level = classification.level;
            }
            Some(_) => {}
            None => {
                if !unknown_domains.contains(&classification.domain) {
                    unknown_domains.push(classification.domain);
                }
            }
        }
    }

    let mut driving_domains: Vec<Domain> = classifications
        .iter()
        .filter(|c| c.level == level && level != RiskLevel::None)
        .map(|c| c.domain)
        .collect();
    driving_domains.sort();
    driving_domains.dedup();
    unknown_domains.sort();
    degraded_domains.sort();

    if !unknown_domains.is_empty() || !degraded_domains.is_empty() {
        tracing::warn!(
            unknown = ?unknown_domains,
            partial = ?degraded_domains,
            "risk aggregation is degraded"
        );
    }

    OverallRisk {
        level,
        driving_domains,
        unknown_domains,
        degraded_domains,
        classifications: classifications.to_vec(),
    }
}
