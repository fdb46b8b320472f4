//! Reputation provider capability and verdict types

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use proxy_common::ProxyError;
use serde::{Deserialize, Serialize};

use crate::policy::Severity;

/// Qualitative trust verdict for a domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReputationLevel {
    Trusted,
    Unknown,
    Suspicious,
    Blocked,
}

impl ReputationLevel {
    /// Ordinal used by weighted aggregation
    pub fn ordinal(&self) -> f64 {
        match self {
            ReputationLevel::Trusted => 1.0,
            ReputationLevel::Unknown => 2.0,
            ReputationLevel::Suspicious => 3.0,
            ReputationLevel::Blocked => 4.0,
        }
    }

    /// Map a weighted ordinal back to a level
    pub fn from_score(score: f64) -> Self {
        if score <= 1.5 {
            ReputationLevel::Trusted
        } else if score <= 2.5 {
            ReputationLevel::Unknown
        } else if score <= 3.5 {
            ReputationLevel::Suspicious
        } else {
            ReputationLevel::Blocked
        }
    }
}

/// A threat reported by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatInfo {
    /// Threat identifier used for de-duplication (e.g. "phishing")
    pub kind: String,
    pub severity: Severity,
    pub description: String,
}

/// One provider's answer for one domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderVerdict {
    pub level: ReputationLevel,
    /// 0-100
    pub confidence: u8,
    pub categories: Vec<String>,
    pub threats: Vec<ThreatInfo>,
}

impl ProviderVerdict {
    pub fn new(level: ReputationLevel, confidence: u8) -> Self {
        Self {
            level,
            confidence: confidence.min(100),
            categories: Vec::new(),
            threats: Vec::new(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.categories.push(category.into());
        self
    }

    pub fn with_threat(mut self, threat: ThreatInfo) -> Self {
        self.threats.push(threat);
        self
    }
}

/// Per-provider contribution recorded in the aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationSource {
    pub provider: String,
    pub priority: u32,
    pub level: ReputationLevel,
    pub confidence: u8,
}

/// Aggregated trust verdict for a domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainReputationRecord {
    /// Lower-cased, trimmed
    pub domain: String,
    pub level: ReputationLevel,
    /// 0-100
    pub confidence: u8,
    pub sources: Vec<ReputationSource>,
    pub categories: Vec<String>,
    pub threats: Vec<ThreatInfo>,
    pub checked_at: DateTime<Utc>,
    pub from_cache: bool,
}

/// Pluggable source of domain trust signals
#[async_trait]
pub trait ReputationProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Weight multiplier in aggregation
    fn priority(&self) -> u32;

    fn enabled(&self) -> bool {
        true
    }

    /// Query the provider for one normalized domain
    async fn check_domain(&self, domain: &str) -> Result<ProviderVerdict, ProxyError>;

    /// Cheap liveness check; unavailable providers are skipped
    async fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_thresholds() {
        assert_eq!(ReputationLevel::from_score(1.0), ReputationLevel::Trusted);
        assert_eq!(ReputationLevel::from_score(1.5), ReputationLevel::Trusted);
        assert_eq!(ReputationLevel::from_score(1.51), ReputationLevel::Unknown);
        assert_eq!(ReputationLevel::from_score(2.5), ReputationLevel::Unknown);
        assert_eq!(ReputationLevel::from_score(3.5), ReputationLevel::Suspicious);
        assert_eq!(ReputationLevel::from_score(3.51), ReputationLevel::Blocked);
    }

    #[test]
    fn test_verdict_confidence_is_capped() {
        assert_eq!(ProviderVerdict::new(ReputationLevel::Trusted, 250).confidence, 100);
    }
}
