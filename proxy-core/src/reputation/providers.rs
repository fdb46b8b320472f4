//! Built-in reputation providers

use async_trait::async_trait;
use proxy_common::{normalize_domain, ProxyError};
use std::net::IpAddr;

use super::provider::{ProviderVerdict, ReputationLevel, ReputationProvider, ThreatInfo};
use crate::filter::DomainList;
use crate::policy::Severity;

/// Operator-maintained trusted / suspicious / blocked domain sets
#[derive(Debug, Clone)]
pub struct StaticListProvider {
    name: String,
    priority: u32,
    enabled: bool,
    trusted: DomainList,
    suspicious: DomainList,
    blocked: DomainList,
}

impl StaticListProvider {
    pub fn new(name: impl Into<String>, priority: u32) -> Self {
        Self {
            name: name.into(),
            priority,
            enabled: true,
            trusted: DomainList::default(),
            suspicious: DomainList::default(),
            blocked: DomainList::default(),
        }
    }

    pub fn with_trusted<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for d in domains {
            self.trusted.insert(d.as_ref());
        }
        self
    }

    pub fn with_suspicious<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for d in domains {
            self.suspicious.insert(d.as_ref());
        }
        self
    }

    pub fn with_blocked<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for d in domains {
            self.blocked.insert(d.as_ref());
        }
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[async_trait]
impl ReputationProvider for StaticListProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    async fn check_domain(&self, domain: &str) -> Result<ProviderVerdict, ProxyError> {
        // Block list wins over trust list
        let verdict = if self.blocked.matches(domain) {
            ProviderVerdict::new(ReputationLevel::Blocked, 100)
                .with_category("blocklist")
                .with_threat(ThreatInfo {
                    kind: "blocklisted".to_string(),
                    severity: Severity::Critical,
                    description: format!("{} is on the {} block list", domain, self.name),
                })
        } else if self.suspicious.matches(domain) {
            ProviderVerdict::new(ReputationLevel::Suspicious, 80).with_category("watchlist")
        } else if self.trusted.matches(domain) {
            ProviderVerdict::new(ReputationLevel::Trusted, 90).with_category("trusted")
        } else {
            // No opinion: zero confidence carries zero weight
            ProviderVerdict::new(ReputationLevel::Unknown, 0)
        };
        Ok(verdict)
    }
}

const SUSPICIOUS_TLDS: &[&str] = &[
    "zip", "mov", "tk", "ml", "ga", "cf", "gq", "xyz", "top", "click", "country", "kim", "work",
];

/// Scores lexical signals of a hostname without any network access
#[derive(Debug, Clone)]
pub struct HeuristicProvider {
    priority: u32,
}

impl HeuristicProvider {
    pub fn new(priority: u32) -> Self {
        Self { priority }
    }

    /// Signals found in `domain` with their weights
    pub fn signals(domain: &str) -> Vec<(&'static str, u8)> {
        let domain = normalize_domain(domain);
        let mut signals = Vec::new();

        if domain.parse::<IpAddr>().is_ok() {
            signals.push(("ip_literal", 35));
        }

        let labels: Vec<&str> = domain.split('.').filter(|l| !l.is_empty()).collect();

        if labels.iter().any(|l| l.starts_with("xn--")) {
            signals.push(("punycode", 25));
        }

        if let Some(tld) = labels.last() {
            if SUSPICIOUS_TLDS.contains(tld) {
                signals.push(("suspicious_tld", 20));
            }
        }

        if labels.len() > 5 {
            signals.push(("deep_subdomain", 15));
        }

        let random_looking = labels.iter().any(|l| {
            l.len() > 25
                && l.chars().filter(|c| c.is_ascii_digit()).count() >= 4
        });
        if random_looking {
            signals.push(("random_label", 15));
        }

        if domain.matches('-').count() > 3 {
            signals.push(("many_hyphens", 10));
        }

        signals
    }
}

#[async_trait]
impl ReputationProvider for HeuristicProvider {
    fn name(&self) -> &str {
        "heuristics"
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    async fn check_domain(&self, domain: &str) -> Result<ProviderVerdict, ProxyError> {
        let signals = Self::signals(domain);
        let score: u32 = signals.iter().map(|(_, w)| *w as u32).sum();

        let mut verdict = if score >= 50 {
            ProviderVerdict::new(ReputationLevel::Suspicious, score.min(90) as u8).with_threat(
                ThreatInfo {
                    kind: "lexical_anomaly".to_string(),
                    severity: Severity::Medium,
                    description: format!("{} has {} suspicious lexical signals", domain, signals.len()),
                },
            )
        } else {
            // Heuristics alone never vouch for a domain
            ProviderVerdict::new(ReputationLevel::Unknown, (30 + score).min(60) as u8)
        };

        for (name, _) in signals {
            verdict = verdict.with_category(name);
        }
        Ok(verdict)
    }
}
