//! Security Policy Evaluation
//!
//! Decides whether an artifact request may leave the sandbox. Every check runs
//! so that all violations are reported at once; the enforcement level only
//! changes which violations the user may override.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use proxy_common::{
    normalize_domain, EnforcementLevel, HttpMethod, ProxyError, ProxyRequest, ProxySettings,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;
use std::sync::{OnceLock, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::filter::DomainList;

/// Well-known non-web ports that artifacts may never reach
pub const DEFAULT_BLOCKED_PORTS: &[u16] = &[
    21, 22, 23, 25, 53, 110, 135, 137, 138, 139, 143, 445, 1433, 1521, 2049, 3306, 3389, 5432,
    5900, 6379, 9200, 11211, 27017,
];

/// Default lifetime of a session override
pub const DEFAULT_OVERRIDE_DURATION: Duration = Duration::from_secs(60 * 60);

const ALLOWED_SCHEMES: [&str; 2] = ["http", "https"];

const PRIVATE_NETWORK_INSTRUCTIONS: &str = "This request targets a private or local network address. \
If you trust this artifact, grant a session override for the host or enable private network access in settings.";

/// Types of policy violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    InvalidUrl,
    BlockedProtocol,
    InsecureTransport,
    BlockedPort,
    BlockedDomain,
    PrivateNetwork,
    CustomRule,
}

impl ViolationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::InvalidUrl => "invalid_url",
            ViolationType::BlockedProtocol => "blocked_protocol",
            ViolationType::InsecureTransport => "insecure_transport",
            ViolationType::BlockedPort => "blocked_port",
            ViolationType::BlockedDomain => "blocked_domain",
            ViolationType::PrivateNetwork => "private_network",
            ViolationType::CustomRule => "custom_rule",
        }
    }
}

impl std::fmt::Display for ViolationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity levels for security violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Everything needed to describe one violation
#[derive(Debug, Clone)]
pub struct ViolationDetails {
    pub violation_type: ViolationType,
    pub description: String,
    pub can_override: bool,
    pub severity: Severity,
    /// Clamped to `[0, 10]` on construction
    pub risk_score: f64,
    pub override_instructions: Option<String>,
    pub rule_id: Option<String>,
}

/// One policy rule that rejected or flagged a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityViolation {
    pub id: String,
    pub request_id: String,
    pub domain: String,
    pub violation_type: ViolationType,
    pub description: String,
    pub can_override: bool,
    pub severity: Severity,
    pub risk_score: f64,
    pub override_instructions: Option<String>,
    pub rule_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SecurityViolation {
    pub fn new(request_id: &str, domain: &str, details: ViolationDetails) -> Self {
        let risk_score = if details.risk_score.is_nan() {
            0.0
        } else {
            details.risk_score.clamp(0.0, 10.0)
        };

        Self {
            id: Uuid::new_v4().to_string(),
            request_id: request_id.to_string(),
            domain: domain.to_string(),
            violation_type: details.violation_type,
            description: details.description,
            can_override: details.can_override,
            severity: details.severity,
            risk_score,
            override_instructions: details.override_instructions,
            rule_id: details.rule_id,
            timestamp: Utc::now(),
        }
    }
}

/// Result of validating one request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub allowed: bool,
    pub violations: Vec<SecurityViolation>,
    pub warnings: Vec<String>,
    /// Every remaining violation is overridable, so a user decision can unblock it
    pub requires_approval: bool,
    pub override_applied: bool,
}

impl ValidationOutcome {
    fn finish(mut self) -> Self {
        self.allowed = self.violations.is_empty();
        self.requires_approval =
            !self.violations.is_empty() && self.violations.iter().all(|v| v.can_override);
        self
    }

    /// Highest-risk violation, used to label the resulting error
    pub fn primary_violation(&self) -> Option<&SecurityViolation> {
        self.violations.iter().max_by(|a, b| {
            a.risk_score
                .partial_cmp(&b.risk_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }

    /// Convert a rejected outcome into the boundary error
    pub fn to_error(&self) -> Option<ProxyError> {
        let primary = self.primary_violation()?;
        Some(ProxyError::SecurityViolation {
            violation_type: primary.violation_type.to_string(),
            details: primary.description.clone(),
            requires_approval: self.requires_approval,
            violations: self
                .violations
                .iter()
                .filter_map(|v| serde_json::to_value(v).ok())
                .collect(),
        })
    }
}

/// Temporary user-granted exception for a domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOverride {
    pub domain: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionOverride {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Custom rule condition - what to check (all conditions must match)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RuleCondition {
    /// Domain or wildcard pattern (e.g. "*.tracker.net")
    Domain(String),

    /// URL contains string (e.g., "/admin")
    UrlContains(String),

    /// URL matches regex
    UrlRegex(String),

    /// HTTP method matches
    Method(HttpMethod),
}

/// Custom rule action
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    /// Add a violation
    Block { reason: String },

    /// Stop evaluating lower-priority rules
    Allow,

    /// Add a warning
    Log { message: String },
}

/// Operator-supplied rule evaluated after the built-in checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomRule {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    /// Higher runs first
    pub priority: i32,
    pub conditions: Vec<RuleCondition>,
    pub action: RuleAction,
}

/// A custom rule with its patterns compiled once
#[derive(Debug, Clone)]
struct CompiledRule {
    rule: CustomRule,
    domains: Vec<DomainList>,
    regexes: Vec<Regex>,
}

impl CompiledRule {
    fn compile(rule: CustomRule) -> Result<Self, ProxyError> {
        let mut domains = Vec::new();
        let mut regexes = Vec::new();
        for condition in &rule.conditions {
            match condition {
                RuleCondition::Domain(pattern) => domains.push(DomainList::new([pattern])),
                RuleCondition::UrlRegex(pattern) => {
                    let re = Regex::new(pattern).map_err(|e| {
                        ProxyError::configuration(
                            "custom_rules",
                            &format!("rule '{}' has an invalid regex: {}", rule.id, e),
                        )
                    })?;
                    regexes.push(re);
                }
                RuleCondition::UrlContains(_) | RuleCondition::Method(_) => {}
            }
        }
        Ok(Self {
            rule,
            domains,
            regexes,
        })
    }

    /// All conditions must match (AND logic)
    fn matches(&self, request: &ProxyRequest, domain: &str) -> bool {
        if !self.rule.enabled {
            return false;
        }
        let mut domains = self.domains.iter();
        let mut regexes = self.regexes.iter();
        self.rule.conditions.iter().all(|condition| match condition {
            RuleCondition::Domain(_) => domains.next().map_or(false, |d| d.matches(domain)),
            RuleCondition::UrlRegex(_) => regexes.next().map_or(false, |re| re.is_match(&request.url)),
            RuleCondition::UrlContains(s) => request.url.contains(s.as_str()),
            RuleCondition::Method(m) => request.method == *m,
        })
    }
}

/// Static part of the policy, derived from settings
#[derive(Debug, Clone)]
pub struct SecurityPolicyConfig {
    pub enforcement_level: EnforcementLevel,
    pub block_private_networks: bool,
    pub require_https: bool,
    pub allowed_domains: Vec<String>,
    pub blocked_domains: Vec<String>,
    /// Blocked in addition to [`DEFAULT_BLOCKED_PORTS`]
    pub extra_blocked_ports: Vec<u16>,
    pub custom_rules: Vec<CustomRule>,
}

impl Default for SecurityPolicyConfig {
    fn default() -> Self {
        Self::from_settings(&ProxySettings::default())
    }
}

impl SecurityPolicyConfig {
    pub fn from_settings(settings: &ProxySettings) -> Self {
        Self {
            enforcement_level: settings.enforcement_level,
            block_private_networks: !settings.allow_private_networks,
            require_https: settings.require_https,
            allowed_domains: settings.allowed_domains.clone(),
            blocked_domains: settings.blocked_domains.clone(),
            extra_blocked_ports: settings.blocked_ports.clone(),
            custom_rules: Vec::new(),
        }
    }

    pub fn with_custom_rules(mut self, rules: Vec<CustomRule>) -> Self {
        self.custom_rules = rules;
        self
    }
}

#[derive(Debug)]
struct CompiledPolicy {
    enforcement_level: EnforcementLevel,
    block_private_networks: bool,
    require_https: bool,
    allowed: DomainList,
    blocked: DomainList,
    blocked_ports: Vec<u16>,
    rules: Vec<CompiledRule>,
    source: SecurityPolicyConfig,
}

impl CompiledPolicy {
    fn compile(config: SecurityPolicyConfig) -> Result<Self, ProxyError> {
        let mut rules = config
            .custom_rules
            .iter()
            .cloned()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>, _>>()?;
        // Stable sort keeps declaration order among equal priorities
        rules.sort_by(|a, b| b.rule.priority.cmp(&a.rule.priority));

        let mut blocked_ports = DEFAULT_BLOCKED_PORTS.to_vec();
        for port in &config.extra_blocked_ports {
            if !blocked_ports.contains(port) {
                blocked_ports.push(*port);
            }
        }

        Ok(Self {
            enforcement_level: config.enforcement_level,
            block_private_networks: config.block_private_networks,
            require_https: config.require_https,
            allowed: DomainList::new(&config.allowed_domains),
            blocked: DomainList::new(&config.blocked_domains),
            blocked_ports,
            rules,
            source: config,
        })
    }
}

/// Security policy evaluator with session overrides
#[derive(Debug)]
pub struct SecurityPolicy {
    policy: RwLock<CompiledPolicy>,
    overrides: DashMap<String, SessionOverride>,
}

impl SecurityPolicy {
    pub fn new(config: SecurityPolicyConfig) -> Result<Self, ProxyError> {
        Ok(Self {
            policy: RwLock::new(CompiledPolicy::compile(config)?),
            overrides: DashMap::new(),
        })
    }

    /// Replace the static policy. Session overrides survive.
    pub fn update_config(&self, config: SecurityPolicyConfig) -> Result<(), ProxyError> {
        let compiled = CompiledPolicy::compile(config)?;
        let mut guard = self.policy.write().unwrap_or_else(|e| e.into_inner());
        *guard = compiled;
        debug!("🔒 Security policy updated");
        Ok(())
    }

    pub fn config(&self) -> SecurityPolicyConfig {
        self.policy
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .source
            .clone()
    }

    /// Evaluate a request against the policy
    pub fn validate(&self, request: &ProxyRequest) -> ValidationOutcome {
        self.validate_at(request, Utc::now())
    }

    fn validate_at(&self, request: &ProxyRequest, now: DateTime<Utc>) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::default();

        let url = match request.parsed_url() {
            Ok(url) => url,
            Err(e) => {
                outcome.violations.push(SecurityViolation::new(
                    &request.id,
                    "",
                    ViolationDetails {
                        violation_type: ViolationType::InvalidUrl,
                        description: e.to_string(),
                        can_override: false,
                        severity: Severity::Medium,
                        risk_score: 5.0,
                        override_instructions: None,
                        rule_id: None,
                    },
                ));
                return outcome.finish();
            }
        };

        let domain = url.host_str().map(normalize_domain).unwrap_or_default();
        let policy = self.policy.read().unwrap_or_else(|e| e.into_inner());

        // Blocked ports are never overridable, not even by a session override
        if let Some(port) = url.port_or_known_default() {
            if policy.blocked_ports.contains(&port) {
                outcome.violations.push(SecurityViolation::new(
                    &request.id,
                    &domain,
                    ViolationDetails {
                        violation_type: ViolationType::BlockedPort,
                        description: format!("Port {} is blocked for artifact traffic", port),
                        can_override: false,
                        severity: Severity::High,
                        risk_score: 8.0,
                        override_instructions: None,
                        rule_id: None,
                    },
                ));
            }
        }

        if let Some(grant) = self.active_override_at(&domain, now) {
            outcome.override_applied = true;
            outcome.warnings.push(format!(
                "Session override active for {} until {} ({})",
                domain,
                grant.expires_at.to_rfc3339(),
                grant.reason
            ));
            debug!("Session override applied for {}", domain);
            return outcome.finish();
        }

        if domain.is_empty() {
            outcome.violations.push(SecurityViolation::new(
                &request.id,
                &domain,
                ViolationDetails {
                    violation_type: ViolationType::InvalidUrl,
                    description: format!("'{}' has no host", request.url),
                    can_override: false,
                    severity: Severity::Medium,
                    risk_score: 5.0,
                    override_instructions: None,
                    rule_id: None,
                },
            ));
        }

        let scheme = url.scheme();
        if !ALLOWED_SCHEMES.contains(&scheme) {
            outcome.violations.push(SecurityViolation::new(
                &request.id,
                &domain,
                ViolationDetails {
                    violation_type: ViolationType::BlockedProtocol,
                    description: format!("Protocol '{}' is not allowed; use http or https", scheme),
                    can_override: false,
                    severity: Severity::High,
                    risk_score: 8.0,
                    override_instructions: None,
                    rule_id: None,
                },
            ));
        }

        if policy.require_https && scheme == "http" {
            if policy.enforcement_level == EnforcementLevel::Strict {
                outcome.violations.push(SecurityViolation::new(
                    &request.id,
                    &domain,
                    ViolationDetails {
                        violation_type: ViolationType::InsecureTransport,
                        description: format!("Plain http to {} is not allowed; use https", domain),
                        can_override: true,
                        severity: Severity::Medium,
                        risk_score: 4.0,
                        override_instructions: Some(
                            "Switch the URL to https or grant a session override.".to_string(),
                        ),
                        rule_id: None,
                    },
                ));
            } else {
                outcome
                    .warnings
                    .push(format!("Insecure http request to {}", domain));
            }
        }

        if !domain.is_empty() && policy.blocked.matches(&domain) {
            outcome.violations.push(SecurityViolation::new(
                &request.id,
                &domain,
                ViolationDetails {
                    violation_type: ViolationType::BlockedDomain,
                    description: format!("Domain {} is on the block list", domain),
                    can_override: policy.enforcement_level == EnforcementLevel::Permissive,
                    severity: Severity::High,
                    risk_score: 7.0,
                    override_instructions: None,
                    rule_id: None,
                },
            ));
        }

        if policy.block_private_networks && is_private_host(&domain) {
            outcome.violations.push(SecurityViolation::new(
                &request.id,
                &domain,
                ViolationDetails {
                    violation_type: ViolationType::PrivateNetwork,
                    description: format!("{} is a private, loopback or link-local address", domain),
                    can_override: true,
                    severity: Severity::High,
                    risk_score: 6.0,
                    override_instructions: Some(PRIVATE_NETWORK_INSTRUCTIONS.to_string()),
                    rule_id: None,
                },
            ));
        }

        // Allow-listed domains override every overridable violation
        if !outcome.violations.is_empty() && policy.allowed.matches(&domain) {
            let (kept, overridden): (Vec<_>, Vec<_>) = outcome
                .violations
                .drain(..)
                .partition(|v| !v.can_override && v.violation_type != ViolationType::BlockedDomain);
            for violation in overridden {
                outcome.warnings.push(format!(
                    "{} overridden by allow-list for {}",
                    violation.violation_type, domain
                ));
            }
            outcome.violations = kept;
        }

        for compiled in &policy.rules {
            if !compiled.matches(request, &domain) {
                continue;
            }
            let rule = &compiled.rule;
            match &rule.action {
                RuleAction::Block { reason } => {
                    outcome.violations.push(SecurityViolation::new(
                        &request.id,
                        &domain,
                        ViolationDetails {
                            violation_type: ViolationType::CustomRule,
                            description: format!("Rule '{}': {}", rule.name, reason),
                            can_override: policy.enforcement_level != EnforcementLevel::Strict,
                            severity: Severity::Medium,
                            risk_score: 5.0,
                            override_instructions: None,
                            rule_id: Some(rule.id.clone()),
                        },
                    ));
                }
                RuleAction::Log { message } => {
                    outcome
                        .warnings
                        .push(format!("Rule '{}': {}", rule.name, message));
                }
                RuleAction::Allow => {
                    outcome
                        .warnings
                        .push(format!("Rule '{}' allowed the request", rule.name));
                    break;
                }
            }
        }

        let outcome = outcome.finish();
        if !outcome.allowed {
            warn!(
                "🔒 Request {} to {} rejected with {} violation(s)",
                request.id,
                domain,
                outcome.violations.len()
            );
        }
        outcome
    }

    /// Grant a time-boxed exception for `domain`
    pub fn create_override(
        &self,
        domain: &str,
        reason: &str,
        duration: Duration,
    ) -> Result<SessionOverride, ProxyError> {
        let domain = normalize_domain(domain);
        if domain.is_empty() {
            return Err(ProxyError::validation("domain", "must not be empty"));
        }
        let duration = chrono::Duration::from_std(duration)
            .map_err(|e| ProxyError::validation("duration", &e.to_string()))?;

        let now = Utc::now();
        let grant = SessionOverride {
            domain: domain.clone(),
            reason: reason.to_string(),
            created_at: now,
            expires_at: now + duration,
        };
        self.overrides.insert(domain.clone(), grant.clone());
        info!(
            "🔓 Session override granted for {} until {} ({})",
            domain,
            grant.expires_at.to_rfc3339(),
            reason
        );
        Ok(grant)
    }

    pub fn remove_override(&self, domain: &str) -> bool {
        self.overrides.remove(&normalize_domain(domain)).is_some()
    }

    /// Non-expired overrides
    pub fn list_overrides(&self) -> Vec<SessionOverride> {
        let now = Utc::now();
        self.overrides
            .iter()
            .filter(|entry| entry.value().is_active_at(now))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn has_active_override(&self, domain: &str) -> bool {
        self.active_override_at(&normalize_domain(domain), Utc::now())
            .is_some()
    }

    fn active_override_at(&self, domain: &str, now: DateTime<Utc>) -> Option<SessionOverride> {
        let grant = self.overrides.get(domain).map(|entry| entry.value().clone())?;
        if grant.is_active_at(now) {
            Some(grant)
        } else {
            self.overrides
                .remove_if(domain, |_, existing| !existing.is_active_at(now));
            None
        }
    }

    /// Drop expired overrides; returns how many were removed
    pub fn cleanup_expired_overrides(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<String> = self
            .overrides
            .iter()
            .filter(|entry| !entry.value().is_active_at(now))
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .iter()
            .filter(|domain| {
                self.overrides
                    .remove_if(domain.as_str(), |_, existing| !existing.is_active_at(now))
                    .is_some()
            })
            .count()
    }
}

fn private_host_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"^localhost$",
            r"\.localhost$",
            r"^127\.\d{1,3}\.\d{1,3}\.\d{1,3}$",
            r"^10\.\d{1,3}\.\d{1,3}\.\d{1,3}$",
            r"^172\.(1[6-9]|2\d|3[01])\.\d{1,3}\.\d{1,3}$",
            r"^192\.168\.\d{1,3}\.\d{1,3}$",
            r"^169\.254\.\d{1,3}\.\d{1,3}$",
            r"^0\.0\.0\.0$",
            r"^::1?$",
            r"^f[cd][0-9a-f]{2}:",
            r"^fe[89ab][0-9a-f]:",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Pattern match on the literal hostname; no DNS resolution is performed.
///
/// IPv4-mapped IPv6 literals (`::ffff:a.b.c.d`, serialized by `url` as
/// `::ffff:7f00:1`) are checked as the IPv4 address they carry.
pub fn is_private_host(host: &str) -> bool {
    let host = normalize_domain(host);
    if let Some(mapped) = host
        .parse::<Ipv6Addr>()
        .ok()
        .and_then(|addr| addr.to_ipv4_mapped())
    {
        return is_private_host(&mapped.to_string());
    }
    private_host_patterns().iter().any(|re| re.is_match(&host))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_with(settings: ProxySettings) -> SecurityPolicy {
        SecurityPolicy::new(SecurityPolicyConfig::from_settings(&settings)).unwrap()
    }

    fn default_policy() -> SecurityPolicy {
        policy_with(ProxySettings::default())
    }

    #[test]
    fn test_public_https_request_is_allowed() {
        let policy = default_policy();
        let outcome = policy.validate(&ProxyRequest::get("a", "https://api.example.com/data"));
        assert!(outcome.allowed);
        assert!(outcome.violations.is_empty());
        assert!(!outcome.requires_approval);
    }

    #[test]
    fn test_private_network_hosts_are_flagged() {
        let policy = default_policy();
        for url in [
            "http://127.0.0.1/",
            "http://10.0.0.5/",
            "http://192.168.1.1/",
            "http://localhost:8080/",
            "http://[fe80::1]/",
        ] {
            let outcome = policy.validate(&ProxyRequest::get("a", url));
            let violation = outcome
                .violations
                .iter()
                .find(|v| v.violation_type == ViolationType::PrivateNetwork)
                .unwrap_or_else(|| panic!("no private_network violation for {}", url));
            assert!(violation.can_override);
            assert!(violation.override_instructions.is_some());
            assert!(!outcome.allowed);
            assert!(outcome.requires_approval);
        }
    }

    #[test]
    fn test_private_networks_allowed_by_setting() {
        let policy = policy_with(ProxySettings {
            allow_private_networks: true,
            ..Default::default()
        });
        let outcome = policy.validate(&ProxyRequest::get("a", "http://192.168.1.1/"));
        assert!(outcome.allowed);
    }

    #[test]
    fn test_blocked_port_is_never_overridable() {
        for level in [
            EnforcementLevel::Strict,
            EnforcementLevel::Moderate,
            EnforcementLevel::Permissive,
        ] {
            let policy = policy_with(ProxySettings {
                enforcement_level: level,
                allowed_domains: vec!["db.example.com".to_string()],
                ..Default::default()
            });
            policy
                .create_override("db.example.com", "testing", DEFAULT_OVERRIDE_DURATION)
                .unwrap();

            let outcome = policy.validate(&ProxyRequest::get("a", "http://db.example.com:3306/"));
            assert!(!outcome.allowed, "port 3306 allowed under {:?}", level);
            assert!(!outcome.requires_approval);
            assert!(outcome
                .violations
                .iter()
                .any(|v| v.violation_type == ViolationType::BlockedPort && !v.can_override));
        }
    }

    #[test]
    fn test_extra_blocked_ports() {
        let policy = policy_with(ProxySettings {
            blocked_ports: vec![8081],
            ..Default::default()
        });
        let outcome = policy.validate(&ProxyRequest::get("a", "https://example.com:8081/"));
        assert!(!outcome.allowed);
    }

    #[test]
    fn test_protocol_allow_list() {
        let policy = default_policy();
        let outcome = policy.validate(&ProxyRequest::get("a", "ftp://files.example.com/x"));
        assert!(!outcome.allowed);
        assert!(outcome
            .violations
            .iter()
            .any(|v| v.violation_type == ViolationType::BlockedProtocol));
    }

    #[test]
    fn test_all_checks_report_together() {
        let policy = policy_with(ProxySettings {
            blocked_domains: vec!["localhost".to_string()],
            ..Default::default()
        });
        let outcome = policy.validate(&ProxyRequest::get("a", "http://localhost:22/"));
        let types: Vec<_> = outcome.violations.iter().map(|v| v.violation_type).collect();
        assert!(types.contains(&ViolationType::BlockedPort));
        assert!(types.contains(&ViolationType::BlockedDomain));
        assert!(types.contains(&ViolationType::PrivateNetwork));
    }

    #[test]
    fn test_blocked_domain_overridable_only_when_permissive() {
        for (level, expected) in [
            (EnforcementLevel::Strict, false),
            (EnforcementLevel::Moderate, false),
            (EnforcementLevel::Permissive, true),
        ] {
            let policy = policy_with(ProxySettings {
                enforcement_level: level,
                blocked_domains: vec!["tracker.net".to_string()],
                ..Default::default()
            });
            let outcome = policy.validate(&ProxyRequest::get("a", "https://cdn.tracker.net/p.js"));
            assert!(!outcome.allowed);
            assert_eq!(outcome.violations[0].can_override, expected);
            assert_eq!(outcome.requires_approval, expected);
        }
    }

    #[test]
    fn test_https_enforcement_depends_on_level() {
        let strict = policy_with(ProxySettings {
            require_https: true,
            enforcement_level: EnforcementLevel::Strict,
            ..Default::default()
        });
        let outcome = strict.validate(&ProxyRequest::get("a", "http://example.com/"));
        assert!(!outcome.allowed);
        assert_eq!(outcome.violations[0].violation_type, ViolationType::InsecureTransport);

        let moderate = policy_with(ProxySettings {
            require_https: true,
            ..Default::default()
        });
        let outcome = moderate.validate(&ProxyRequest::get("a", "http://example.com/"));
        assert!(outcome.allowed);
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn test_allow_list_overrides_overridable_violations() {
        let policy = policy_with(ProxySettings {
            allowed_domains: vec!["192.168.1.10".to_string()],
            ..Default::default()
        });
        let outcome = policy.validate(&ProxyRequest::get("a", "http://192.168.1.10/status"));
        assert!(outcome.allowed);
        assert!(outcome.warnings.iter().any(|w| w.contains("allow-list")));
    }

    #[test]
    fn test_session_override_short_circuits() {
        let policy = default_policy();
        let req = ProxyRequest::get("a", "http://10.0.0.5/api");
        assert!(!policy.validate(&req).allowed);

        policy
            .create_override("10.0.0.5", "local dev server", DEFAULT_OVERRIDE_DURATION)
            .unwrap();
        let outcome = policy.validate(&req);
        assert!(outcome.allowed);
        assert!(outcome.override_applied);
        assert!(outcome.warnings[0].contains("local dev server"));
        assert_eq!(policy.list_overrides().len(), 1);
    }

    #[test]
    fn test_expired_override_is_inert() {
        let policy = default_policy();
        policy
            .create_override("10.0.0.5", "short", Duration::from_secs(0))
            .unwrap();
        let outcome = policy.validate(&ProxyRequest::get("a", "http://10.0.0.5/"));
        assert!(!outcome.allowed);
        assert!(policy.list_overrides().is_empty());
    }

    #[test]
    fn test_cleanup_expired_overrides() {
        let policy = default_policy();
        policy
            .create_override("a.example.com", "expired", Duration::from_secs(0))
            .unwrap();
        policy
            .create_override("b.example.com", "active", DEFAULT_OVERRIDE_DURATION)
            .unwrap();
        assert_eq!(policy.cleanup_expired_overrides(), 1);
        assert!(policy.has_active_override("b.example.com"));
        assert!(policy.remove_override("b.example.com"));
        assert!(!policy.has_active_override("b.example.com"));
    }

    #[test]
    fn test_custom_rules_run_by_priority() {
        let rules = vec![
            CustomRule {
                id: "log-api".to_string(),
                name: "log api".to_string(),
                enabled: true,
                priority: 1,
                conditions: vec![RuleCondition::UrlContains("/api".to_string())],
                action: RuleAction::Log {
                    message: "api call".to_string(),
                },
            },
            CustomRule {
                id: "no-delete".to_string(),
                name: "no deletes".to_string(),
                enabled: true,
                priority: 10,
                conditions: vec![
                    RuleCondition::Method(HttpMethod::Delete),
                    RuleCondition::Domain("*.example.com".to_string()),
                ],
                action: RuleAction::Block {
                    reason: "deletes are not permitted".to_string(),
                },
            },
        ];
        let policy = SecurityPolicy::new(SecurityPolicyConfig::default().with_custom_rules(rules)).unwrap();

        let delete = ProxyRequest::new("a", HttpMethod::Delete, "https://api.example.com/api/items/1");
        let outcome = policy.validate(&delete);
        assert!(!outcome.allowed);
        assert_eq!(outcome.violations[0].rule_id.as_deref(), Some("no-delete"));
        assert!(outcome.requires_approval);
        assert_eq!(outcome.warnings.len(), 1);

        let get = ProxyRequest::get("a", "https://api.example.com/api/items/1");
        let outcome = policy.validate(&get);
        assert!(outcome.allowed);
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn test_allow_rule_stops_evaluation() {
        let rules = vec![
            CustomRule {
                id: "allow".to_string(),
                name: "allow docs".to_string(),
                enabled: true,
                priority: 5,
                conditions: vec![RuleCondition::UrlContains("/docs".to_string())],
                action: RuleAction::Allow,
            },
            CustomRule {
                id: "block".to_string(),
                name: "block all".to_string(),
                enabled: true,
                priority: 1,
                conditions: Vec::new(),
                action: RuleAction::Block {
                    reason: "default deny".to_string(),
                },
            },
        ];
        let policy = SecurityPolicy::new(SecurityPolicyConfig::default().with_custom_rules(rules)).unwrap();
        assert!(policy.validate(&ProxyRequest::get("a", "https://example.com/docs")).allowed);
        assert!(!policy.validate(&ProxyRequest::get("a", "https://example.com/other")).allowed);
    }

    #[test]
    fn test_invalid_rule_regex_is_rejected() {
        let rules = vec![CustomRule {
            id: "bad".to_string(),
            name: "bad".to_string(),
            enabled: true,
            priority: 0,
            conditions: vec![RuleCondition::UrlRegex("(".to_string())],
            action: RuleAction::Allow,
        }];
        assert!(SecurityPolicy::new(SecurityPolicyConfig::default().with_custom_rules(rules)).is_err());
    }

    #[test]
    fn test_unparsable_url_is_a_hard_violation() {
        let policy = default_policy();
        let outcome = policy.validate(&ProxyRequest::get("a", "::not a url::"));
        assert!(!outcome.allowed);
        assert!(!outcome.requires_approval);
        assert_eq!(outcome.violations[0].violation_type, ViolationType::InvalidUrl);
    }

    #[test]
    fn test_risk_score_is_clamped() {
        let violation = SecurityViolation::new(
            "r",
            "example.com",
            ViolationDetails {
                violation_type: ViolationType::CustomRule,
                description: "x".to_string(),
                can_override: true,
                severity: Severity::Low,
                risk_score: 42.0,
                override_instructions: None,
                rule_id: None,
            },
        );
        assert_eq!(violation.risk_score, 10.0);
    }

    #[test]
    fn test_private_host_patterns() {
        assert!(is_private_host("172.16.0.1"));
        assert!(is_private_host("172.31.255.255"));
        assert!(!is_private_host("172.32.0.1"));
        assert!(is_private_host("169.254.10.1"));
        assert!(is_private_host("fd12:3456::1"));
        assert!(is_private_host("::1"));
        assert!(is_private_host("[::1]"));
        assert!(!is_private_host("8.8.8.8"));
        assert!(!is_private_host("example.com"));
        assert!(!is_private_host("fe.example.com"));

        assert!(is_private_host("::ffff:127.0.0.1"));
        assert!(is_private_host("::ffff:7f00:1"));
        assert!(is_private_host("[::ffff:a00:5]"));
        assert!(!is_private_host("::ffff:808:808"));
    }

    #[test]
    fn test_ipv4_mapped_ipv6_targets_are_flagged() {
        let policy = default_policy();
        for url in [
            "http://[::ffff:127.0.0.1]/",
            "http://[::ffff:10.0.0.5]/",
            "http://[::ffff:192.168.1.1]/",
            "http://[::ffff:169.254.169.254]/latest/meta-data/",
        ] {
            let outcome = policy.validate(&ProxyRequest::get("a", url));
            assert!(!outcome.allowed, "{} was allowed", url);
            assert!(outcome
                .violations
                .iter()
                .any(|v| v.violation_type == ViolationType::PrivateNetwork));
        }

        let outcome = policy.validate(&ProxyRequest::get("a", "http://[::ffff:8.8.8.8]/"));
        assert!(outcome.allowed);
    }
}
