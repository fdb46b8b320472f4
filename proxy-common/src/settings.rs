//! Runtime settings of the artifact network proxy
//!
//! [`ProxySettings`] is the full, validated settings object. Hosts change it
//! with a [`SettingsUpdate`], where every field is optional.

use serde::{Deserialize, Serialize};

use crate::error::ProxyError;

/// Global dial controlling which policy violations are overridable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementLevel {
    Strict,
    #[default]
    Moderate,
    Permissive,
}

impl std::str::FromStr for EnforcementLevel {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(EnforcementLevel::Strict),
            "moderate" => Ok(EnforcementLevel::Moderate),
            "permissive" => Ok(EnforcementLevel::Permissive),
            other => Err(ProxyError::validation(
                "enforcement_level",
                &format!("unknown level '{}'", other),
            )),
        }
    }
}

/// Retry, compression, redirect and certificate options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedSettings {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Linear backoff base: attempt k waits `retry_delay_ms * k`
    pub retry_delay_ms: u64,
    pub enable_compression: bool,
    pub follow_redirects: bool,
    pub max_redirects: u32,
    pub validate_certificates: bool,
    pub max_response_size_bytes: usize,
    /// Fail non-2xx responses instead of returning them
    pub validate_status: bool,
}

impl Default for AdvancedSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
            enable_compression: true,
            follow_redirects: true,
            max_redirects: 5,
            validate_certificates: true,
            max_response_size_bytes: 10 * 1024 * 1024,
            validate_status: false,
        }
    }
}

/// Full proxy settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub max_concurrent_requests: usize,
    pub default_timeout_ms: u64,
    pub enable_caching: bool,
    pub cache_default_ttl_seconds: u64,
    pub rate_limit_per_minute: u32,
    pub enable_reputation_check: bool,
    pub allow_private_networks: bool,
    pub enforcement_level: EnforcementLevel,
    /// Warn (moderate/permissive) or violate (strict) on plain http
    pub require_https: bool,
    pub allowed_domains: Vec<String>,
    pub blocked_domains: Vec<String>,
    /// Ports blocked in addition to the built-in set
    pub blocked_ports: Vec<u16>,
    pub advanced: AdvancedSettings,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 10,
            default_timeout_ms: 30_000,
            enable_caching: true,
            cache_default_ttl_seconds: 300,
            rate_limit_per_minute: 60,
            enable_reputation_check: true,
            allow_private_networks: false,
            enforcement_level: EnforcementLevel::Moderate,
            require_https: false,
            allowed_domains: Vec::new(),
            blocked_domains: Vec::new(),
            blocked_ports: Vec::new(),
            advanced: AdvancedSettings::default(),
        }
    }
}

/// Partial advanced settings update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedSettingsUpdate {
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub enable_compression: Option<bool>,
    pub follow_redirects: Option<bool>,
    pub max_redirects: Option<u32>,
    pub validate_certificates: Option<bool>,
    pub max_response_size_bytes: Option<usize>,
    pub validate_status: Option<bool>,
}

/// Partial settings update; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsUpdate {
    pub max_concurrent_requests: Option<usize>,
    pub default_timeout_ms: Option<u64>,
    pub enable_caching: Option<bool>,
    pub cache_default_ttl_seconds: Option<u64>,
    pub rate_limit_per_minute: Option<u32>,
    pub enable_reputation_check: Option<bool>,
    pub allow_private_networks: Option<bool>,
    pub enforcement_level: Option<EnforcementLevel>,
    pub require_https: Option<bool>,
    pub allowed_domains: Option<Vec<String>>,
    pub blocked_domains: Option<Vec<String>>,
    pub blocked_ports: Option<Vec<u16>>,
    pub advanced: Option<AdvancedSettingsUpdate>,
}

/// Upper bound on `advanced.max_redirects`
pub const MAX_REDIRECTS_LIMIT: u32 = 20;

impl ProxySettings {
    /// Merge a partial update into a copy of these settings and validate it.
    ///
    /// On error `self` is untouched.
    pub fn apply(&self, update: &SettingsUpdate) -> Result<ProxySettings, ProxyError> {
        let mut next = self.clone();

        macro_rules! merge {
            ($target:expr, $source:expr) => {
                if let Some(value) = $source.clone() {
                    $target = value;
                }
            };
        }

        merge!(next.max_concurrent_requests, update.max_concurrent_requests);
        merge!(next.default_timeout_ms, update.default_timeout_ms);
        merge!(next.enable_caching, update.enable_caching);
        merge!(next.cache_default_ttl_seconds, update.cache_default_ttl_seconds);
        merge!(next.rate_limit_per_minute, update.rate_limit_per_minute);
        merge!(next.enable_reputation_check, update.enable_reputation_check);
        merge!(next.allow_private_networks, update.allow_private_networks);
        merge!(next.enforcement_level, update.enforcement_level);
        merge!(next.require_https, update.require_https);
        merge!(next.allowed_domains, update.allowed_domains);
        merge!(next.blocked_domains, update.blocked_domains);
        merge!(next.blocked_ports, update.blocked_ports);

        if let Some(advanced) = &update.advanced {
            merge!(next.advanced.max_retries, advanced.max_retries);
            merge!(next.advanced.retry_delay_ms, advanced.retry_delay_ms);
            merge!(next.advanced.enable_compression, advanced.enable_compression);
            merge!(next.advanced.follow_redirects, advanced.follow_redirects);
            merge!(next.advanced.max_redirects, advanced.max_redirects);
            merge!(next.advanced.validate_certificates, advanced.validate_certificates);
            merge!(next.advanced.max_response_size_bytes, advanced.max_response_size_bytes);
            merge!(next.advanced.validate_status, advanced.validate_status);
        }

        next.validate()?;
        Ok(next)
    }

    /// Reject settings the pipeline cannot operate with
    pub fn validate(&self) -> Result<(), ProxyError> {
        if self.max_concurrent_requests == 0 {
            return Err(ProxyError::validation(
                "max_concurrent_requests",
                "must be at least 1",
            ));
        }
        if self.default_timeout_ms == 0 {
            return Err(ProxyError::validation("default_timeout_ms", "must be positive"));
        }
        if self.rate_limit_per_minute == 0 {
            return Err(ProxyError::validation("rate_limit_per_minute", "must be at least 1"));
        }
        if self.cache_default_ttl_seconds == 0 {
            return Err(ProxyError::validation(
                "cache_default_ttl_seconds",
                "must be positive",
            ));
        }
        if self.advanced.max_redirects > MAX_REDIRECTS_LIMIT {
            return Err(ProxyError::validation(
                "advanced.max_redirects",
                &format!("must not exceed {}", MAX_REDIRECTS_LIMIT),
            ));
        }
        if self.advanced.max_response_size_bytes == 0 {
            return Err(ProxyError::validation(
                "advanced.max_response_size_bytes",
                "must be positive",
            ));
        }
        if self.blocked_ports.contains(&0) {
            return Err(ProxyError::validation("blocked_ports", "port 0 is not a valid port"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = ProxySettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.enforcement_level, EnforcementLevel::Moderate);
        assert!(!settings.allow_private_networks);
    }

    #[test]
    fn test_partial_update_merges_only_given_fields() {
        let settings = ProxySettings::default();
        let update = SettingsUpdate {
            rate_limit_per_minute: Some(5),
            advanced: Some(AdvancedSettingsUpdate {
                max_retries: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };

        let next = settings.apply(&update).unwrap();
        assert_eq!(next.rate_limit_per_minute, 5);
        assert_eq!(next.advanced.max_retries, 0);
        assert_eq!(next.default_timeout_ms, settings.default_timeout_ms);
        assert_eq!(next.advanced.max_redirects, settings.advanced.max_redirects);
    }

    #[test]
    fn test_invalid_update_is_rejected() {
        let settings = ProxySettings::default();
        let update = SettingsUpdate {
            default_timeout_ms: Some(0),
            ..Default::default()
        };
        assert!(settings.apply(&update).is_err());

        let update = SettingsUpdate {
            advanced: Some(AdvancedSettingsUpdate {
                max_redirects: Some(50),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(settings.apply(&update).is_err());
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let settings: ProxySettings =
            serde_json::from_str(r#"{"enforcement_level":"strict","rate_limit_per_minute":2}"#)
                .unwrap();
        assert_eq!(settings.enforcement_level, EnforcementLevel::Strict);
        assert_eq!(settings.rate_limit_per_minute, 2);
        assert_eq!(settings.advanced.max_redirects, 5);
    }
}
