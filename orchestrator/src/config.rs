//! File configuration for the proxy
//!
//! Every section is optional in the TOML file; missing fields fall back to
//! their defaults. Runtime settings are validated on load.

use proxy_common::{ProxyError, ProxySettings};
use proxy_core::{CacheConfig, RateLimitConfig, ReputationConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::logging::LoggingConfig;

/// Built-in reputation sources and aggregator tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationSection {
    #[serde(flatten)]
    pub aggregator: ReputationConfig,
    /// Enable the lexical heuristics provider
    pub heuristics: bool,
    pub trusted_domains: Vec<String>,
    pub suspicious_domains: Vec<String>,
    pub blocked_domains: Vec<String>,
}

impl Default for ReputationSection {
    fn default() -> Self {
        Self {
            aggregator: ReputationConfig::default(),
            heuristics: true,
            trusted_domains: Vec::new(),
            suspicious_domains: Vec::new(),
            blocked_domains: Vec::new(),
        }
    }
}

/// Stale in-flight request monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// In-flight requests older than this are cancelled
    pub stale_request_ms: u64,
    pub check_interval_seconds: u64,
    /// Maintenance sweep for expired session overrides
    pub override_cleanup_interval_seconds: u64,
    /// Capacity of the notification channel
    pub event_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            stale_request_ms: 5 * 60 * 1000,
            check_interval_seconds: 30,
            override_cleanup_interval_seconds: 300,
            event_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub settings: ProxySettings,
    pub logging: LoggingConfig,
    pub cache: CacheConfig,
    pub reputation: ReputationSection,
    /// `requests_per_window` is taken from `settings.rate_limit_per_minute`
    pub rate_limit: RateLimitConfig,
    pub monitor: MonitorConfig,
}

impl ProxyConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ProxyError> {
        let config: ProxyConfig = toml::from_str(content)
            .map_err(|e| ProxyError::configuration("config", &e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProxyError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::configuration("config", &format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, ProxyError> {
        toml::to_string_pretty(self).map_err(|e| ProxyError::configuration("config", &e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ProxyError> {
        self.settings.validate()?;
        if self.cache.max_size_bytes == 0 {
            return Err(ProxyError::validation("cache.max_size_bytes", "must be positive"));
        }
        if self.rate_limit.window_ms == 0 {
            return Err(ProxyError::validation("rate_limit.window_ms", "must be positive"));
        }
        if self.monitor.event_capacity == 0 {
            return Err(ProxyError::validation("monitor.event_capacity", "must be positive"));
        }
        Ok(())
    }

    /// Rate limiter configuration aligned with the runtime settings
    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_window: self.settings.rate_limit_per_minute,
            ..self.rate_limit.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxy_common::EnforcementLevel;
    use std::io::Write;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = ProxyConfig::from_toml_str("").unwrap();
        assert_eq!(config.settings, ProxySettings::default());
        assert!(config.reputation.heuristics);
        assert_eq!(config.monitor.stale_request_ms, 300_000);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[settings]
rate_limit_per_minute = 10
enforcement_level = "strict"
blocked_domains = ["ads.example.com"]

[settings.advanced]
max_retries = 1

[logging]
level = "debug"

[reputation]
cache_ttl_seconds = 60
blocked_domains = ["malware.test"]

[monitor]
stale_request_ms = 1000
"#
        )
        .unwrap();

        let config = ProxyConfig::load(file.path()).unwrap();
        assert_eq!(config.settings.rate_limit_per_minute, 10);
        assert_eq!(config.settings.enforcement_level, EnforcementLevel::Strict);
        assert_eq!(config.settings.advanced.max_retries, 1);
        assert_eq!(config.settings.advanced.max_redirects, 5);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.reputation.aggregator.cache_ttl_seconds, 60);
        assert_eq!(config.reputation.blocked_domains, vec!["malware.test".to_string()]);
        assert_eq!(config.monitor.stale_request_ms, 1000);
        assert_eq!(config.rate_limit_config().requests_per_window, 10);
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let err = ProxyConfig::from_toml_str("[settings]\ndefault_timeout_ms = 0\n").unwrap_err();
        assert!(matches!(err, ProxyError::Validation { .. }));

        let err = ProxyConfig::from_toml_str("[settings\n").unwrap_err();
        assert!(matches!(err, ProxyError::Configuration { .. }));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ProxyConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ProxyError::Configuration { .. }));
    }

    #[test]
    fn test_toml_roundtrip_preserves_settings() {
        let mut config = ProxyConfig::default();
        config.settings.blocked_ports = vec![8081];
        let text = config.to_toml_string().unwrap();
        let parsed = ProxyConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.settings, config.settings);
    }
}
