//! Error taxonomy for the artifact network proxy

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for proxy operations
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProxyError {
    /// Connection, DNS or stream failure. `retryable` is set by whoever
    /// classified the underlying cause.
    #[error("Network error: {details}")]
    Network { details: String, retryable: bool },

    #[error("Upstream returned HTTP {status}")]
    UpstreamStatus { status: u16 },

    #[error("Too many redirects: exceeded limit of {max_redirects}")]
    TooManyRedirects { max_redirects: u32 },

    #[error("Response too large: more than {limit_bytes} bytes")]
    ResponseTooLarge { limit_bytes: usize },

    #[error("Request aborted")]
    Aborted { request_id: String },

    #[error("Security violation: {violation_type} - {details}")]
    SecurityViolation {
        violation_type: String,
        details: String,
        requires_approval: bool,
        violations: Vec<serde_json::Value>,
    },

    #[error("Domain blocked by reputation check: {domain}")]
    ReputationBlocked { domain: String, confidence: u8 },

    #[error("Rate limit exceeded for {key}: retry after {retry_after_secs}s")]
    RateLimitExceeded { key: String, retry_after_secs: u64 },

    #[error("Too many concurrent requests: limit is {limit}")]
    ConcurrencyLimit { limit: usize },

    #[error("Timeout occurred: {operation} after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    #[error("Input validation failed: {field} - {reason}")]
    Validation { field: String, reason: String },

    #[error("Configuration error: {component} - {reason}")]
    Configuration { component: String, reason: String },
}

/// Error kinds surfaced at the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Security,
    RateLimit,
    Timeout,
    Validation,
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ProxyError {
    /// Create a validation error with field and reason
    pub fn validation(field: &str, reason: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a transient (retryable) network error
    pub fn network(details: impl Into<String>) -> Self {
        Self::Network {
            details: details.into(),
            retryable: true,
        }
    }

    /// Create a network error that must not be retried
    pub fn network_fatal(details: impl Into<String>) -> Self {
        Self::Network {
            details: details.into(),
            retryable: false,
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: &str, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.to_string(),
            duration_ms,
        }
    }

    /// Create a configuration error
    pub fn configuration(component: &str, reason: &str) -> Self {
        Self::Configuration {
            component: component.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ProxyError::Network { .. }
            | ProxyError::UpstreamStatus { .. }
            | ProxyError::TooManyRedirects { .. }
            | ProxyError::ResponseTooLarge { .. }
            | ProxyError::Aborted { .. } => ErrorKind::Network,
            ProxyError::SecurityViolation { .. } | ProxyError::ReputationBlocked { .. } => {
                ErrorKind::Security
            }
            ProxyError::RateLimitExceeded { .. } | ProxyError::ConcurrencyLimit { .. } => {
                ErrorKind::RateLimit
            }
            ProxyError::Timeout { .. } => ErrorKind::Timeout,
            ProxyError::Validation { .. } | ProxyError::Configuration { .. } => {
                ErrorKind::Validation
            }
        }
    }

    /// Whether the orchestrator may retry the attempt internally.
    ///
    /// Rate-limit errors report `false` here even though the caller may try
    /// again later; see [`ProxyError::is_retryable_by_caller`].
    pub fn is_retryable(&self) -> bool {
        match self {
            ProxyError::Network { retryable, .. } => *retryable,
            ProxyError::UpstreamStatus { status } => *status >= 500,
            ProxyError::Timeout { .. } => true,

            ProxyError::TooManyRedirects { .. } => false,
            ProxyError::ResponseTooLarge { .. } => false,
            ProxyError::Aborted { .. } => false,
            ProxyError::SecurityViolation { .. } => false,
            ProxyError::ReputationBlocked { .. } => false,
            ProxyError::RateLimitExceeded { .. } => false,
            ProxyError::ConcurrencyLimit { .. } => false,
            ProxyError::Validation { .. } => false,
            ProxyError::Configuration { .. } => false,
        }
    }

    /// Whether the caller can expect a later identical request to succeed
    pub fn is_retryable_by_caller(&self) -> bool {
        match self {
            ProxyError::RateLimitExceeded { .. } | ProxyError::ConcurrencyLimit { .. } => true,
            other => other.is_retryable(),
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ProxyError::SecurityViolation { .. } => ErrorSeverity::Critical,
            ProxyError::ReputationBlocked { .. } => ErrorSeverity::Critical,
            ProxyError::Configuration { .. } => ErrorSeverity::High,
            ProxyError::ResponseTooLarge { .. } => ErrorSeverity::Medium,
            ProxyError::TooManyRedirects { .. } => ErrorSeverity::Medium,
            ProxyError::Network { .. } => ErrorSeverity::Medium,
            ProxyError::Timeout { .. } => ErrorSeverity::Medium,
            ProxyError::RateLimitExceeded { .. } => ErrorSeverity::Medium,
            ProxyError::ConcurrencyLimit { .. } => ErrorSeverity::Low,
            ProxyError::UpstreamStatus { .. } => ErrorSeverity::Low,
            ProxyError::Aborted { .. } => ErrorSeverity::Low,
            ProxyError::Validation { .. } => ErrorSeverity::Low,
        }
    }

    /// User-facing remedy, where one exists
    pub fn suggested_fix(&self) -> Option<String> {
        match self {
            ProxyError::Network { .. } => Some(
                "Check network connectivity and that the target host is reachable.".to_string(),
            ),
            ProxyError::UpstreamStatus { status } if *status >= 500 => {
                Some("The remote server failed; try again later.".to_string())
            }
            ProxyError::UpstreamStatus { .. } => None,
            ProxyError::TooManyRedirects { max_redirects } => Some(format!(
                "The target redirected more than {} times; request the final URL directly.",
                max_redirects
            )),
            ProxyError::ResponseTooLarge { limit_bytes } => Some(format!(
                "Request a smaller resource or raise the response size limit above {} bytes.",
                limit_bytes
            )),
            ProxyError::Aborted { .. } => None,
            ProxyError::SecurityViolation {
                requires_approval, ..
            } => {
                if *requires_approval {
                    Some("Request a session override for this domain to proceed.".to_string())
                } else {
                    Some("This destination is not permitted by the network security policy.".to_string())
                }
            }
            ProxyError::ReputationBlocked { domain, .. } => Some(format!(
                "'{}' is flagged as malicious; use a different source.",
                domain
            )),
            ProxyError::RateLimitExceeded {
                retry_after_secs, ..
            } => Some(format!(
                "Retry after {} seconds or reduce the request rate.",
                retry_after_secs
            )),
            ProxyError::ConcurrencyLimit { .. } => {
                Some("Wait for in-flight requests to finish before issuing more.".to_string())
            }
            ProxyError::Timeout { duration_ms, .. } => Some(format!(
                "The request took longer than {}ms; raise the timeout or check target responsiveness.",
                duration_ms
            )),
            ProxyError::Validation { field, .. } => {
                Some(format!("Correct the '{}' field and try again.", field))
            }
            ProxyError::Configuration { component, .. } => {
                Some(format!("Fix the '{}' settings.", component))
            }
        }
    }

    /// Structured details for diagnostics
    pub fn details(&self) -> serde_json::Value {
        match self {
            ProxyError::Network { details, retryable } => {
                serde_json::json!({ "details": details, "transient": retryable })
            }
            ProxyError::UpstreamStatus { status } => serde_json::json!({ "status": status }),
            ProxyError::TooManyRedirects { max_redirects } => {
                serde_json::json!({ "max_redirects": max_redirects })
            }
            ProxyError::ResponseTooLarge { limit_bytes } => {
                serde_json::json!({ "limit_bytes": limit_bytes })
            }
            ProxyError::Aborted { request_id } => serde_json::json!({ "request_id": request_id }),
            ProxyError::SecurityViolation {
                violation_type,
                requires_approval,
                violations,
                ..
            } => serde_json::json!({
                "violation_type": violation_type,
                "requires_approval": requires_approval,
                "violations": violations,
            }),
            ProxyError::ReputationBlocked { domain, confidence } => {
                serde_json::json!({ "domain": domain, "confidence": confidence })
            }
            ProxyError::RateLimitExceeded {
                key,
                retry_after_secs,
            } => serde_json::json!({ "key": key, "retry_after": retry_after_secs }),
            ProxyError::ConcurrencyLimit { limit } => serde_json::json!({ "limit": limit }),
            ProxyError::Timeout {
                operation,
                duration_ms,
            } => serde_json::json!({ "operation": operation, "duration_ms": duration_ms }),
            ProxyError::Validation { field, reason } => {
                serde_json::json!({ "field": field, "reason": reason })
            }
            ProxyError::Configuration { component, reason } => {
                serde_json::json!({ "component": component, "reason": reason })
            }
        }
    }

    /// Boundary representation returned to the host
    pub fn to_info(&self) -> ErrorInfo {
        ErrorInfo {
            kind: self.kind(),
            message: self.to_string(),
            retryable: self.is_retryable_by_caller(),
            suggested_fix: self.suggested_fix(),
            details: self.details(),
        }
    }
}

impl From<url::ParseError> for ProxyError {
    fn from(error: url::ParseError) -> Self {
        ProxyError::validation("url", &error.to_string())
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(error: serde_json::Error) -> Self {
        ProxyError::validation("payload", &error.to_string())
    }
}

/// Serializable error shape handed to the host application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    pub suggested_fix: Option<String>,
    pub details: serde_json::Value,
}

/// Result type for proxy operations
pub type ProxyResult<T> = Result<T, ProxyError>;
