//! Request/response data model shared by every artifact proxy component
//!
//! An artifact is an untrusted, sandboxed unit of rendered code. Everything it
//! asks the network to do arrives as a [`ProxyRequest`] and leaves as a
//! [`ProxyResponse`] (or a [`crate::ProxyError`]).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ProxyError;

/// HTTP methods an artifact may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Only idempotent reads are eligible for the response cache
    pub fn is_cacheable(&self) -> bool {
        matches!(self, HttpMethod::Get)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(ProxyError::validation(
                "method",
                &format!("unsupported HTTP method '{}'", other),
            )),
        }
    }
}

/// One outbound call requested by an artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyRequest {
    /// Unique per in-flight request
    pub id: String,

    /// Artifact that issued the request
    pub artifact_id: String,

    pub url: String,

    pub method: HttpMethod,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default)]
    pub body: Vec<u8>,

    /// Per-attempt timeout; falls back to the configured default when absent
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Skip cache lookup and cache store for this request
    #[serde(default)]
    pub bypass_cache: bool,

    /// The host already approved soft (overridable) policy violations
    #[serde(default)]
    pub pre_approved: bool,
}

impl ProxyRequest {
    /// Create a new request with a generated id
    pub fn new(artifact_id: impl Into<String>, method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            artifact_id: artifact_id.into(),
            url: url.into(),
            method,
            headers: HashMap::new(),
            body: Vec::new(),
            timeout_ms: None,
            bypass_cache: false,
            pre_approved: false,
        }
    }

    pub fn get(artifact_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(artifact_id, HttpMethod::Get, url)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn approved(mut self) -> Self {
        self.pre_approved = true;
        self
    }

    /// Parse the request URL, failing with a validation error
    pub fn parsed_url(&self) -> Result<url::Url, ProxyError> {
        url::Url::parse(&self.url)
            .map_err(|e| ProxyError::validation("url", &format!("'{}' is not a valid URL: {}", self.url, e)))
    }

    /// Normalized (lower-cased, trimmed) host of the request URL
    pub fn domain(&self) -> Result<String, ProxyError> {
        let url = self.parsed_url()?;
        url.host_str()
            .map(normalize_domain)
            .ok_or_else(|| ProxyError::validation("url", &format!("'{}' has no host", self.url)))
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Result of executing a [`ProxyRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyResponse {
    /// Equals the originating request id
    pub id: String,
    pub status: u16,
    pub status_text: String,
    /// Single-valued, lower-cased header map
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub from_cache: bool,
    pub response_time_ms: u64,
    pub final_url: String,
    pub redirect_count: u32,
}

impl ProxyResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|v| v.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Pipeline state of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    RateLimitCheck,
    Validating,
    CacheHit,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Failed | RequestStatus::Cancelled
        )
    }
}

/// Lower-case and trim a domain; strips brackets around IPv6 literals and a trailing dot
pub fn normalize_domain(domain: &str) -> String {
    let trimmed = domain.trim().trim_end_matches('.');
    let unbracketed = trimmed
        .strip_prefix('[')
        .and_then(|d| d.strip_suffix(']'))
        .unwrap_or(trimmed);
    unbracketed.to_ascii_lowercase()
}
