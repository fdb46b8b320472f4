//! HTTP Execution Engine
//!
//! Performs one outbound request: header preparation, redirect following,
//! bounded body streaming, per-attempt timeout and cooperative cancellation.
//! It knows nothing about policy; callers decide whether a request may run
//! and, through [`RedirectGuard`], whether each redirect hop may be followed.

use async_trait::async_trait;
use dashmap::DashMap;
use proxy_common::{AdvancedSettings, HttpMethod, ProxyError, ProxyRequest, ProxyResponse, ProxySettings};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LOCATION, USER_AGENT};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_USER_AGENT: &str = concat!("artifact-proxy/", env!("CARGO_PKG_VERSION"));

/// Request headers the engine owns or that must never be forwarded
const FORBIDDEN_REQUEST_HEADERS: &[&str] = &[
    "host",
    "connection",
    "content-length",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
    "keep-alive",
    "expect",
];

type HopCheck = dyn Fn(&Url) -> Result<(), ProxyError> + Send + Sync;

/// Check run on every redirect target before it is requested
#[derive(Clone)]
pub struct RedirectGuard(Arc<HopCheck>);

impl RedirectGuard {
    pub fn new<F>(check: F) -> Self
    where
        F: Fn(&Url) -> Result<(), ProxyError> + Send + Sync + 'static,
    {
        Self(Arc::new(check))
    }

    pub fn check(&self, target: &Url) -> Result<(), ProxyError> {
        (self.0)(target)
    }
}

impl fmt::Debug for RedirectGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RedirectGuard")
    }
}

/// Per-attempt execution options
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub timeout: Duration,
    pub follow_redirects: bool,
    pub max_redirects: u32,
    pub max_response_size: usize,
    /// Fail on non-2xx final status
    pub validate_status: bool,
    /// Rejecting a hop fails the attempt with the guard's error
    pub redirect_guard: Option<RedirectGuard>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self::from_settings(&ProxySettings::default(), None)
    }
}

impl ExecuteOptions {
    /// Options for one request; the request timeout wins over the default
    pub fn from_settings(settings: &ProxySettings, timeout_ms: Option<u64>) -> Self {
        Self {
            timeout: Duration::from_millis(timeout_ms.unwrap_or(settings.default_timeout_ms)),
            follow_redirects: settings.advanced.follow_redirects,
            max_redirects: settings.advanced.max_redirects,
            max_response_size: settings.advanced.max_response_size_bytes,
            validate_status: settings.advanced.validate_status,
            redirect_guard: None,
        }
    }

    pub fn with_redirect_guard(mut self, guard: RedirectGuard) -> Self {
        self.redirect_guard = Some(guard);
        self
    }
}

/// Executes one request attempt
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(
        &self,
        request: &ProxyRequest,
        options: &ExecuteOptions,
    ) -> Result<ProxyResponse, ProxyError>;

    /// Abort an in-flight request; false when nothing was running under `request_id`
    fn cancel(&self, request_id: &str) -> bool;

    /// Apply transport-level settings (compression, certificate validation)
    fn reconfigure(&self, _settings: &AdvancedSettings) -> Result<(), ProxyError> {
        Ok(())
    }
}

/// Removes the cancellation token when the attempt finishes
struct TokenGuard<'a> {
    tokens: &'a DashMap<String, CancellationToken>,
    request_id: &'a str,
}

impl Drop for TokenGuard<'_> {
    fn drop(&mut self) {
        self.tokens.remove(self.request_id);
    }
}

/// reqwest-backed execution engine
pub struct HttpExecutor {
    client: RwLock<reqwest::Client>,
    in_flight: DashMap<String, CancellationToken>,
}

impl HttpExecutor {
    pub fn new(settings: &AdvancedSettings) -> Result<Self, ProxyError> {
        Ok(Self {
            client: RwLock::new(Self::build_client(settings)?),
            in_flight: DashMap::new(),
        })
    }

    fn build_client(settings: &AdvancedSettings) -> Result<reqwest::Client, ProxyError> {
        // Redirects are followed manually so every hop is counted and re-validated
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(!settings.validate_certificates)
            .gzip(settings.enable_compression)
            .deflate(settings.enable_compression)
            .brotli(settings.enable_compression)
            .build()
            .map_err(|e| ProxyError::configuration("http_client", &e.to_string()))
    }

    fn client(&self) -> reqwest::Client {
        self.client.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Parse and check a target URL independently of the policy evaluator
    pub fn validate_target(url: &str) -> Result<Url, ProxyError> {
        let parsed = Url::parse(url)
            .map_err(|e| ProxyError::validation("url", &format!("'{}' is not a valid URL: {}", url, e)))?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ProxyError::validation(
                    "url",
                    &format!("scheme '{}' is not allowed", other),
                ))
            }
        }
        if parsed.host_str().map(str::is_empty).unwrap_or(true) {
            return Err(ProxyError::validation("url", "missing host"));
        }
        Ok(parsed)
    }

    /// Build outbound headers, dropping hop-by-hop and proxy headers
    pub fn prepare_headers(headers: &HashMap<String, String>) -> Result<HeaderMap, ProxyError> {
        let mut prepared = HeaderMap::new();
        for (name, value) in headers {
            let lower = name.trim().to_ascii_lowercase();
            if FORBIDDEN_REQUEST_HEADERS.contains(&lower.as_str()) || lower.starts_with("proxy-") {
                debug!("Dropping forbidden request header '{}'", lower);
                continue;
            }
            let header_name = HeaderName::from_bytes(lower.as_bytes())
                .map_err(|_| ProxyError::validation("headers", &format!("invalid header name '{}'", name)))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| ProxyError::validation("headers", &format!("invalid value for header '{}'", lower)))?;
            prepared.insert(header_name, header_value);
        }
        if !prepared.contains_key(USER_AGENT) {
            prepared.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        }
        Ok(prepared)
    }

    /// Collapse a header map to single-valued, lower-cased entries
    fn normalize_response_headers(headers: &HeaderMap) -> HashMap<String, String> {
        let mut normalized: HashMap<String, String> = HashMap::new();
        for (name, value) in headers {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            normalized
                .entry(name.as_str().to_ascii_lowercase())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }
        normalized
    }

    fn method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }

    fn is_redirect(status: u16) -> bool {
        matches!(status, 301 | 302 | 303 | 307 | 308)
    }

    /// Map a transport error onto the retry taxonomy
    fn classify(error: reqwest::Error, options: &ExecuteOptions) -> ProxyError {
        if error.is_timeout() {
            ProxyError::timeout("http_request", options.timeout.as_millis() as u64)
        } else if error.is_builder() {
            ProxyError::validation("request", &error.to_string())
        } else if error.is_redirect() {
            ProxyError::network_fatal(error.to_string())
        } else {
            // connect, reset, DNS and body read failures are transient
            ProxyError::network(error.to_string())
        }
    }

    async fn perform(
        &self,
        request: &ProxyRequest,
        options: &ExecuteOptions,
    ) -> Result<ProxyResponse, ProxyError> {
        let started = Instant::now();
        let mut url = Self::validate_target(&request.url)?;
        let method = Self::method(request.method);
        let headers = Self::prepare_headers(&request.headers)?;
        let client = self.client();
        let mut redirect_count: u32 = 0;

        loop {
            let mut builder = client
                .request(method.clone(), url.clone())
                .headers(headers.clone());
            if !request.body.is_empty() {
                builder = builder.body(request.body.clone());
            }

            let mut response = builder
                .send()
                .await
                .map_err(|e| Self::classify(e, options))?;
            let status = response.status();

            if options.follow_redirects && Self::is_redirect(status.as_u16()) {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                match location {
                    Some(location) => {
                        if redirect_count >= options.max_redirects {
                            warn!(
                                "Request {} exceeded {} redirects at {}",
                                request.id, options.max_redirects, url
                            );
                            return Err(ProxyError::TooManyRedirects {
                                max_redirects: options.max_redirects,
                            });
                        }
                        let next = url.join(&location).map_err(|e| {
                            ProxyError::network_fatal(format!("invalid redirect location '{}': {}", location, e))
                        })?;
                        let next = Self::validate_target(next.as_str())?;
                        if let Some(guard) = &options.redirect_guard {
                            if let Err(e) = guard.check(&next) {
                                warn!("Request {} redirect to {} refused: {}", request.id, next, e);
                                return Err(e);
                            }
                        }
                        redirect_count += 1;
                        debug!("Request {} redirect {} -> {}", request.id, status.as_u16(), next);
                        url = next;
                        continue;
                    }
                    None => {
                        warn!("Redirect status {} for {} without Location header", status, url);
                    }
                }
            }

            if let Some(length) = response.content_length() {
                if length as usize > options.max_response_size {
                    return Err(ProxyError::ResponseTooLarge {
                        limit_bytes: options.max_response_size,
                    });
                }
            }

            let response_headers = Self::normalize_response_headers(response.headers());
            let mut body = Vec::new();
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| Self::classify(e, options))?
            {
                if body.len() + chunk.len() > options.max_response_size {
                    return Err(ProxyError::ResponseTooLarge {
                        limit_bytes: options.max_response_size,
                    });
                }
                body.extend_from_slice(&chunk);
            }

            if options.validate_status && !status.is_success() {
                return Err(ProxyError::UpstreamStatus {
                    status: status.as_u16(),
                });
            }

            return Ok(ProxyResponse {
                id: request.id.clone(),
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
                headers: response_headers,
                body,
                from_cache: false,
                response_time_ms: started.elapsed().as_millis() as u64,
                final_url: url.to_string(),
                redirect_count,
            });
        }
    }
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    async fn execute(
        &self,
        request: &ProxyRequest,
        options: &ExecuteOptions,
    ) -> Result<ProxyResponse, ProxyError> {
        let token = CancellationToken::new();
        self.in_flight.insert(request.id.clone(), token.clone());
        let _guard = TokenGuard {
            tokens: &self.in_flight,
            request_id: &request.id,
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Request {} aborted", request.id);
                Err(ProxyError::Aborted { request_id: request.id.clone() })
            }
            outcome = tokio::time::timeout(options.timeout, self.perform(request, options)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(ProxyError::timeout("http_request", options.timeout.as_millis() as u64)),
                }
            }
        }
    }

    fn cancel(&self, request_id: &str) -> bool {
        match self.in_flight.get(request_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn reconfigure(&self, settings: &AdvancedSettings) -> Result<(), ProxyError> {
        let client = Self::build_client(settings)?;
        *self.client.write().unwrap_or_else(|e| e.into_inner()) = client;
        debug!("HTTP client rebuilt");
        Ok(())
    }
}
