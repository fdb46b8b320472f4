//! Response Cache
//!
//! Content-addressed store of prior responses keyed by a request fingerprint.
//! Size pressure is relieved by a scored eviction pass rather than plain LRU;
//! time expiry is handled separately by a periodic sweep.

use proxy_common::{normalize_domain, ProxyError, ProxyRequest, ProxyResponse};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::sweeper::SweepTask;

/// Request headers that change the representation and therefore the key
const KEY_HEADERS: &[&str] = &[
    "accept",
    "accept-encoding",
    "accept-language",
    "authorization",
    "cache-control",
    "content-type",
];

/// Usage falls to this fraction of the budget after an eviction pass
const EVICTION_TARGET_RATIO: f64 = 0.8;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Total size budget
    pub max_size_bytes: usize,
    /// Larger responses are never stored
    pub max_entry_size_bytes: usize,
    pub default_ttl_seconds: u64,
    pub cleanup_interval_seconds: u64,
    /// Store non-2xx responses too
    pub cache_error_responses: bool,
    /// Re-hash bodies on read
    pub verify_integrity: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 50 * 1024 * 1024,
            max_entry_size_bytes: 5 * 1024 * 1024,
            default_ttl_seconds: 300,
            cleanup_interval_seconds: 60,
            cache_error_responses: false,
            verify_integrity: true,
        }
    }
}

/// Per-entry storage options
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    /// Overrides the configured default TTL
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
}

impl CacheOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            tags: Vec::new(),
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    response: ProxyResponse,
    url: String,
    domain: String,
    created_at: Instant,
    last_accessed: Instant,
    access_count: u64,
    expires_at: Instant,
    size_bytes: usize,
    tags: Vec<String>,
    checksum: Option<String>,
}

impl CacheEntry {
    fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Higher means a better eviction candidate
    fn eviction_score(&self, now: Instant) -> f64 {
        let hours = |since: Instant| now.saturating_duration_since(since).as_secs_f64() / 3600.0;
        let age_hours = hours(self.created_at);
        let stale_hours = hours(self.last_accessed);
        let frequency = 1.0 / (self.access_count as f64 + 1.0);
        let size_kb = self.size_bytes as f64 / 1024.0;

        0.3 * age_hours + 0.4 * frequency + 0.1 * size_kb + 0.2 * stale_hours
    }
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub size_bytes: usize,
    pub max_size_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub rejected: u64,
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    total_size: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
    rejected: u64,
}

impl CacheState {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.total_size = self.total_size.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    fn remove_where<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&CacheEntry) -> bool,
    {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| predicate(entry))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            self.remove(key);
        }
        keys.len()
    }
}

/// Scored-eviction response cache
pub struct ResponseCache {
    state: Mutex<CacheState>,
    config: CacheConfig,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Deterministic fingerprint of a request
    pub fn cache_key(request: &ProxyRequest) -> String {
        let mut representation: Vec<(String, String)> = request
            .headers
            .iter()
            .map(|(name, value)| (name.trim().to_ascii_lowercase(), value))
            .filter(|(name, _)| KEY_HEADERS.contains(&name.as_str()))
            .map(|(name, value)| (name, value.trim().to_lowercase()))
            .collect();
        representation.sort();

        let mut hasher = Sha256::new();
        hasher.update(request.method.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(request.url.as_bytes());
        hasher.update(b"\n");
        for (name, value) in &representation {
            hasher.update(name.as_bytes());
            hasher.update(b":");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        hasher.update(b"\n");
        hasher.update(&request.body);
        format!("{:x}", hasher.finalize())
    }

    fn checksum(body: &[u8]) -> String {
        format!("{:x}", Sha256::digest(body))
    }

    /// Look up a stored response
    pub async fn get(&self, request: &ProxyRequest) -> Option<ProxyResponse> {
        self.get_at(request, Instant::now()).await
    }

    async fn get_at(&self, request: &ProxyRequest, now: Instant) -> Option<ProxyResponse> {
        if !request.method.is_cacheable() {
            return None;
        }
        let key = Self::cache_key(request);
        let mut state = self.state.lock().await;

        let outcome = match state.entries.get_mut(&key) {
            None => Lookup::Miss,
            Some(entry) if entry.is_expired_at(now) => Lookup::Expired,
            Some(entry) => {
                let intact = match (&entry.checksum, self.config.verify_integrity) {
                    (Some(expected), true) => *expected == Self::checksum(&entry.response.body),
                    _ => true,
                };
                if intact {
                    entry.access_count += 1;
                    entry.last_accessed = now;
                    let mut response = entry.response.clone();
                    response.from_cache = true;
                    response.id = request.id.clone();
                    Lookup::Hit(Box::new(response))
                } else {
                    Lookup::Corrupt
                }
            }
        };

        match outcome {
            Lookup::Hit(response) => {
                state.hits += 1;
                debug!("Cache hit for {} {}", request.method, request.url);
                Some(*response)
            }
            Lookup::Miss => {
                state.misses += 1;
                None
            }
            Lookup::Expired => {
                state.remove(&key);
                state.expirations += 1;
                state.misses += 1;
                None
            }
            Lookup::Corrupt => {
                warn!("Cache integrity check failed for {}, evicting", request.url);
                state.remove(&key);
                state.evictions += 1;
                state.misses += 1;
                None
            }
        }
    }

    /// Store a response with default options
    pub async fn set(&self, request: &ProxyRequest, response: &ProxyResponse) -> bool {
        self.set_with_options(request, response, CacheOptions::default())
            .await
    }

    /// Store a response; returns false when it is not cacheable
    pub async fn set_with_options(
        &self,
        request: &ProxyRequest,
        response: &ProxyResponse,
        options: CacheOptions,
    ) -> bool {
        self.set_at(request, response, options, Instant::now()).await
    }

    async fn set_at(
        &self,
        request: &ProxyRequest,
        response: &ProxyResponse,
        options: CacheOptions,
        now: Instant,
    ) -> bool {
        let ttl = match self.admit(request, response, &options) {
            Ok(ttl) => ttl,
            Err(reason) => {
                debug!("Not caching {} {}: {}", request.method, request.url, reason);
                self.state.lock().await.rejected += 1;
                return false;
            }
        };

        let size_bytes = Self::entry_size(response);
        let key = Self::cache_key(request);
        let checksum = self
            .config
            .verify_integrity
            .then(|| Self::checksum(&response.body));
        let domain = request.domain().unwrap_or_default();

        let mut state = self.state.lock().await;
        state.remove(&key);

        if state.total_size + size_bytes > self.config.max_size_bytes {
            self.evict(&mut state, size_bytes, now);
        }

        let mut stored = response.clone();
        stored.from_cache = false;
        state.entries.insert(
            key,
            CacheEntry {
                response: stored,
                url: request.url.clone(),
                domain,
                created_at: now,
                last_accessed: now,
                access_count: 0,
                expires_at: now + ttl,
                size_bytes,
                tags: options.tags,
                checksum,
            },
        );
        state.total_size += size_bytes;
        true
    }

    /// Cacheability rules; yields the effective TTL
    fn admit(
        &self,
        request: &ProxyRequest,
        response: &ProxyResponse,
        options: &CacheOptions,
    ) -> Result<Duration, &'static str> {
        if !request.method.is_cacheable() {
            return Err("method is not idempotent");
        }

        let directives = CacheDirectives::parse(response.header("cache-control"));
        let request_directives = CacheDirectives::parse(request.header("cache-control"));
        let pragma_no_cache = response
            .header("pragma")
            .map(|p| p.to_ascii_lowercase().contains("no-cache"))
            .unwrap_or(false);
        if directives.no_store || directives.no_cache || request_directives.no_store || pragma_no_cache {
            return Err("no-store/no-cache directive");
        }

        if !response.is_success() && !self.config.cache_error_responses {
            return Err("error status");
        }

        let size = Self::entry_size(response);
        if size > self.config.max_entry_size_bytes || size > self.config.max_size_bytes {
            return Err("response exceeds entry size ceiling");
        }

        let mut ttl = options
            .ttl
            .unwrap_or_else(|| Duration::from_secs(self.config.default_ttl_seconds));
        if let Some(max_age) = directives.max_age {
            ttl = ttl.min(max_age);
        }
        if ttl.is_zero() {
            return Err("zero ttl");
        }
        Ok(ttl)
    }

    fn entry_size(response: &ProxyResponse) -> usize {
        response.body.len()
            + response
                .headers
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
    }

    /// Evict highest-scoring entries until usage reaches the target and
    /// `incoming` bytes fit
    fn evict(&self, state: &mut CacheState, incoming: usize, now: Instant) {
        let budget = self.config.max_size_bytes;
        let target = ((budget as f64 * EVICTION_TARGET_RATIO) as usize).min(budget.saturating_sub(incoming));

        let mut ranked: Vec<(String, f64)> = state
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.eviction_score(now)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut evicted = 0;
        for (key, score) in ranked {
            if state.total_size <= target {
                break;
            }
            if state.remove(&key).is_some() {
                debug!("Evicted cache entry (score {:.3})", score);
                evicted += 1;
            }
        }
        state.evictions += evicted;
        if evicted > 0 {
            debug!(
                "Cache eviction freed {} entries, usage now {} / {} bytes",
                evicted, state.total_size, budget
            );
        }
    }

    /// Drop every entry for `domain` and its subdomains
    pub async fn invalidate_domain(&self, domain: &str) -> usize {
        let domain = normalize_domain(domain);
        let suffix = format!(".{}", domain);
        let mut state = self.state.lock().await;
        state.remove_where(|entry| entry.domain == domain || entry.domain.ends_with(&suffix))
    }

    pub async fn invalidate_tag(&self, tag: &str) -> usize {
        let mut state = self.state.lock().await;
        state.remove_where(|entry| entry.tags.iter().any(|t| t == tag))
    }

    /// Drop every entry whose URL matches the regex
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<usize, ProxyError> {
        let regex = Regex::new(pattern)
            .map_err(|e| ProxyError::validation("pattern", &e.to_string()))?;
        let mut state = self.state.lock().await;
        Ok(state.remove_where(|entry| regex.is_match(&entry.url)))
    }

    pub async fn clear(&self) -> usize {
        let mut state = self.state.lock().await;
        let count = state.entries.len();
        state.entries.clear();
        state.total_size = 0;
        count
    }

    /// Remove time-expired entries only
    pub async fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Instant::now()).await
    }

    async fn cleanup_expired_at(&self, now: Instant) -> usize {
        let mut state = self.state.lock().await;
        let removed = state.remove_where(|entry| entry.is_expired_at(now));
        state.expirations += removed as u64;
        removed
    }

    pub fn start_cleanup(self: &Arc<Self>) -> SweepTask {
        let cache = Arc::downgrade(self);
        SweepTask::spawn(
            "response-cache",
            Duration::from_secs(self.config.cleanup_interval_seconds.max(1)),
            move || {
                let cache = cache.clone();
                async move {
                    if let Some(cache) = cache.upgrade() {
                        let removed = cache.cleanup_expired().await;
                        if removed > 0 {
                            debug!("Purged {} expired cache entries", removed);
                        }
                    }
                }
            },
        )
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        let lookups = state.hits + state.misses;
        CacheStats {
            entries: state.entries.len(),
            size_bytes: state.total_size,
            max_size_bytes: self.config.max_size_bytes,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            expirations: state.expirations,
            rejected: state.rejected,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
        }
    }
}

enum Lookup {
    Hit(Box<ProxyResponse>),
    Miss,
    Expired,
    Corrupt,
}

#[derive(Debug, Default)]
struct CacheDirectives {
    no_store: bool,
    no_cache: bool,
    max_age: Option<Duration>,
}

impl CacheDirectives {
    fn parse(header: Option<&str>) -> Self {
        let mut directives = Self::default();
        let Some(header) = header else {
            return directives;
        };
        for directive in header.split(',') {
            let directive = directive.trim().to_ascii_lowercase();
            match directive.as_str() {
                "no-store" => directives.no_store = true,
                "no-cache" => directives.no_cache = true,
                other => {
                    if let Some(secs) = other
                        .strip_prefix("max-age=")
                        .and_then(|v| v.trim_matches('"').parse::<u64>().ok())
                    {
                        directives.max_age = Some(Duration::from_secs(secs));
                    }
                }
            }
        }
        directives
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxy_common::HttpMethod;

    fn request(url: &str) -> ProxyRequest {
        ProxyRequest::get("artifact-1", url)
    }

    fn response(body_len: usize) -> ProxyResponse {
        ProxyResponse {
            id: "r".to_string(),
            status: 200,
            status_text: "OK".to_string(),
            headers: HashMap::new(),
            body: vec![b'x'; body_len],
            from_cache: false,
            response_time_ms: 12,
            final_url: "https://example.com/".to_string(),
            redirect_count: 0,
        }
    }

    fn small_cache(max_size_bytes: usize) -> ResponseCache {
        ResponseCache::new(CacheConfig {
            max_size_bytes,
            max_entry_size_bytes: max_size_bytes,
            default_ttl_seconds: 86_400,
            ..Default::default()
        })
    }

    #[test]
    fn test_key_ignores_irrelevant_headers() {
        let base = request("https://api.example.com/items").with_header("Accept", "application/JSON");
        let noisy = base
            .clone()
            .with_header("X-Request-Id", "123")
            .with_header("User-Agent", "other");
        assert_eq!(ResponseCache::cache_key(&base), ResponseCache::cache_key(&noisy));

        let lowered = request("https://api.example.com/items").with_header("accept", "application/json");
        assert_eq!(ResponseCache::cache_key(&base), ResponseCache::cache_key(&lowered));

        let different = request("https://api.example.com/items").with_header("Accept", "text/html");
        assert_ne!(ResponseCache::cache_key(&base), ResponseCache::cache_key(&different));

        let other_url = request("https://api.example.com/other");
        assert_ne!(ResponseCache::cache_key(&base), ResponseCache::cache_key(&other_url));
    }

    #[tokio::test]
    async fn test_repeated_reads_are_identical() {
        let cache = ResponseCache::new(CacheConfig::default());
        let req = request("https://example.com/data");
        assert!(cache.set(&req, &response(64)).await);

        let first = cache.get(&req).await.unwrap();
        let second = cache.get(&req).await.unwrap();
        assert!(first.from_cache);
        assert_eq!(first.body, second.body);
        assert_eq!(first.status, second.status);
        assert_eq!(first.headers, second.headers);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_uncacheable_responses_are_rejected() {
        let cache = ResponseCache::new(CacheConfig {
            max_entry_size_bytes: 100,
            ..Default::default()
        });

        let post = ProxyRequest::new("a", HttpMethod::Post, "https://example.com/");
        assert!(!cache.set(&post, &response(10)).await);

        let req = request("https://example.com/");
        let mut no_store = response(10);
        no_store.headers.insert("cache-control".to_string(), "private, no-store".to_string());
        assert!(!cache.set(&req, &no_store).await);

        let mut error = response(10);
        error.status = 500;
        assert!(!cache.set(&req, &error).await);

        assert!(!cache.set(&req, &response(500)).await);
        assert!(cache.get(&req).await.is_none());
        assert_eq!(cache.stats().await.rejected, 4);
    }

    #[tokio::test]
    async fn test_error_responses_cached_when_configured() {
        let cache = ResponseCache::new(CacheConfig {
            cache_error_responses: true,
            ..Default::default()
        });
        let req = request("https://example.com/missing");
        let mut not_found = response(10);
        not_found.status = 404;
        assert!(cache.set(&req, &not_found).await);
        assert_eq!(cache.get(&req).await.unwrap().status, 404);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = ResponseCache::new(CacheConfig::default());
        let req = request("https://example.com/ttl");
        let now = Instant::now();
        assert!(
            cache
                .set_at(&req, &response(8), CacheOptions::with_ttl(Duration::from_secs(10)), now)
                .await
        );
        assert!(cache.get_at(&req, now + Duration::from_secs(5)).await.is_some());
        assert!(cache.get_at(&req, now + Duration::from_secs(11)).await.is_none());
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_max_age_caps_ttl() {
        let cache = ResponseCache::new(CacheConfig::default());
        let req = request("https://example.com/short");
        let mut resp = response(8);
        resp.headers.insert("cache-control".to_string(), "public, max-age=5".to_string());
        let now = Instant::now();
        assert!(cache.set_at(&req, &resp, CacheOptions::default(), now).await);
        assert!(cache.get_at(&req, now + Duration::from_secs(6)).await.is_none());
    }

    #[tokio::test]
    async fn test_eviction_prefers_highest_score_not_oldest() {
        let cache = small_cache(10_000);
        let t0 = Instant::now();
        let hour = Duration::from_secs(3600);
        let (a, b, c, d) = (
            request("https://example.com/a"),
            request("https://example.com/b"),
            request("https://example.com/c"),
            request("https://example.com/d"),
        );

        assert!(cache.set_at(&a, &response(3000), CacheOptions::default(), t0).await);
        assert!(cache.set_at(&b, &response(3000), CacheOptions::default(), t0 + hour).await);
        assert!(cache.set_at(&c, &response(3000), CacheOptions::default(), t0 + hour * 2).await);

        // A is the oldest but hot; B is never read
        for _ in 0..5 {
            assert!(cache.get_at(&a, t0 + hour * 2).await.is_some());
            assert!(cache.get_at(&c, t0 + hour * 2).await.is_some());
        }

        assert!(cache.set_at(&d, &response(3000), CacheOptions::default(), t0 + hour * 3).await);

        let now = t0 + hour * 3;
        assert!(cache.get_at(&b, now).await.is_none());
        assert!(cache.get_at(&a, now).await.is_some());
        assert!(cache.get_at(&c, now).await.is_some());
        assert!(cache.get_at(&d, now).await.is_some());

        let stats = cache.stats().await;
        assert_eq!(stats.evictions, 1);
        assert!(stats.size_bytes <= 10_000);
    }

    #[tokio::test]
    async fn test_integrity_mismatch_is_a_miss() {
        let cache = ResponseCache::new(CacheConfig::default());
        let req = request("https://example.com/tamper");
        assert!(cache.set(&req, &response(16)).await);

        {
            let mut state = cache.state.lock().await;
            let entry = state.entries.values_mut().next().unwrap();
            entry.response.body[0] = b'y';
        }

        assert!(cache.get(&req).await.is_none());
        let stats = cache.stats().await;
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.size_bytes, 0);
    }

    #[tokio::test]
    async fn test_invalidation() {
        let cache = ResponseCache::new(CacheConfig::default());
        let tagged = CacheOptions::default().tag("feed");
        cache
            .set_with_options(&request("https://example.com/feed"), &response(4), tagged)
            .await;
        cache.set(&request("https://api.example.com/v1/users"), &response(4)).await;
        cache.set(&request("https://other.org/v1/users"), &response(4)).await;
        cache.set(&request("https://other.org/static/app.js"), &response(4)).await;

        assert_eq!(cache.invalidate_tag("feed").await, 1);
        assert_eq!(cache.invalidate_domain("EXAMPLE.com").await, 1);
        assert_eq!(cache.invalidate_pattern(r"\.js$").await.unwrap(), 1);
        assert!(cache.invalidate_pattern("(").await.is_err());
        assert_eq!(cache.clear().await, 1);
        assert_eq!(cache.stats().await.size_bytes, 0);
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_expired() {
        let cache = ResponseCache::new(CacheConfig::default());
        let now = Instant::now();
        cache
            .set_at(
                &request("https://example.com/short"),
                &response(4),
                CacheOptions::with_ttl(Duration::from_secs(1)),
                now,
            )
            .await;
        cache
            .set_at(&request("https://example.com/long"), &response(4), CacheOptions::default(), now)
            .await;

        assert_eq!(cache.cleanup_expired_at(now + Duration::from_secs(2)).await, 1);
        assert_eq!(cache.stats().await.entries, 1);
    }
}
