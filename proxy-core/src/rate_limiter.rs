//! Fixed-window rate limiting keyed by (artifact, domain)

use dashmap::DashMap;
use proxy_common::{ProxyError, ProxyRequest};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::sweeper::SweepTask;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_window: u32,
    pub window_ms: u64,
    /// Windows untouched for longer than this are dropped by the sweep
    pub stale_after_ms: u64,
    pub cleanup_interval_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 60,
            window_ms: 60_000,
            stale_after_ms: 300_000,
            cleanup_interval_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub count: u32,
    pub window_start: u64,
    pub last_access: u64,
}

/// Outcome of one rate-limit check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub remaining: u32,
    pub limit: u32,
    /// Epoch millis when the current window ends
    pub reset_time: u64,
    /// Seconds until a retry can succeed; set only when denied
    pub retry_after_secs: Option<u64>,
    /// Requests counted in the current window
    pub count: u32,
}

impl RateLimitStatus {
    pub fn to_error(&self, key: &str) -> Option<ProxyError> {
        if self.allowed {
            return None;
        }
        Some(ProxyError::RateLimitExceeded {
            key: key.to_string(),
            retry_after_secs: self.retry_after_secs.unwrap_or(1),
        })
    }
}

pub struct RateLimiter {
    windows: DashMap<String, RateWindow>,
    limit: AtomicU32,
    config: RateLimitConfig,
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: DashMap::new(),
            limit: AtomicU32::new(config.requests_per_window),
            config,
        }
    }

    /// Limiter key; one budget per artifact per domain
    pub fn key_for(request: &ProxyRequest) -> String {
        let domain = request.domain().unwrap_or_else(|_| request.url.clone());
        format!("{}:{}", request.artifact_id, domain)
    }

    pub fn limit(&self) -> u32 {
        self.limit.load(Ordering::Relaxed)
    }

    /// Change the per-window limit; existing windows keep their counts
    pub fn set_limit(&self, limit: u32) {
        self.limit.store(limit, Ordering::Relaxed);
    }

    /// Count `request` against its window
    pub fn check(&self, request: &ProxyRequest) -> RateLimitStatus {
        self.check_at(&Self::key_for(request), now_millis())
    }

    pub fn check_at(&self, key: &str, now: u64) -> RateLimitStatus {
        let limit = self.limit();
        let window_ms = self.config.window_ms;

        let mut window = self.windows.entry(key.to_string()).or_insert(RateWindow {
            count: 0,
            window_start: now,
            last_access: now,
        });

        if now.saturating_sub(window.window_start) >= window_ms {
            window.count = 0;
            window.window_start = now;
        }
        window.last_access = now;

        let reset_time = window.window_start + window_ms;

        if window.count >= limit {
            let wait_ms = reset_time.saturating_sub(now);
            let retry_after = wait_ms.div_ceil(1000).max(1);
            debug!("Rate limit hit for {} ({} / {})", key, window.count, limit);
            return RateLimitStatus {
                allowed: false,
                remaining: 0,
                limit,
                reset_time,
                retry_after_secs: Some(retry_after),
                count: window.count,
            };
        }

        window.count += 1;
        RateLimitStatus {
            allowed: true,
            remaining: limit - window.count,
            limit,
            reset_time,
            retry_after_secs: None,
            count: window.count,
        }
    }

    /// Current window for a key without counting
    pub fn peek(&self, key: &str) -> Option<RateWindow> {
        self.windows.get(key).map(|w| *w)
    }

    pub fn reset(&self, key: &str) -> bool {
        self.windows.remove(key).is_some()
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Drop windows untouched beyond the staleness threshold
    pub fn cleanup_stale(&self) -> usize {
        self.cleanup_stale_at(now_millis())
    }

    pub fn cleanup_stale_at(&self, now: u64) -> usize {
        let stale_after = self.config.stale_after_ms;
        let is_stale = |w: &RateWindow| now.saturating_sub(w.last_access) > stale_after;

        let candidates: Vec<String> = self
            .windows
            .iter()
            .filter(|entry| is_stale(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        candidates
            .iter()
            .filter(|key| self.windows.remove_if(key.as_str(), |_, w| is_stale(w)).is_some())
            .count()
    }

    pub fn start_cleanup(self: &Arc<Self>) -> SweepTask {
        let limiter = Arc::downgrade(self);
        SweepTask::spawn(
            "rate-limiter",
            Duration::from_secs(self.config.cleanup_interval_seconds.max(1)),
            move || {
                let limiter = limiter.clone();
                async move {
                    if let Some(limiter) = limiter.upgrade() {
                        let removed = limiter.cleanup_stale();
                        if removed > 0 {
                            debug!("Dropped {} stale rate-limit windows", removed);
                        }
                    }
                }
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: u32, window_ms: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            requests_per_window: limit,
            window_ms,
            ..Default::default()
        })
    }

    #[test]
    fn test_window_reset() {
        let limiter = limiter(2, 60_000);
        let t0 = 1_000_000;

        assert!(limiter.check_at("a:example.com", t0).allowed);
        let second = limiter.check_at("a:example.com", t0 + 10);
        assert!(second.allowed);
        assert_eq!(second.remaining, 0);

        let third = limiter.check_at("a:example.com", t0 + 20_000);
        assert!(!third.allowed);
        assert_eq!(third.retry_after_secs, Some(40));
        assert!(third.to_error("a:example.com").unwrap().is_retryable_by_caller());

        let after = limiter.check_at("a:example.com", t0 + 60_000);
        assert!(after.allowed);
        assert_eq!(after.count, 1);
        assert_eq!(after.remaining, 1);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let limiter = limiter(1, 60_000);
        limiter.check_at("k", 0);
        let denied = limiter.check_at("k", 59_001);
        assert_eq!(denied.retry_after_secs, Some(1));
        let denied = limiter.check_at("k", 58_999);
        assert_eq!(denied.retry_after_secs, Some(2));
    }

    // The budget is per (artifact, domain): one artifact hitting two domains
    // gets two budgets. A global per-artifact budget would need a different key.
    #[test]
    fn test_budget_is_per_artifact_and_domain() {
        let limiter = limiter(1, 60_000);
        let a1 = ProxyRequest::get("artifact-1", "https://one.example.com/");
        let a1_other = ProxyRequest::get("artifact-1", "https://two.example.com/");
        let a2 = ProxyRequest::get("artifact-2", "https://one.example.com/");

        assert!(limiter.check(&a1).allowed);
        assert!(!limiter.check(&a1).allowed);
        assert!(limiter.check(&a1_other).allowed);
        assert!(limiter.check(&a2).allowed);
        assert_eq!(limiter.tracked_keys(), 3);
        assert_eq!(RateLimiter::key_for(&a1), "artifact-1:one.example.com");
    }

    #[test]
    fn test_cleanup_stale_windows() {
        let limiter = RateLimiter::new(RateLimitConfig {
            stale_after_ms: 1_000,
            ..Default::default()
        });
        limiter.check_at("old", 0);
        limiter.check_at("fresh", 5_000);
        assert_eq!(limiter.cleanup_stale_at(5_500), 1);
        assert!(limiter.peek("old").is_none());
        assert!(limiter.peek("fresh").is_some());
    }

    #[test]
    fn test_set_limit() {
        let limiter = limiter(1, 60_000);
        limiter.check_at("k", 0);
        assert!(!limiter.check_at("k", 1).allowed);
        limiter.set_limit(3);
        assert!(limiter.check_at("k", 2).allowed);
        assert_eq!(limiter.limit(), 3);
    }
}
