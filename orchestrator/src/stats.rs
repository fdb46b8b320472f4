//! Request statistics

use proxy_common::{HttpMethod, NetworkStats, ProxyResponse};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Breakdowns {
    by_method: HashMap<String, u64>,
    by_status: HashMap<u16, u64>,
    violations: HashMap<String, u64>,
}

/// Shared counters for `get_stats`
#[derive(Debug, Default)]
pub struct StatsCollector {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    cached_responses: AtomicU64,
    blocked_requests: AtomicU64,
    rate_limited_requests: AtomicU64,
    cancelled_requests: AtomicU64,
    cache_lookups: AtomicU64,
    cache_hits: AtomicU64,
    total_response_time_ms: AtomicU64,
    timed_responses: AtomicU64,
    total_bytes_received: AtomicU64,
    breakdowns: Mutex<Breakdowns>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn breakdowns(&self) -> std::sync::MutexGuard<'_, Breakdowns> {
        self.breakdowns.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_request(&self, method: HttpMethod) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        *self
            .breakdowns()
            .by_method
            .entry(method.as_str().to_string())
            .or_insert(0) += 1;
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        self.cache_lookups.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_success(&self, response: &ProxyResponse) {
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
        if response.from_cache {
            self.cached_responses.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_response_time_ms
                .fetch_add(response.response_time_ms, Ordering::Relaxed);
            self.timed_responses.fetch_add(1, Ordering::Relaxed);
            self.total_bytes_received
                .fetch_add(response.body.len() as u64, Ordering::Relaxed);
        }
        *self.breakdowns().by_status.entry(response.status).or_insert(0) += 1;
    }

    pub fn record_failure(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_blocked(&self) {
        self.blocked_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.cancelled_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_violation(&self, violation_type: &str) {
        *self
            .breakdowns()
            .violations
            .entry(violation_type.to_string())
            .or_insert(0) += 1;
    }

    pub fn snapshot(&self, active_requests: usize) -> NetworkStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        let lookups = load(&self.cache_lookups);
        let timed = load(&self.timed_responses);
        let breakdowns = self.breakdowns();

        NetworkStats {
            total_requests: load(&self.total_requests),
            successful_requests: load(&self.successful_requests),
            failed_requests: load(&self.failed_requests),
            cached_responses: load(&self.cached_responses),
            blocked_requests: load(&self.blocked_requests),
            rate_limited_requests: load(&self.rate_limited_requests),
            cancelled_requests: load(&self.cancelled_requests),
            active_requests,
            cache_hit_rate: if lookups == 0 {
                0.0
            } else {
                load(&self.cache_hits) as f64 / lookups as f64 * 100.0
            },
            average_response_time_ms: if timed == 0 {
                0.0
            } else {
                load(&self.total_response_time_ms) as f64 / timed as f64
            },
            total_bytes_received: load(&self.total_bytes_received),
            requests_by_method: breakdowns.by_method.clone(),
            requests_by_status: breakdowns.by_status.clone(),
            violations_by_type: breakdowns.violations.clone(),
        }
    }
}
