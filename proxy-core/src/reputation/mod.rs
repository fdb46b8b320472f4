//! Domain Reputation Aggregation
//!
//! Queries every enabled [`ReputationProvider`] concurrently and folds their
//! verdicts into one confidence-weighted [`DomainReputationRecord`]. Results
//! are cached per domain with a TTL, independently of the response cache.

pub mod provider;
pub mod providers;

pub use provider::{
    DomainReputationRecord, ProviderVerdict, ReputationLevel, ReputationProvider,
    ReputationSource, ThreatInfo,
};
pub use providers::{HeuristicProvider, StaticListProvider};

use chrono::Utc;
use dashmap::DashMap;
use proxy_common::{normalize_domain, ProxyError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::sweeper::SweepTask;

/// Aggregator tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationConfig {
    pub cache_ttl_seconds: u64,
    /// A provider slower than this is treated as absent
    pub provider_timeout_ms: u64,
    pub cleanup_interval_seconds: u64,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 3600,
            provider_timeout_ms: 5000,
            cleanup_interval_seconds: 600,
        }
    }
}

/// Per-call cache behaviour
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckOptions {
    pub bypass_cache: bool,
    /// Only accept cached data younger than this
    pub max_age: Option<Duration>,
}

/// Reputation cache statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationCacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Clone)]
struct CachedRecord {
    record: DomainReputationRecord,
    stored_at: Instant,
}

/// Confidence-weighted reputation aggregator
pub struct ReputationAggregator {
    providers: Vec<Arc<dyn ReputationProvider>>,
    cache: DashMap<String, CachedRecord>,
    config: ReputationConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ReputationAggregator {
    pub fn new(config: ReputationConfig) -> Self {
        Self {
            providers: Vec::new(),
            cache: DashMap::new(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn ReputationProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.config.cache_ttl_seconds)
    }

    /// Aggregated verdict for `domain`
    pub async fn check_domain(
        &self,
        domain: &str,
        options: CheckOptions,
    ) -> Result<DomainReputationRecord, ProxyError> {
        let domain = normalize_domain(domain);
        if domain.is_empty() {
            return Err(ProxyError::validation("domain", "must not be empty"));
        }

        if !options.bypass_cache {
            if let Some(record) = self.cached(&domain, options.max_age) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(record);
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let verdicts = self.query_providers(&domain).await;
        let record = Self::aggregate(&domain, verdicts);

        debug!(
            "Reputation for {}: {:?} (confidence {}, {} source(s))",
            domain,
            record.level,
            record.confidence,
            record.sources.len()
        );

        self.cache.insert(
            domain,
            CachedRecord {
                record: record.clone(),
                stored_at: Instant::now(),
            },
        );
        Ok(record)
    }

    fn cached(&self, domain: &str, max_age: Option<Duration>) -> Option<DomainReputationRecord> {
        let entry = self.cache.get(domain)?;
        let age = entry.stored_at.elapsed();
        if age > self.cache_ttl() {
            return None;
        }
        if let Some(max_age) = max_age {
            if age > max_age {
                return None;
            }
        }
        let mut record = entry.record.clone();
        record.from_cache = true;
        Some(record)
    }

    /// Ask every enabled, available provider concurrently
    async fn query_providers(&self, domain: &str) -> Vec<(ReputationSource, ProviderVerdict)> {
        let timeout = Duration::from_millis(self.config.provider_timeout_ms);
        let mut tasks = JoinSet::new();

        for provider in self.providers.iter().filter(|p| p.enabled()) {
            let provider = provider.clone();
            let domain = domain.to_string();
            tasks.spawn(async move {
                let name = provider.name().to_string();
                let outcome = tokio::time::timeout(timeout, async {
                    if !provider.is_available().await {
                        return None;
                    }
                    match provider.check_domain(&domain).await {
                        Ok(verdict) => Some(verdict),
                        Err(e) => {
                            warn!("Reputation provider '{}' failed for {}: {}", name, domain, e);
                            None
                        }
                    }
                })
                .await;

                match outcome {
                    Ok(Some(verdict)) => Some((
                        ReputationSource {
                            provider: name,
                            priority: provider.priority(),
                            level: verdict.level,
                            confidence: verdict.confidence,
                        },
                        verdict,
                    )),
                    Ok(None) => None,
                    Err(_) => {
                        debug!("Reputation provider '{}' timed out for {}", name, domain);
                        None
                    }
                }
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(e) => warn!("Reputation provider task failed: {}", e),
            }
        }
        results
    }

    /// Fold provider verdicts into one record.
    ///
    /// Each verdict weighs `priority * confidence / 100`. The weighted mean
    /// ordinal maps back to a level; the weighted mean confidence becomes the
    /// aggregate confidence.
    pub fn aggregate(
        domain: &str,
        mut verdicts: Vec<(ReputationSource, ProviderVerdict)>,
    ) -> DomainReputationRecord {
        // Canonical summation order keeps float results independent of input order
        verdicts.sort_by(|a, b| {
            b.0.priority
                .cmp(&a.0.priority)
                .then_with(|| b.1.confidence.cmp(&a.1.confidence))
                .then_with(|| a.1.level.ordinal().total_cmp(&b.1.level.ordinal()))
                .then_with(|| a.0.provider.cmp(&b.0.provider))
        });

        let mut total_weight = 0.0;
        let mut weighted_score = 0.0;
        let mut weighted_confidence = 0.0;
        let mut categories = BTreeSet::new();
        let mut threats: Vec<ThreatInfo> = Vec::new();
        let mut sources = Vec::with_capacity(verdicts.len());

        for (source, verdict) in verdicts {
            let weight = source.priority as f64 * (verdict.confidence as f64 / 100.0);
            total_weight += weight;
            weighted_score += weight * verdict.level.ordinal();
            weighted_confidence += weight * verdict.confidence as f64;

            categories.extend(verdict.categories.iter().cloned());
            for threat in verdict.threats {
                match threats.iter_mut().find(|t| t.kind == threat.kind) {
                    Some(existing) if threat.severity > existing.severity => *existing = threat,
                    Some(_) => {}
                    None => threats.push(threat),
                }
            }
            sources.push(source);
        }

        let (level, confidence) = if total_weight > 0.0 {
            (
                ReputationLevel::from_score(weighted_score / total_weight),
                (weighted_confidence / total_weight).round().clamp(0.0, 100.0) as u8,
            )
        } else {
            (ReputationLevel::Unknown, 0)
        };

        DomainReputationRecord {
            domain: normalize_domain(domain),
            level,
            confidence,
            sources,
            categories: categories.into_iter().collect(),
            threats,
            checked_at: Utc::now(),
            from_cache: false,
        }
    }

    /// Remove expired cache entries; returns how many were dropped
    pub fn cleanup_expired(&self) -> usize {
        let ttl = self.cache_ttl();
        let expired: Vec<String> = self
            .cache
            .iter()
            .filter(|entry| entry.value().stored_at.elapsed() > ttl)
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .iter()
            .filter(|domain| {
                self.cache
                    .remove_if(domain.as_str(), |_, cached| cached.stored_at.elapsed() > ttl)
                    .is_some()
            })
            .count()
    }

    /// Start the periodic expiry sweep
    pub fn start_cleanup(self: &Arc<Self>) -> SweepTask {
        let aggregator = Arc::downgrade(self);
        SweepTask::spawn(
            "reputation-cache",
            Duration::from_secs(self.config.cleanup_interval_seconds.max(1)),
            move || {
                let aggregator = aggregator.clone();
                async move {
                    if let Some(aggregator) = aggregator.upgrade() {
                        let removed = aggregator.cleanup_expired();
                        if removed > 0 {
                            debug!("Purged {} expired reputation entries", removed);
                        }
                    }
                }
            },
        )
    }

    pub fn clear_cache(&self) -> usize {
        let size = self.cache.len();
        self.cache.clear();
        size
    }

    pub fn cache_stats(&self) -> ReputationCacheStats {
        ReputationCacheStats {
            size: self.cache.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
