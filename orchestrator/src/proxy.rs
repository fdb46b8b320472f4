//! Proxy Orchestrator
//!
//! [`NetworkProxy`] is the only entry point the host calls. It sequences the
//! core components into one pipeline per request:
//!
//! `pending -> rate_limit_check -> validating -> (cache_hit -> completed) | executing -> completed | failed`
//!
//! and owns the in-flight registry, statistics, notifications and the
//! background sweeps of every component.

use proxy_common::{
    normalize_domain, ProxyError, ProxyEvent, ProxyRequest, ProxyResponse, ProxySettings,
    RequestStatus, SettingsUpdate, NetworkStats,
};
use proxy_core::policy::DEFAULT_OVERRIDE_DURATION;
use proxy_core::{
    CacheOptions, CheckOptions, CustomRule, DomainReputationRecord, ExecuteOptions,
    HeuristicProvider, HttpExecutor, RateLimiter, RedirectGuard, ReputationAggregator, ReputationLevel,
    ReputationProvider, RequestExecutor, ResponseCache, SecurityPolicy, SecurityPolicyConfig,
    SessionOverride, StaticListProvider, SweepTask,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::{MonitorConfig, ProxyConfig};
use crate::diagnostics::{ExecutionResult, ReputationSummary, RequestDiagnostics};
use crate::events::EventBus;
use crate::logging::redact_headers;
use crate::registry::{ActiveRequest, InFlightGuard, RequestRegistry};
use crate::stats::StatsCollector;

/// Remaining budget at or below this fraction of the limit triggers a warning
const RATE_LIMIT_WARNING_RATIO: f64 = 0.2;

/// Result of `override_block`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideGrant {
    pub success: bool,
    pub domain: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

impl From<SessionOverride> for OverrideGrant {
    fn from(grant: SessionOverride) -> Self {
        Self {
            success: true,
            domain: grant.domain,
            expires_at: grant.expires_at,
        }
    }
}

/// Assembles a [`NetworkProxy`]; the executor and reputation providers are pluggable
pub struct NetworkProxyBuilder {
    config: ProxyConfig,
    executor: Option<Arc<dyn RequestExecutor>>,
    providers: Vec<Arc<dyn ReputationProvider>>,
    default_providers: bool,
    custom_rules: Vec<CustomRule>,
}

impl NetworkProxyBuilder {
    pub fn executor(mut self, executor: Arc<dyn RequestExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn ReputationProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Skip the providers configured in the `reputation` section
    pub fn without_default_providers(mut self) -> Self {
        self.default_providers = false;
        self
    }

    pub fn custom_rules(mut self, rules: Vec<CustomRule>) -> Self {
        self.custom_rules = rules;
        self
    }

    pub fn build(self) -> Result<NetworkProxy, ProxyError> {
        let config = self.config;
        config.validate()?;
        let settings = config.settings.clone();

        let policy = Arc::new(SecurityPolicy::new(
            SecurityPolicyConfig::from_settings(&settings).with_custom_rules(self.custom_rules),
        )?);

        let mut aggregator = ReputationAggregator::new(config.reputation.aggregator.clone());
        if self.default_providers {
            let section = &config.reputation;
            let lists_configured = !(section.trusted_domains.is_empty()
                && section.suspicious_domains.is_empty()
                && section.blocked_domains.is_empty());
            if lists_configured {
                aggregator = aggregator.with_provider(Arc::new(
                    StaticListProvider::new("local-lists", 10)
                        .with_trusted(&section.trusted_domains)
                        .with_suspicious(&section.suspicious_domains)
                        .with_blocked(&section.blocked_domains),
                ));
            }
            if section.heuristics {
                aggregator = aggregator.with_provider(Arc::new(HeuristicProvider::new(3)));
            }
        }
        for provider in self.providers {
            aggregator = aggregator.with_provider(provider);
        }

        let executor: Arc<dyn RequestExecutor> = match self.executor {
            Some(executor) => executor,
            None => Arc::new(HttpExecutor::new(&settings.advanced)?),
        };

        info!(
            "Network proxy ready (enforcement: {:?}, reputation providers: {:?})",
            settings.enforcement_level,
            aggregator.provider_names()
        );

        Ok(NetworkProxy {
            policy,
            reputation: Arc::new(aggregator),
            cache: Arc::new(ResponseCache::new(config.cache.clone())),
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit_config())),
            executor,
            registry: Arc::new(RequestRegistry::new()),
            stats: StatsCollector::new(),
            events: EventBus::new(config.monitor.event_capacity),
            monitor: config.monitor.clone(),
            background: Mutex::new(Vec::new()),
            settings: RwLock::new(settings),
        })
    }
}

/// Secure network mediation layer for sandboxed artifacts
pub struct NetworkProxy {
    settings: RwLock<ProxySettings>,
    policy: Arc<SecurityPolicy>,
    reputation: Arc<ReputationAggregator>,
    cache: Arc<ResponseCache>,
    rate_limiter: Arc<RateLimiter>,
    executor: Arc<dyn RequestExecutor>,
    registry: Arc<RequestRegistry>,
    stats: StatsCollector,
    events: EventBus,
    monitor: MonitorConfig,
    background: Mutex<Vec<SweepTask>>,
}

impl NetworkProxy {
    pub fn builder(config: ProxyConfig) -> NetworkProxyBuilder {
        NetworkProxyBuilder {
            config,
            executor: None,
            providers: Vec::new(),
            default_providers: true,
            custom_rules: Vec::new(),
        }
    }

    pub fn new(config: ProxyConfig) -> Result<Self, ProxyError> {
        Self::builder(config).build()
    }

    /// Run one artifact request through the full pipeline
    pub async fn execute_request(&self, request: ProxyRequest) -> ExecutionResult {
        let settings = self.get_settings();
        let mut diagnostics = RequestDiagnostics::new(&request.id, &request.artifact_id);
        self.stats.record_request(request.method);

        debug!(
            "Request {} from artifact {}: {} {} headers={:?}",
            request.id,
            request.artifact_id,
            request.method,
            request.url,
            redact_headers(&request.headers)
        );

        let guard = match self
            .registry
            .register(&request, settings.max_concurrent_requests)
        {
            Ok(guard) => guard,
            Err(e) => {
                warn!("Request {} rejected: {}", request.id, e);
                self.stats.record_failure();
                diagnostics.enter(RequestStatus::Failed);
                diagnostics.finish();
                return ExecutionResult::failed(e.to_info(), diagnostics);
            }
        };

        self.transition(&request, &guard, &mut diagnostics, RequestStatus::Pending);
        let outcome = self
            .run_pipeline(&request, &settings, &guard, &mut diagnostics)
            .await;

        let result = match outcome {
            Ok(response) => {
                if response.from_cache {
                    self.transition(&request, &guard, &mut diagnostics, RequestStatus::CacheHit);
                }
                self.transition(&request, &guard, &mut diagnostics, RequestStatus::Completed);
                self.stats.record_success(&response);
                info!(
                    "Request {} completed: {} in {}ms{}",
                    request.id,
                    response.status,
                    response.response_time_ms,
                    if response.from_cache { " (cache)" } else { "" }
                );
                diagnostics.finish();
                ExecutionResult::completed(response, diagnostics)
            }
            Err(e) => {
                let status = match e {
                    ProxyError::Aborted { .. } => {
                        self.stats.record_cancelled();
                        RequestStatus::Cancelled
                    }
                    _ => {
                        self.stats.record_failure();
                        RequestStatus::Failed
                    }
                };
                match e.kind() {
                    proxy_common::ErrorKind::Security | proxy_common::ErrorKind::RateLimit => {
                        warn!("Request {} failed: {}", request.id, e)
                    }
                    _ => error!("Request {} failed: {}", request.id, e),
                }
                self.transition(&request, &guard, &mut diagnostics, status);
                diagnostics.finish();
                ExecutionResult::failed(e.to_info(), diagnostics)
            }
        };

        drop(guard);
        result
    }

    async fn run_pipeline(
        &self,
        request: &ProxyRequest,
        settings: &ProxySettings,
        guard: &InFlightGuard,
        diagnostics: &mut RequestDiagnostics,
    ) -> Result<ProxyResponse, ProxyError> {
        // 1. Rate limit
        self.transition(request, guard, diagnostics, RequestStatus::RateLimitCheck);
        let key = RateLimiter::key_for(request);
        let limit_status = self.rate_limiter.check(request);
        diagnostics.rate_limit_remaining = Some(limit_status.remaining);
        if let Some(err) = limit_status.to_error(&key) {
            self.stats.record_rate_limited();
            return Err(err);
        }
        if (limit_status.remaining as f64) <= limit_status.limit as f64 * RATE_LIMIT_WARNING_RATIO {
            self.events.publish(ProxyEvent::RateLimitWarning {
                artifact_id: request.artifact_id.clone(),
                domain: request.domain().unwrap_or_default(),
                remaining: limit_status.remaining,
                limit: limit_status.limit,
            });
        }

        // 2. Security validation; a malformed URL never reaches the policy
        self.transition(request, guard, diagnostics, RequestStatus::Validating);
        let domain = request.domain()?;
        let outcome = self.policy.validate(request);
        diagnostics.warnings.extend(outcome.warnings.iter().cloned());
        for violation in &outcome.violations {
            self.stats.record_violation(violation.violation_type.as_str());
            self.events.publish(ProxyEvent::SecurityViolationRaised {
                request_id: request.id.clone(),
                artifact_id: request.artifact_id.clone(),
                domain: domain.clone(),
                violation_type: violation.violation_type.to_string(),
                description: violation.description.clone(),
                can_override: violation.can_override,
                requires_approval: outcome.requires_approval,
            });
        }
        diagnostics.violations = outcome.violations.clone();
        if !outcome.allowed {
            if outcome.requires_approval && request.pre_approved {
                warn!(
                    "🔒 Request {} proceeds past {} overridable violation(s) with caller approval",
                    request.id,
                    outcome.violations.len()
                );
                diagnostics.approval_applied = true;
            } else {
                self.stats.record_blocked();
                return Err(outcome.to_error().unwrap_or_else(|| {
                    ProxyError::validation("url", "request rejected by security policy")
                }));
            }
        }

        // 3. Cache lookup
        let use_cache = settings.enable_caching && request.method.is_cacheable() && !request.bypass_cache;
        if use_cache {
            let cached = self.cache.get(request).await;
            self.stats.record_cache_lookup(cached.is_some());
            if let Some(response) = cached {
                diagnostics.cache_hit = true;
                return Ok(response);
            }
        }

        // 4. Reputation
        if settings.enable_reputation_check {
            let record = self.reputation.check_domain(&domain, CheckOptions::default()).await?;
            diagnostics.reputation = Some(ReputationSummary::from(&record));
            match record.level {
                ReputationLevel::Blocked => {
                    self.stats.record_blocked();
                    self.stats.record_violation("reputation_blocked");
                    return Err(ProxyError::ReputationBlocked {
                        domain: record.domain,
                        confidence: record.confidence,
                    });
                }
                ReputationLevel::Suspicious => {
                    let warning = format!(
                        "{} has a suspicious reputation (confidence {})",
                        record.domain, record.confidence
                    );
                    warn!("Request {}: {}", request.id, warning);
                    diagnostics.warnings.push(warning);
                }
                _ => {}
            }
        }

        // 5. Execute with linear backoff
        self.transition(request, guard, diagnostics, RequestStatus::Executing);
        let response = self
            .execute_with_retry(request, settings, guard, diagnostics)
            .await
            .map_err(|e| {
                if let ProxyError::SecurityViolation { violation_type, .. } = &e {
                    self.stats.record_blocked();
                    self.stats.record_violation(violation_type);
                }
                e
            })?;

        // 6. Cache store; admission rules decide which statuses are kept
        if use_cache {
            let options = CacheOptions::with_ttl(Duration::from_secs(settings.cache_default_ttl_seconds))
                .tag(format!("artifact:{}", request.artifact_id));
            diagnostics.cached = self.cache.set_with_options(request, &response, options).await;
        }

        Ok(response)
    }

    async fn execute_with_retry(
        &self,
        request: &ProxyRequest,
        settings: &ProxySettings,
        guard: &InFlightGuard,
        diagnostics: &mut RequestDiagnostics,
    ) -> Result<ProxyResponse, ProxyError> {
        let options = ExecuteOptions::from_settings(settings, request.timeout_ms)
            .with_redirect_guard(self.redirect_guard(request));
        let max_attempts = settings.advanced.max_retries + 1;
        let aborted = || ProxyError::Aborted {
            request_id: request.id.clone(),
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            diagnostics.attempts = attempt;

            let result = tokio::select! {
                biased;
                _ = guard.cancelled() => Err(aborted()),
                result = self.executor.execute(request, &options) => result,
            };

            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = Duration::from_millis(settings.advanced.retry_delay_ms * attempt as u64);
                    warn!(
                        "Request {} attempt {}/{} failed: {}; retrying in {:?}",
                        request.id, attempt, max_attempts, e, delay
                    );
                    diagnostics.retried_errors.push(e.to_string());
                    tokio::select! {
                        biased;
                        _ = guard.cancelled() => return Err(aborted()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Re-runs the policy on every redirect target. Caller approval carries
    /// over only while the chain stays on the approved host.
    fn redirect_guard(&self, request: &ProxyRequest) -> RedirectGuard {
        let policy = self.policy.clone();
        let origin = request.clone();
        let origin_domain = request.domain().ok();

        RedirectGuard::new(move |target| {
            let mut hop = origin.clone();
            hop.url = target.to_string();
            let outcome = policy.validate(&hop);
            if outcome.allowed {
                return Ok(());
            }
            let same_host = origin_domain.is_some() && hop.domain().ok() == origin_domain;
            if outcome.requires_approval && origin.pre_approved && same_host {
                return Ok(());
            }
            Err(outcome.to_error().unwrap_or_else(|| {
                ProxyError::validation("url", "redirect rejected by security policy")
            }))
        })
    }

    fn transition(
        &self,
        request: &ProxyRequest,
        guard: &InFlightGuard,
        diagnostics: &mut RequestDiagnostics,
        status: RequestStatus,
    ) {
        guard.set_status(status);
        diagnostics.enter(status);
        debug!("Request {} -> {:?}", request.id, status);
        self.events.publish(ProxyEvent::RequestStatusChanged {
            request_id: request.id.clone(),
            artifact_id: request.artifact_id.clone(),
            status,
        });
    }

    /// Aggregated reputation of a domain
    pub async fn check_domain(&self, domain: &str) -> Result<DomainReputationRecord, ProxyError> {
        self.reputation.check_domain(domain, CheckOptions::default()).await
    }

    pub async fn check_domain_with(
        &self,
        domain: &str,
        options: CheckOptions,
    ) -> Result<DomainReputationRecord, ProxyError> {
        self.reputation.check_domain(domain, options).await
    }

    pub fn get_settings(&self) -> ProxySettings {
        self.settings.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Merge a partial update and push it to every component.
    ///
    /// Invalid updates leave the current settings untouched.
    pub fn update_settings(&self, update: &SettingsUpdate) -> Result<ProxySettings, ProxyError> {
        let mut current = self.settings.write().unwrap_or_else(|e| e.into_inner());
        let next = current.apply(update)?;

        // The executor goes first: it is the only step that can fail on valid
        // settings, and nothing has been swapped yet when it does.
        if next.advanced != current.advanced {
            self.executor.reconfigure(&next.advanced)?;
        }
        let rules = self.policy.config().custom_rules;
        self.policy
            .update_config(SecurityPolicyConfig::from_settings(&next).with_custom_rules(rules))?;
        self.rate_limiter.set_limit(next.rate_limit_per_minute);

        *current = next.clone();
        drop(current);

        info!("Settings updated");
        self.events.publish(ProxyEvent::SettingsChanged {
            settings: next.clone(),
        });
        Ok(next)
    }

    /// Grant a one-hour session override for `domain`
    pub fn override_block(&self, domain: &str, reason: &str) -> Result<OverrideGrant, ProxyError> {
        self.override_block_for(domain, reason, DEFAULT_OVERRIDE_DURATION)
    }

    pub fn override_block_for(
        &self,
        domain: &str,
        reason: &str,
        duration: Duration,
    ) -> Result<OverrideGrant, ProxyError> {
        self.policy
            .create_override(domain, reason, duration)
            .map(OverrideGrant::from)
    }

    pub fn remove_override(&self, domain: &str) -> bool {
        self.policy.remove_override(domain)
    }

    pub fn list_overrides(&self) -> Vec<SessionOverride> {
        self.policy.list_overrides()
    }

    /// Drop cached responses for one domain, or everything
    pub async fn clear_cache(&self, domain: Option<&str>) -> usize {
        let removed = match domain {
            Some(domain) => self.cache.invalidate_domain(&normalize_domain(domain)).await,
            None => self.cache.clear().await,
        };
        info!("Cleared {} cached response(s)", removed);
        removed
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn get_stats(&self) -> NetworkStats {
        self.stats.snapshot(self.registry.len())
    }

    /// Cancel an in-flight request
    pub fn cancel_request(&self, request_id: &str) -> bool {
        let registered = self.registry.cancel(request_id);
        let executing = self.executor.cancel(request_id);
        if registered || executing {
            info!("Request {} cancelled", request_id);
        }
        registered || executing
    }

    pub fn active_requests(&self) -> Vec<ActiveRequest> {
        self.registry.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProxyEvent> {
        self.events.subscribe()
    }

    /// Cancel requests that outlived the stale threshold
    pub fn cancel_stale_requests(&self) -> usize {
        let threshold = Duration::from_millis(self.monitor.stale_request_ms);
        let stale = self.registry.stale(threshold);
        for request_id in &stale {
            warn!("Request {} exceeded {:?} in flight, cancelling", request_id, threshold);
            self.cancel_request(request_id);
        }
        stale.len()
    }

    /// Start every periodic sweep; a second call is a no-op
    pub fn start_background_tasks(self: &Arc<Self>) {
        let mut tasks = self.background.lock().unwrap_or_else(|e| e.into_inner());
        if !tasks.is_empty() {
            return;
        }

        tasks.push(self.cache.start_cleanup());
        tasks.push(self.rate_limiter.start_cleanup());
        tasks.push(self.reputation.start_cleanup());

        let proxy = Arc::downgrade(self);
        tasks.push(SweepTask::spawn(
            "session-overrides",
            Duration::from_secs(self.monitor.override_cleanup_interval_seconds.max(1)),
            move || {
                let proxy = proxy.clone();
                async move {
                    if let Some(proxy) = proxy.upgrade() {
                        let removed = proxy.policy.cleanup_expired_overrides();
                        if removed > 0 {
                            debug!("Purged {} expired session overrides", removed);
                        }
                    }
                }
            },
        ));

        let proxy = Arc::downgrade(self);
        tasks.push(SweepTask::spawn(
            "stale-requests",
            Duration::from_secs(self.monitor.check_interval_seconds.max(1)),
            move || {
                let proxy = proxy.clone();
                async move {
                    if let Some(proxy) = proxy.upgrade() {
                        proxy.cancel_stale_requests();
                    }
                }
            },
        ));

        info!("Started {} background task(s)", tasks.len());
    }

    pub fn background_task_count(&self) -> usize {
        self.background
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Stop background sweeps and cancel everything in flight
    pub async fn shutdown(&self) {
        let tasks: Vec<SweepTask> = {
            let mut guard = self.background.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for task in tasks {
            task.stop().await;
        }
        for active in self.registry.snapshot() {
            self.cancel_request(&active.request_id);
        }
        info!("Network proxy shut down");
    }
}
