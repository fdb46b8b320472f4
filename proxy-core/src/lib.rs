//! Proxy Core Library
//!
//! Leaf components of the artifact network mediation layer: security policy
//! evaluation, domain reputation aggregation, response caching, rate limiting
//! and HTTP execution. None of them knows about the others; the orchestrator
//! sequences them into a pipeline.

/// Response cache with scored eviction
pub mod cache;

/// HTTP execution engine
pub mod executor;

/// Domain list matching
pub mod filter;

/// Security policy evaluation and session overrides
pub mod policy;

/// Per-(artifact, domain) rate limiting
pub mod rate_limiter;

/// Domain reputation aggregation and providers
pub mod reputation;

/// Owned periodic background tasks
pub mod sweeper;

pub use cache::{CacheConfig, CacheOptions, CacheStats, ResponseCache};
pub use executor::{ExecuteOptions, HttpExecutor, RedirectGuard, RequestExecutor, DEFAULT_USER_AGENT};
pub use filter::DomainList;
pub use policy::{
    CustomRule, RuleAction, RuleCondition, SecurityPolicy, SecurityPolicyConfig, SecurityViolation,
    SessionOverride, Severity, ValidationOutcome, ViolationType,
};
pub use rate_limiter::{RateLimitConfig, RateLimitStatus, RateLimiter};
pub use reputation::{
    CheckOptions, DomainReputationRecord, HeuristicProvider, ReputationAggregator, ReputationConfig,
    ReputationLevel, ReputationProvider, StaticListProvider,
};
pub use sweeper::SweepTask;

pub use proxy_common::{ProxyError, ProxyResult};
