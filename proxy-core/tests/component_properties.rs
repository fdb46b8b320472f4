//! Property tests for proxy-core components
//!
//! Invariants that must hold for arbitrary inputs: risk score clamping,
//! deterministic reputation aggregation, rate-limit budgets and cache key
//! stability.

use proxy_common::ProxyRequest;
use proxy_core::policy::{ViolationDetails, ViolationType};
use proxy_core::reputation::{ProviderVerdict, ReputationSource};
use proxy_core::{
    RateLimitConfig, RateLimiter, ReputationAggregator, ReputationLevel, ResponseCache,
    SecurityViolation, Severity,
};

use proptest::prelude::*;

fn level_strategy() -> impl Strategy<Value = ReputationLevel> {
    prop_oneof![
        Just(ReputationLevel::Trusted),
        Just(ReputationLevel::Unknown),
        Just(ReputationLevel::Suspicious),
        Just(ReputationLevel::Blocked),
    ]
}

fn verdicts(
    entries: &[(ReputationLevel, u8, u32)],
) -> Vec<(ReputationSource, ProviderVerdict)> {
    entries
        .iter()
        .enumerate()
        .map(|(i, (level, confidence, priority))| {
            let verdict = ProviderVerdict::new(*level, *confidence);
            (
                ReputationSource {
                    provider: format!("p{}", i),
                    priority: *priority,
                    level: verdict.level,
                    confidence: verdict.confidence,
                },
                verdict,
            )
        })
        .collect()
}

proptest! {
    /// Risk scores are always clamped into [0, 10]
    #[test]
    fn prop_risk_score_clamped(score in proptest::num::f64::ANY) {
        let violation = SecurityViolation::new(
            "req",
            "example.com",
            ViolationDetails {
                violation_type: ViolationType::CustomRule,
                description: "rule".to_string(),
                can_override: true,
                severity: Severity::Low,
                risk_score: score,
                override_instructions: None,
                rule_id: None,
            },
        );
        prop_assert!(violation.risk_score >= 0.0);
        prop_assert!(violation.risk_score <= 10.0);
    }

    /// Aggregation does not depend on provider order
    #[test]
    fn prop_aggregation_is_order_independent(
        entries in proptest::collection::vec((level_strategy(), 0u8..=100, 1u32..20), 0..6)
    ) {
        let forward = ReputationAggregator::aggregate("example.com", verdicts(&entries));
        let mut reversed_entries = entries.clone();
        reversed_entries.reverse();
        let reversed = ReputationAggregator::aggregate("example.com", verdicts(&reversed_entries));

        prop_assert_eq!(forward.level, reversed.level);
        prop_assert_eq!(forward.confidence, reversed.confidence);
        prop_assert!(forward.confidence <= 100);
    }

    /// A unanimous set of confident providers yields their level
    #[test]
    fn prop_unanimous_providers_agree(
        level in level_strategy(),
        entries in proptest::collection::vec((1u8..=100, 1u32..20), 1..5)
    ) {
        let entries: Vec<_> = entries.into_iter().map(|(c, p)| (level, c, p)).collect();
        let record = ReputationAggregator::aggregate("example.com", verdicts(&entries));
        prop_assert_eq!(record.level, level);
    }

    /// No window ever admits more than the limit
    #[test]
    fn prop_rate_limit_never_exceeds_budget(
        limit in 1u32..20,
        offsets in proptest::collection::vec(0u64..59_000, 1..60)
    ) {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_window: limit,
            window_ms: 60_000,
            ..Default::default()
        });
        let mut offsets = offsets;
        offsets.sort_unstable();

        let allowed = offsets
            .iter()
            .filter(|offset| limiter.check_at("artifact:example.com", 1_000_000 + **offset).allowed)
            .count();
        prop_assert_eq!(allowed, offsets.len().min(limit as usize));
    }

    /// Irrelevant headers never change the cache key
    #[test]
    fn prop_cache_key_ignores_noise_headers(
        path in "[a-z]{1,12}",
        noise in proptest::collection::vec(("x-[a-z]{1,8}", "[a-zA-Z0-9]{0,16}"), 0..5)
    ) {
        let base = ProxyRequest::get("artifact", format!("https://example.com/{}", path))
            .with_header("Accept", "application/json");
        let mut noisy = base.clone();
        for (name, value) in noise {
            noisy = noisy.with_header(name, value);
        }
        prop_assert_eq!(ResponseCache::cache_key(&base), ResponseCache::cache_key(&noisy));
    }
}
