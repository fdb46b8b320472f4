use proptest::prelude::*;
use proxy_common::{normalize_domain, HttpMethod, ProxyRequest, ProxySettings, SettingsUpdate};

fn arb_label() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9]{0,10}"
}

fn arb_domain() -> impl Strategy<Value = String> {
    prop::collection::vec(arb_label(), 1..5).prop_map(|labels| labels.join("."))
}

proptest! {
    #[test]
    fn prop_normalize_is_idempotent(domain in arb_domain(), pad in " {0,3}") {
        let once = normalize_domain(&format!("{}{}.{}", pad, domain, pad));
        prop_assert_eq!(normalize_domain(&once), once.clone());
        prop_assert_eq!(once, domain.to_ascii_lowercase());
    }

    #[test]
    fn prop_request_domain_is_normalized(domain in arb_domain()) {
        let request = ProxyRequest::get("a", format!("https://{}/path", domain));
        prop_assert_eq!(request.domain().unwrap(), domain.to_ascii_lowercase());
    }

    #[test]
    fn prop_method_parsing_ignores_case(upper in any::<bool>(), idx in 0usize..4) {
        let methods = [HttpMethod::Get, HttpMethod::Post, HttpMethod::Put, HttpMethod::Delete];
        let method = methods[idx];
        let text = if upper {
            method.as_str().to_string()
        } else {
            method.as_str().to_ascii_lowercase()
        };
        prop_assert_eq!(text.parse::<HttpMethod>().unwrap(), method);
    }

    #[test]
    fn prop_valid_updates_only_touch_named_fields(limit in 1u32..10_000, retries in 0u32..10) {
        let base = ProxySettings::default();
        let update = SettingsUpdate {
            rate_limit_per_minute: Some(limit),
            advanced: Some(proxy_common::AdvancedSettingsUpdate {
                max_retries: Some(retries),
                ..Default::default()
            }),
            ..Default::default()
        };
        let next = base.apply(&update).unwrap();
        prop_assert_eq!(next.rate_limit_per_minute, limit);
        prop_assert_eq!(next.advanced.max_retries, retries);
        prop_assert_eq!(next.default_timeout_ms, base.default_timeout_ms);
        prop_assert_eq!(next.advanced.max_redirects, base.advanced.max_redirects);
    }
}
