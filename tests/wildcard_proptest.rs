use mitm_certforge::{cache_key_for_host, normalize_host, parse_ip_literal};
use proptest::prelude::*;

fn label_strategy() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[a-z0-9][a-z0-9-]{0,8}").expect("label regex")
}

fn host_strategy() -> impl Strategy<Value = String> {
    proptest::collection::vec(label_strategy(), 1..5).prop_map(|labels| labels.join("."))
}

fn tld_list() -> Vec<String> {
    vec!["com".to_string(), "co.uk".to_string()]
}

proptest! {
    #[test]
    fn cache_key_is_deterministic(host in host_strategy()) {
        let tlds = tld_list();
        let first = cache_key_for_host(&host, true, &tlds);
        let second = cache_key_for_host(&host, true, &tlds);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn cache_key_is_idempotent(host in host_strategy()) {
        let tlds = tld_list();
        let key = cache_key_for_host(&host, true, &tlds);
        let rekeyed = cache_key_for_host(&key, true, &tlds);
        prop_assert_eq!(key, rekeyed);
    }

    #[test]
    fn cache_key_is_normalized_host_or_wildcard(host in host_strategy()) {
        let tlds = tld_list();
        let key = cache_key_for_host(&host, true, &tlds);
        if let Some(domain) = key.strip_prefix("*.") {
            prop_assert!(normalize_host(&host).ends_with(domain));
            prop_assert!(host.split('.').count() >= 3);
        } else {
            prop_assert_eq!(key, normalize_host(&host));
        }
    }

    #[test]
    fn disabled_wildcarding_only_normalizes(host in host_strategy()) {
        let key = cache_key_for_host(&host, false, &tld_list());
        prop_assert_eq!(key, normalize_host(&host));
    }

    #[test]
    fn short_hosts_are_never_wildcarded(
        label_a in label_strategy(),
        tld in prop::sample::select(vec!["com", "org"]),
    ) {
        let host = format!("{label_a}.{tld}");
        let key = cache_key_for_host(&host, true, &tld_list());
        prop_assert!(!key.starts_with("*."));
    }

    #[test]
    fn deep_com_hosts_collapse_to_registrable_wildcard(
        labels in proptest::collection::vec(label_strategy(), 2..5),
        apex in label_strategy(),
    ) {
        let host = format!("{}.{apex}.com", labels.join("."));
        let key = cache_key_for_host(&host, true, &tld_list());
        prop_assert_eq!(key, format!("*.{apex}.com"));
    }

    #[test]
    fn ipv4_literals_are_never_wildcarded(a in 0u8..=255, b in 0u8..=255, c in 0u8..=255, d in 0u8..=255) {
        let host = format!("{a}.{b}.{c}.{d}");
        prop_assert!(parse_ip_literal(&host).is_some());
        let key = cache_key_for_host(&host, true, &tld_list());
        prop_assert_eq!(key, host);
    }
}
