use std::net::IpAddr;

/// IP hosts keep their exact spelling; DNS names are case-insensitive.
pub fn normalize_host(host: &str) -> String {
    match parse_ip_literal(host) {
        Some(_) => host.to_string(),
        None => host.to_ascii_lowercase(),
    }
}

/// Accepts bare literals and bracket-wrapped IPv6 ("[::1]").
pub fn parse_ip_literal(host: &str) -> Option<IpAddr> {
    let trimmed = host
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(host);
    trimmed.parse().ok()
}

/// Cache key for a requested host. With wildcarding enabled, hosts with at
/// least three labels ending in a configured TLD collapse onto
/// `*.<registrable-domain>` so sibling subdomains share one certificate.
pub fn cache_key_for_host(host: &str, wildcard_enabled: bool, tlds: &[String]) -> String {
    let normalized = normalize_host(host);
    if !wildcard_enabled || parse_ip_literal(&normalized).is_some() {
        return normalized;
    }

    let labels: Vec<&str> = normalized.split('.').collect();
    if labels.len() < 3 || labels.iter().any(|label| label.is_empty()) {
        return normalized;
    }

    for tld in tlds {
        let suffix = format!(".{tld}");
        if !normalized.ends_with(&suffix) {
            continue;
        }
        let tld_labels = tld.split('.').count();
        if labels.len() < tld_labels + 2 {
            continue;
        }
        let registrable = labels[labels.len() - tld_labels - 1..].join(".");
        return format!("*.{registrable}");
    }

    normalized
}

#[cfg(test)]
mod tests {
    use super::{cache_key_for_host, normalize_host, parse_ip_literal};

    fn tlds(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|entry| entry.to_string()).collect()
    }

    #[test]
    fn normalizes_dns_hosts_to_lowercase() {
        assert_eq!(normalize_host("API.Example.COM"), "api.example.com");
        assert_eq!(normalize_host("192.168.1.5"), "192.168.1.5");
    }

    #[test]
    fn parses_bracketed_ipv6_literals() {
        assert!(parse_ip_literal("[::1]").is_some());
        assert!(parse_ip_literal("::1").is_some());
        assert!(parse_ip_literal("192.168.1.5").is_some());
        assert!(parse_ip_literal("example.com").is_none());
    }

    #[test]
    fn collapses_sibling_subdomains_onto_one_wildcard() {
        let tlds = tlds(&["com"]);
        assert_eq!(
            cache_key_for_host("a.b.example.com", true, &tlds),
            "*.example.com"
        );
        assert_eq!(
            cache_key_for_host("c.b.example.com", true, &tlds),
            "*.example.com"
        );
        assert_eq!(
            cache_key_for_host("api.example.com", true, &tlds),
            "*.example.com"
        );
    }

    #[test]
    fn two_label_hosts_are_never_wildcarded() {
        assert_eq!(
            cache_key_for_host("example.com", true, &tlds(&["com"])),
            "example.com"
        );
    }

    #[test]
    fn unlisted_tlds_pass_through() {
        assert_eq!(
            cache_key_for_host("a.example.org", true, &tlds(&["com"])),
            "a.example.org"
        );
    }

    #[test]
    fn multi_label_tlds_keep_registrable_domain() {
        assert_eq!(
            cache_key_for_host("shop.acme.co.uk", true, &tlds(&["co.uk"])),
            "*.acme.co.uk"
        );
        assert_eq!(
            cache_key_for_host("acme.co.uk", true, &tlds(&["co.uk"])),
            "acme.co.uk"
        );
    }

    #[test]
    fn disabled_policy_and_ip_hosts_pass_through() {
        assert_eq!(
            cache_key_for_host("a.b.example.com", false, &tlds(&["com"])),
            "a.b.example.com"
        );
        assert_eq!(
            cache_key_for_host("192.168.1.5", true, &tlds(&["com"])),
            "192.168.1.5"
        );
    }
}
