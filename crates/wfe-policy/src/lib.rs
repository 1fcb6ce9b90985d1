//! Outbound URL safety policy: HTTPS-only, hostname/CIDR deny-lists, and
//! DNS-resolved address checks before any tool call leaves the engine.

use std::net::IpAddr;
use std::str::FromStr;

use ipnetwork::IpNetwork;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    pub valid: bool,
    pub reason: Option<String>,
}

impl PolicyDecision {
    fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

const DENIED_HOSTNAMES: &[&str] = &[
    "localhost",
    "metadata.google.internal",
    "metadata",
    "169.254.169.254",
];

fn blocked_v4_networks() -> Vec<IpNetwork> {
    [
        "10.0.0.0/8",       // RFC1918
        "172.16.0.0/12",    // RFC1918
        "192.168.0.0/16",   // RFC1918
        "127.0.0.0/8",      // loopback
        "169.254.0.0/16",   // link-local
        "224.0.0.0/4",      // multicast
        "240.0.0.0/4",      // reserved
        "192.0.2.0/24",     // documentation (TEST-NET-1)
        "198.51.100.0/24",  // documentation (TEST-NET-2)
        "203.0.113.0/24",   // documentation (TEST-NET-3)
        "100.64.0.0/10",    // CGNAT
        "0.0.0.0/8",        // "this" network
    ]
    .iter()
    .map(|s| s.parse().expect("static CIDR literal"))
    .collect()
}

fn blocked_v6_networks() -> Vec<IpNetwork> {
    [
        "::1/128",     // loopback
        "fc00::/7",    // ULA
        "fe80::/10",   // link-local
        "ff00::/8",    // multicast
        "2001:db8::/32", // documentation
    ]
    .iter()
    .map(|s| s.parse().expect("static CIDR literal"))
    .collect()
}

fn is_blocked_ip(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(_) => blocked_v4_networks().iter().any(|net| net.contains(addr)),
        IpAddr::V6(_) => blocked_v6_networks().iter().any(|net| net.contains(addr)),
    }
}

fn dot_suffix_match(host: &str, allow_entry: &str) -> bool {
    host == allow_entry || host.ends_with(&format!(".{allow_entry}"))
}

/// Pure, synchronous part of `validate`: scheme, deny-list, numeric-IP CIDR,
/// and allow-list checks. Split out so callers that already hold a resolved
/// address (or want to skip DNS in tests) can reuse it.
pub fn validate_static(url: &str, allowlist: &[String]) -> PolicyDecision {
    let parsed = match Url::parse(url) {
        Ok(u) => u,
        Err(e) => return PolicyDecision::rejected(format!("unparseable url: {e}")),
    };
    if parsed.scheme() != "https" {
        return PolicyDecision::rejected("non-https scheme");
    }
    let host = match parsed.host_str() {
        Some(h) => h.to_string(),
        None => return PolicyDecision::rejected("missing host"),
    };

    if DENIED_HOSTNAMES.iter().any(|d| host.eq_ignore_ascii_case(d)) {
        return PolicyDecision::rejected("denylisted hostname");
    }

    if let Ok(ip) = IpAddr::from_str(&host) {
        if is_blocked_ip(ip) {
            return PolicyDecision::rejected("hostname is a blocked ip literal");
        }
    }

    if !allowlist.is_empty() && !allowlist.iter().any(|entry| dot_suffix_match(&host, entry)) {
        return PolicyDecision::rejected("hostname not in allowlist");
    }

    PolicyDecision::ok()
}

/// Full `validate(url, allowlist)` including DNS resolution: if every
/// A/AAAA lookup fails outright, the host is accepted to tolerate CDNs and
/// dynamic DNS; if any lookup succeeds and any resolved address is blocked,
/// the whole call is rejected.
pub async fn validate(url: &str, allowlist: &[String]) -> PolicyDecision {
    let decision = validate_static(url, allowlist);
    if !decision.valid {
        return decision;
    }

    let parsed = Url::parse(url).expect("already validated as parseable");
    let host = parsed.host_str().expect("already validated to have a host").to_string();
    let port = parsed.port_or_known_default().unwrap_or(443);

    match tokio::net::lookup_host((host.as_str(), port)).await {
        Ok(addrs) => {
            let mut any_resolved = false;
            for addr in addrs {
                any_resolved = true;
                if is_blocked_ip(addr.ip()) {
                    return PolicyDecision::rejected("resolved address in blocked range");
                }
            }
            let _ = any_resolved;
            PolicyDecision::ok()
        }
        Err(_) => PolicyDecision::ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_https() {
        let d = validate_static("http://example.com/tool", &[]);
        assert!(!d.valid);
    }

    #[test]
    fn rejects_metadata_endpoint() {
        let d = validate_static("https://169.254.169.254/latest/meta-data", &[]);
        assert!(!d.valid);
    }

    #[test]
    fn rejects_rfc1918_literal() {
        let d = validate_static("https://10.0.0.5/hook", &[]);
        assert!(!d.valid);
    }

    #[test]
    fn accepts_plain_https_host_with_no_allowlist() {
        let d = validate_static("https://api.example.com/v1/tool", &[]);
        assert!(d.valid);
    }

    #[test]
    fn allowlist_accepts_dot_suffix_and_rejects_others() {
        let allow = vec!["example.com".to_string()];
        assert!(validate_static("https://sub.example.com/x", &allow).valid);
        assert!(validate_static("https://example.com/x", &allow).valid);
        assert!(!validate_static("https://evil.com/x", &allow).valid);
    }
}
