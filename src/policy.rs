//! Domain-specific resolution policy.
//!
//! Holds the upstream DNS servers and the per-domain rules supplied by
//! configuration. A rule flagged `remote_resolve` means the domain is
//! resolved on the remote side, so it never goes through the local cache.

use std::net::{IpAddr, Ipv4Addr};

/// A resolution rule for domains matching `pattern`.
///
/// `*google.com` matches any domain ending in `google.com`; a pattern
/// without a leading `*` only matches that exact domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRule {
    pub pattern: String,
    pub remote_resolve: bool,
}

impl DnsRule {
    pub fn new(pattern: impl Into<String>, remote_resolve: bool) -> Self {
        Self {
            pattern: pattern.into().to_lowercase(),
            remote_resolve,
        }
    }

    pub fn matches(&self, domain: &str) -> bool {
        let domain = domain.to_lowercase();
        match self.pattern.strip_prefix('*') {
            Some(suffix) => domain.ends_with(suffix),
            None => domain == self.pattern,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DnsPolicy {
    pub servers: Vec<IpAddr>,
    pub rules: Vec<DnsRule>,
}

impl DnsPolicy {
    pub fn new(servers: Vec<IpAddr>, rules: Vec<DnsRule>) -> Self {
        Self { servers, rules }
    }

    /// First rule matching `domain`, in configuration order.
    pub fn rule_for(&self, domain: &str) -> Option<&DnsRule> {
        self.rules.iter().find(|rule| rule.matches(domain))
    }

    /// Whether `domain` must be resolved remotely and bypass the cache.
    pub fn remote_resolve(&self, domain: &str) -> bool {
        self.rule_for(domain).is_some_and(|rule| rule.remote_resolve)
    }
}

impl Default for DnsPolicy {
    fn default() -> Self {
        Self {
            servers: vec![
                IpAddr::V4(Ipv4Addr::new(114, 114, 114, 114)),
                IpAddr::V4(Ipv4Addr::new(223, 5, 5, 5)),
            ],
            rules: Vec::new(),
        }
    }
}
