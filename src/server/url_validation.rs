use crate::error::{RelayError, Result};
use crate::metrics;
use crate::profile::{HostPattern, ProfileTable, normalize_host};
use crate::relay::resolve::RelayEndpoint;
use std::net::{Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

/// Allow-list guard run before every outbound fetch (SSRF protection).
///
/// The allow-list is the union of every origin profile's host patterns and
/// the operator's `ALLOWED_HOSTS`. Hostnames are matched without DNS
/// resolution; DNS rebinding is a known limitation accepted here.
#[derive(Debug, Clone)]
pub struct AllowListGuard {
    patterns: Vec<HostPattern>,
    block_private_networks: bool,
    endpoint: RelayEndpoint,
}

impl AllowListGuard {
    pub fn new(
        profiles: &ProfileTable,
        extra: &[HostPattern],
        block_private_networks: bool,
        endpoint: RelayEndpoint,
    ) -> Self {
        let mut patterns: Vec<HostPattern> = profiles.host_patterns().cloned().collect();
        for pattern in extra {
            if !patterns.contains(pattern) {
                patterns.push(pattern.clone());
            }
        }

        Self {
            patterns,
            block_private_networks,
            endpoint,
        }
    }

    /// True iff `host` equals an allow-listed host or sits under an allow-listed suffix.
    pub fn is_allowed(&self, host: &str) -> bool {
        let host = normalize_host(host);
        self.patterns.iter().any(|pattern| pattern.matches(&host))
    }

    /// Validate a target URL before it is fetched.
    ///
    /// # Errors
    /// Returns [`RelayError::AccessDenied`] for:
    /// - Non-HTTP(S) schemes or URLs without a host
    /// - Links pointing back at this relay
    /// - IPv4/IPv6 literals in private or reserved ranges (when blocking is on)
    /// - Hosts outside the allow-list
    pub fn check(&self, url: &Url) -> Result<()> {
        let verdict = self.verdict(url);
        if verdict.is_err() {
            metrics::record_denied();
        }
        verdict
    }

    fn verdict(&self, url: &Url) -> Result<()> {
        match url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(RelayError::AccessDenied(format!(
                    "scheme '{scheme}' not allowed, only http/https permitted"
                )));
            }
        }

        let host = url
            .host()
            .ok_or_else(|| RelayError::AccessDenied(format!("no host in URL: {url}")))?;

        if self.endpoint.is_relay_target(url) {
            return Err(RelayError::AccessDenied(format!(
                "relay loop: {url} points back at the relay"
            )));
        }

        if self.block_private_networks {
            match host {
                Host::Ipv4(ip) if is_blocked_ipv4(ip) => {
                    return Err(RelayError::AccessDenied(format!(
                        "private or reserved IPv4 address not allowed: {ip}"
                    )));
                }
                Host::Ipv6(ip) if is_blocked_ipv6(ip) => {
                    return Err(RelayError::AccessDenied(format!(
                        "private or reserved IPv6 address not allowed: {ip}"
                    )));
                }
                _ => {}
            }
        }

        let host = url.host_str().unwrap_or_default();
        if !self.is_allowed(host) {
            return Err(RelayError::AccessDenied(format!(
                "host '{host}' is not allow-listed"
            )));
        }

        Ok(())
    }
}

/// Returns `true` for IPv4 addresses in private or reserved ranges.
///
/// Blocked ranges:
/// - `0.0.0.0/8`     : "this" network (RFC 1122)
/// - `10.0.0.0/8`    : RFC 1918 private
/// - `127.0.0.0/8`   : loopback
/// - `169.254.0.0/16`: link-local / cloud-metadata
/// - `172.16.0.0/12` : RFC 1918 private
/// - `192.168.0.0/16`: RFC 1918 private
fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();

    a == 0
        || a == 10
        || a == 127
        || (a == 169 && b == 254)
        || (a == 172 && (16..=31).contains(&b))
        || (a == 192 && b == 168)
}

/// Returns `true` for IPv6 loopback, link-local (`fe80::/10`) and unique-local (`fc00::/7`).
fn is_blocked_ipv6(ip: Ipv6Addr) -> bool {
    let s = ip.segments();

    ip.is_loopback() || (s[0] & 0xffc0) == 0xfe80 || (s[0] & 0xfe00) == 0xfc00
}
