//! IP/domain/path admission checks.
//!
//! Evaluation order: deny lists always dominate, then allow lists, then the
//! configured default policy. IP entries accept plain addresses and CIDR
//! blocks; domain entries accept a leading `*.` wildcard; path deny entries
//! accept a trailing `*` wildcard.

use crate::models::error::GatewayError;
use crate::models::settings::{DefaultPolicy, SecuritySettings};
use crate::pipeline::{Context, Handler};
use async_trait::async_trait;
use ipnet::IpNet;
use log::warn;
use std::net::IpAddr;

/// One IP list entry: an exact address or a CIDR block.
#[derive(Debug, Clone)]
enum IpMatcher {
    Exact(IpAddr),
    Cidr(IpNet),
}

impl IpMatcher {
    fn parse(entry: &str) -> Result<Self, String> {
        if entry.contains('/') {
            entry
                .parse::<IpNet>()
                .map(IpMatcher::Cidr)
                .map_err(|e| format!("invalid CIDR entry '{}': {}", entry, e))
        } else {
            entry
                .parse::<IpAddr>()
                .map(IpMatcher::Exact)
                .map_err(|e| format!("invalid IP entry '{}': {}", entry, e))
        }
    }

    fn matches(&self, ip: &IpAddr) -> bool {
        match self {
            IpMatcher::Exact(addr) => addr == ip,
            IpMatcher::Cidr(net) => net.contains(ip),
        }
    }
}

/// One domain list entry: exact host or `*.suffix` wildcard.
#[derive(Debug, Clone)]
enum DomainPattern {
    Exact(String),
    Wildcard(String), // stored as ".suffix"
}

impl DomainPattern {
    fn parse(entry: &str) -> Result<Self, String> {
        let entry = entry.trim().to_ascii_lowercase();
        if entry.is_empty() {
            return Err("empty domain entry".to_string());
        }
        if let Some(suffix) = entry.strip_prefix("*.") {
            if suffix.is_empty() {
                return Err(format!("invalid domain wildcard '{}'", entry));
            }
            Ok(DomainPattern::Wildcard(format!(".{}", suffix)))
        } else {
            Ok(DomainPattern::Exact(entry))
        }
    }

    fn matches(&self, host: &str, allow_subdomains: bool) -> bool {
        match self {
            DomainPattern::Exact(domain) => {
                host == domain
                    || (allow_subdomains && host.ends_with(&format!(".{}", domain)))
            }
            DomainPattern::Wildcard(suffix) => host.ends_with(suffix.as_str()),
        }
    }
}

/// One path deny entry: exact path or trailing-`*` prefix.
#[derive(Debug, Clone)]
enum PathPattern {
    Exact(String),
    Prefix(String),
}

impl PathPattern {
    fn parse(entry: &str) -> Self {
        match entry.strip_suffix('*') {
            Some(prefix) => PathPattern::Prefix(prefix.to_string()),
            None => PathPattern::Exact(entry.to_string()),
        }
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(p) => path == p,
            PathPattern::Prefix(p) => path.starts_with(p.as_str()),
        }
    }
}

/// Admission stage evaluating IP, domain and path lists.
pub struct SecurityHandler {
    default_policy: DefaultPolicy,
    ip_whitelist: Vec<IpMatcher>,
    ip_blacklist: Vec<IpMatcher>,
    domain_whitelist: Vec<DomainPattern>,
    domain_blacklist: Vec<DomainPattern>,
    path_blacklist: Vec<PathPattern>,
    allow_subdomains: bool,
}

impl SecurityHandler {
    pub fn new(settings: &SecuritySettings) -> Result<Self, String> {
        let parse_ips = |entries: &[String]| -> Result<Vec<IpMatcher>, String> {
            entries.iter().map(|e| IpMatcher::parse(e)).collect()
        };
        let parse_domains = |entries: &[String]| -> Result<Vec<DomainPattern>, String> {
            entries.iter().map(|e| DomainPattern::parse(e)).collect()
        };

        Ok(Self {
            default_policy: settings.default_policy,
            ip_whitelist: parse_ips(&settings.ip_whitelist)?,
            ip_blacklist: parse_ips(&settings.ip_blacklist)?,
            domain_whitelist: parse_domains(&settings.domain_whitelist)?,
            domain_blacklist: parse_domains(&settings.domain_blacklist)?,
            path_blacklist: settings
                .path_blacklist
                .iter()
                .map(|e| PathPattern::parse(e))
                .collect(),
            allow_subdomains: settings.allow_subdomains,
        })
    }

    /// Host from the `Host` header, lowercased, port stripped.
    fn request_host(ctx: &Context) -> Option<String> {
        ctx.headers
            .get(actix_web::http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(|h| {
                h.rsplit_once(':')
                    .map(|(host, port)| {
                        // Only strip a numeric port; IPv6 literals keep their colons.
                        if port.chars().all(|c| c.is_ascii_digit()) {
                            host
                        } else {
                            h
                        }
                    })
                    .unwrap_or(h)
                    .to_ascii_lowercase()
            })
    }

    /// Admission verdict for one request.
    pub fn admit(&self, ip: Option<IpAddr>, host: Option<&str>, path: &str) -> bool {
        if self.path_blacklist.iter().any(|p| p.matches(path)) {
            return false;
        }

        if let Some(ip) = ip {
            if self.ip_blacklist.iter().any(|m| m.matches(&ip)) {
                return false;
            }
        }
        if let Some(host) = host {
            if self
                .domain_blacklist
                .iter()
                .any(|d| d.matches(host, self.allow_subdomains))
            {
                return false;
            }
        }

        if let Some(ip) = ip {
            if self.ip_whitelist.iter().any(|m| m.matches(&ip)) {
                return true;
            }
        }
        if let Some(host) = host {
            if self
                .domain_whitelist
                .iter()
                .any(|d| d.matches(host, self.allow_subdomains))
            {
                return true;
            }
        }

        self.default_policy == DefaultPolicy::Allow
    }
}

#[async_trait]
impl Handler for SecurityHandler {
    fn name(&self) -> &'static str {
        "security"
    }

    async fn handle(&self, ctx: &mut Context) -> bool {
        let ip = ctx.client_addr.map(|a| a.ip());
        let host = Self::request_host(ctx);

        if self.admit(ip, host.as_deref(), &ctx.path) {
            return true;
        }

        warn!(
            "security denied request {}: ip={:?} host={:?} path={}",
            ctx.request_id, ip, host, ctx.path
        );
        ctx.abort_with(&GatewayError::AccessDenied);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler(settings: SecuritySettings) -> SecurityHandler {
        SecurityHandler::new(&settings).unwrap()
    }

    fn ip(s: &str) -> Option<IpAddr> {
        Some(s.parse().unwrap())
    }

    #[test]
    fn cidr_blacklist_denies() {
        let h = handler(SecuritySettings {
            enabled: true,
            ip_blacklist: vec!["10.0.0.0/8".to_string()],
            ..Default::default()
        });
        assert!(!h.admit(ip("10.3.4.5"), None, "/"));
        assert!(h.admit(ip("192.168.0.1"), None, "/"));
    }

    #[test]
    fn blacklist_dominates_whitelist() {
        let h = handler(SecuritySettings {
            enabled: true,
            ip_whitelist: vec!["10.0.0.0/8".to_string()],
            ip_blacklist: vec!["10.0.0.7".to_string()],
            default_policy: DefaultPolicy::Deny,
            ..Default::default()
        });
        assert!(h.admit(ip("10.0.0.6"), None, "/"));
        assert!(!h.admit(ip("10.0.0.7"), None, "/"));
    }

    #[test]
    fn default_deny_requires_a_list_match() {
        let h = handler(SecuritySettings {
            enabled: true,
            default_policy: DefaultPolicy::Deny,
            ip_whitelist: vec!["172.16.0.0/12".to_string()],
            ..Default::default()
        });
        assert!(h.admit(ip("172.16.9.9"), None, "/"));
        assert!(!h.admit(ip("8.8.8.8"), None, "/"));
    }

    #[test]
    fn wildcard_domains() {
        let h = handler(SecuritySettings {
            enabled: true,
            domain_blacklist: vec!["*.evil.test".to_string()],
            ..Default::default()
        });
        assert!(!h.admit(None, Some("api.evil.test"), "/"));
        assert!(h.admit(None, Some("evil.test"), "/"), "wildcard matched apex");
        assert!(h.admit(None, Some("good.test"), "/"));
    }

    #[test]
    fn subdomain_toggle() {
        let base = SecuritySettings {
            enabled: true,
            domain_whitelist: vec!["example.com".to_string()],
            default_policy: DefaultPolicy::Deny,
            ..Default::default()
        };
        let strict = handler(base.clone());
        assert!(strict.admit(None, Some("example.com"), "/"));
        assert!(!strict.admit(None, Some("api.example.com"), "/"));

        let relaxed = handler(SecuritySettings {
            allow_subdomains: true,
            ..base
        });
        assert!(relaxed.admit(None, Some("api.example.com"), "/"));
    }

    #[test]
    fn path_wildcards_deny() {
        let h = handler(SecuritySettings {
            enabled: true,
            path_blacklist: vec!["/internal/*".to_string(), "/metrics".to_string()],
            ..Default::default()
        });
        assert!(!h.admit(None, None, "/internal/debug"));
        assert!(!h.admit(None, None, "/metrics"));
        assert!(h.admit(None, None, "/metrics2"), "exact entry matched a prefix");
        assert!(h.admit(None, None, "/api/users"));
    }

    #[test]
    fn invalid_entries_fail_construction() {
        let result = SecurityHandler::new(&SecuritySettings {
            enabled: true,
            ip_whitelist: vec!["not-an-ip".to_string()],
            ..Default::default()
        });
        assert!(result.is_err());
    }
}
