//! IP allowlist middleware gating a path prefix (spec §4.8).

use ipnet::Ipv4Net;
use std::net::IpAddr;
use std::str::FromStr;

#[derive(Debug, Clone)]
enum Rule {
    Wildcard,
    Exact(IpAddr),
    Cidr(Ipv4Net),
}

/// Parsed-once allowlist for a single path prefix.
#[derive(Debug, Clone)]
pub struct IpAllowlist {
    prefix: String,
    rules: Vec<Rule>,
}

impl IpAllowlist {
    /// Parse rule strings: `*`, `localhost`, IPv4/IPv6 literals, IPv4 CIDR.
    pub fn new(prefix: impl Into<String>, raw_rules: &[String]) -> Self {
        let mut rules = Vec::new();
        for raw in raw_rules {
            let raw = raw.trim();
            if raw == "*" {
                rules.push(Rule::Wildcard);
            } else if raw == "localhost" {
                rules.push(Rule::Exact(IpAddr::from_str("127.0.0.1").unwrap()));
                rules.push(Rule::Exact(IpAddr::from_str("::1").unwrap()));
            } else if let Ok(net) = Ipv4Net::from_str(raw) {
                rules.push(Rule::Cidr(net));
            } else if let Ok(ip) = IpAddr::from_str(raw) {
                rules.push(Rule::Exact(ip));
            } else {
                tracing::warn!(rule = raw, "ignoring unparseable allowlist rule");
            }
        }
        Self {
            prefix: prefix.into(),
            rules,
        }
    }

    pub fn applies_to(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }

    /// `"unknown"` client IPs are rejected unless the wildcard rule is present.
    pub fn allows(&self, client_ip: &str) -> bool {
        if self.rules.iter().any(|r| matches!(r, Rule::Wildcard)) {
            return true;
        }
        let ip = match IpAddr::from_str(client_ip) {
            Ok(ip) => ip,
            Err(_) => return false,
        };
        self.rules.iter().any(|rule| match rule {
            Rule::Wildcard => true,
            Rule::Exact(allowed) => *allowed == ip,
            Rule::Cidr(net) => match ip {
                IpAddr::V4(v4) => net.contains(&v4),
                IpAddr::V6(_) => false,
            },
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

</content>
