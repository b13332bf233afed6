use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::time::{Duration, Instant};

use regex::Regex;

use super::error::FqdnError;
use crate::dns::entity::DnsAnswer;

/// Identifier of a policy rule, allocated by the policy controller and
/// stable for the rule's lifetime.
pub type RuleId = String;

// ── Selectors ───────────────────────────────────────────────────────

/// Normalized form of a policy FQDN expression.
///
/// An expression without wildcards selects exactly one name; one with
/// `*` is compiled to an anchored regex. Two selectors built from the
/// same source expression compare equal, which is what anchors the
/// bidirectional name/selector/rule maps.
#[derive(Debug, Clone)]
pub enum FqdnSelectorItem {
    Name {
        name: String,
    },
    Pattern {
        /// The derived regex source, kept for equality and hashing
        /// (`Regex` itself compares by identity, not by pattern).
        pattern: String,
        regex: Regex,
    },
}

impl FqdnSelectorItem {
    /// Build a selector from a policy FQDN expression.
    ///
    /// The expression is trimmed and lowercased. A wildcard expression is
    /// converted to an anchored regex: `.` becomes `\.` and `*` becomes
    /// `.*`. Compilation failure (stray regex metacharacters in the
    /// expression) is reported to the caller.
    pub fn from_expression(expression: &str) -> Result<Self, FqdnError> {
        let normalized = expression.trim().to_lowercase();
        if normalized.contains('*') {
            let pattern = wildcard_to_regex(&normalized);
            let regex = Regex::new(&pattern).map_err(|e| FqdnError::InvalidSelector {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;
            Ok(Self::Pattern { pattern, regex })
        } else {
            Ok(Self::Name { name: normalized })
        }
    }

    /// Whether the given (lowercased) FQDN is selected by this item.
    pub fn matches(&self, fqdn: &str) -> bool {
        match self {
            Self::Name { name } => name == fqdn,
            Self::Pattern { regex, .. } => regex.is_match(fqdn),
        }
    }

    /// The exact name this selector matches, if it is not a pattern.
    pub fn exact_name(&self) -> Option<&str> {
        match self {
            Self::Name { name } => Some(name),
            Self::Pattern { .. } => None,
        }
    }
}

impl PartialEq for FqdnSelectorItem {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Name { name: a }, Self::Name { name: b }) => a == b,
            (Self::Pattern { pattern: a, .. }, Self::Pattern { pattern: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Eq for FqdnSelectorItem {}

impl Hash for FqdnSelectorItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Name { name } => {
                0u8.hash(state);
                name.hash(state);
            }
            Self::Pattern { pattern, .. } => {
                1u8.hash(state);
                pattern.hash(state);
            }
        }
    }
}

impl fmt::Display for FqdnSelectorItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name { name } => write!(f, "name:{name}"),
            Self::Pattern { pattern, .. } => write!(f, "pattern:{pattern}"),
        }
    }
}

/// Derive the anchored regex source for a wildcard FQDN expression.
pub fn wildcard_to_regex(expression: &str) -> String {
    let mut out = String::with_capacity(expression.len() + 8);
    out.push('^');
    for c in expression.chars() {
        match c {
            '.' => out.push_str("\\."),
            '*' => out.push_str(".*"),
            other => out.push(other),
        }
    }
    out.push('$');
    out
}

// ── Resolution state ────────────────────────────────────────────────

/// Resolution results for one tracked FQDN: every address the name has
/// resolved to, with the time after which it must be re-verified.
#[derive(Debug, Clone, Default)]
pub struct DnsMeta {
    pub response_ips: HashMap<IpAddr, Instant>,
}

/// What a response merge changed, and when the name should be
/// re-queried to keep the cache ahead of record expiry.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeOutcome {
    /// True when the merged address set differs from the cached one.
    pub address_update: bool,
    /// Delay until the earliest surviving record expires. `None` when
    /// the response was not admitted into the cache.
    pub requery_after: Option<Duration>,
}

/// A rule realization result reported by the policy rule reconciler.
#[derive(Debug, Clone)]
pub struct RuleRealizationUpdate {
    pub rule_id: RuleId,
    /// `None` on success; the reconciler's failure message otherwise.
    pub error: Option<String>,
}

/// Convert parsed answers into an address → expiration map.
///
/// Answers from a disabled address family are discarded; the effective
/// TTL is floored at `min_ttl_secs` so the datapath never forgets an
/// address while a workload may still have it cached.
pub fn ips_with_expiration(
    answers: &[DnsAnswer],
    ipv4_enabled: bool,
    ipv6_enabled: bool,
    min_ttl_secs: u32,
    now: Instant,
) -> HashMap<IpAddr, Instant> {
    let mut ips = HashMap::new();
    for answer in answers {
        let wanted = match answer.ip {
            IpAddr::V4(_) => ipv4_enabled,
            IpAddr::V6(_) => ipv6_enabled,
        };
        if !wanted {
            continue;
        }
        let ttl = answer.ttl_secs.max(min_ttl_secs);
        let expires_at = now + Duration::from_secs(u64::from(ttl));
        // Duplicate answers for one IP keep the longest lifetime.
        ips.entry(answer.ip)
            .and_modify(|current| {
                if expires_at > *current {
                    *current = expires_at;
                }
            })
            .or_insert(expires_at);
    }
    ips
}

// ── Controller options ──────────────────────────────────────────────

/// Runtime options for the FQDN policy controller.
#[derive(Debug, Clone)]
pub struct FqdnControllerOptions {
    pub ipv4_enabled: bool,
    pub ipv6_enabled: bool,
    /// Floor applied to every record TTL, in seconds.
    pub min_ttl_secs: u32,
    /// Number of proactive DNS query workers.
    pub query_workers: usize,
    /// Initial retry delay after a failed query.
    pub min_retry_delay: Duration,
    /// Upper bound for the exponential retry backoff.
    pub max_retry_delay: Duration,
}

impl Default for FqdnControllerOptions {
    fn default() -> Self {
        Self {
            ipv4_enabled: true,
            ipv6_enabled: false,
            min_ttl_secs: 0,
            query_workers: 2,
            min_retry_delay: Duration::from_secs(5),
            max_retry_delay: Duration::from_secs(300),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn wildcard_regex_derivation() {
        assert_eq!(wildcard_to_regex("*.k8s.io"), "^.*\\.k8s\\.io$");
        assert_eq!(wildcard_to_regex("api.*.local"), "^api\\..*\\.local$");
    }

    #[test]
    fn wildcard_selector_matching() {
        let sel = FqdnSelectorItem::from_expression("*.k8s.io").unwrap();
        assert!(sel.matches("foo.k8s.io"));
        assert!(sel.matches("a.b.k8s.io"));
        assert!(!sel.matches("k8s.io"));
        assert!(!sel.matches("fooxk8sxio"));
    }

    #[test]
    fn exact_selector_matching() {
        let sel = FqdnSelectorItem::from_expression("API.Example.Com").unwrap();
        assert_eq!(sel.exact_name(), Some("api.example.com"));
        assert!(sel.matches("api.example.com"));
        assert!(!sel.matches("www.api.example.com"));
    }

    #[test]
    fn selectors_from_same_expression_are_equal() {
        let a = FqdnSelectorItem::from_expression("*.example.com").unwrap();
        let b = FqdnSelectorItem::from_expression("*.Example.COM ").unwrap();
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn name_and_pattern_selectors_differ() {
        let name = FqdnSelectorItem::from_expression("example.com").unwrap();
        let pattern = FqdnSelectorItem::from_expression("*.example.com").unwrap();
        assert_ne!(name, pattern);
    }

    #[test]
    fn invalid_wildcard_expression_is_rejected() {
        assert!(matches!(
            FqdnSelectorItem::from_expression("*(.example.com"),
            Err(FqdnError::InvalidSelector { .. })
        ));
    }

    #[test]
    fn ttl_floor_applies() {
        let now = Instant::now();
        let answers = [DnsAnswer {
            ip: "10.0.0.1".parse().unwrap(),
            ttl_secs: 5,
        }];
        let ips = ips_with_expiration(&answers, true, true, 60, now);
        assert_eq!(
            ips.get(&"10.0.0.1".parse().unwrap()),
            Some(&(now + Duration::from_secs(60)))
        );
    }

    #[test]
    fn disabled_family_is_filtered() {
        let now = Instant::now();
        let answers = [
            DnsAnswer {
                ip: "10.0.0.1".parse().unwrap(),
                ttl_secs: 30,
            },
            DnsAnswer {
                ip: "2001:db8::1".parse().unwrap(),
                ttl_secs: 30,
            },
        ];
        let v4_only = ips_with_expiration(&answers, true, false, 0, now);
        assert_eq!(v4_only.len(), 1);
        assert!(v4_only.contains_key(&"10.0.0.1".parse::<IpAddr>().unwrap()));

        let v6_only = ips_with_expiration(&answers, false, true, 0, now);
        assert_eq!(v6_only.len(), 1);
        assert!(v6_only.contains_key(&"2001:db8::1".parse::<IpAddr>().unwrap()));
    }

    #[test]
    fn duplicate_answers_keep_longest_ttl() {
        let now = Instant::now();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let answers = [
            DnsAnswer {
                ip,
                ttl_secs: 30,
            },
            DnsAnswer {
                ip,
                ttl_secs: 300,
            },
        ];
        let ips = ips_with_expiration(&answers, true, false, 0, now);
        assert_eq!(ips.get(&ip), Some(&(now + Duration::from_secs(300))));
    }
}
