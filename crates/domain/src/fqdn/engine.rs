use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::time::Instant;

use super::entity::{DnsMeta, FqdnSelectorItem, MergeOutcome, RuleId};
use super::error::FqdnError;

/// Selector index and DNS cache for FQDN-based policy rules.
///
/// Keeps the bidirectional name ↔ selector ↔ rule maps and the per-name
/// resolution cache in one structure: a response merge has to observe
/// and mutate all of them atomically, so the application layer guards
/// the whole engine with a single mutex. All mutation goes through
/// `&mut self`; time is injected by the caller.
pub struct FqdnSelectorEngine {
    /// Tracked FQDNs with their resolved addresses.
    dns_cache: HashMap<String, DnsMeta>,
    /// Which selectors currently match each known FQDN.
    fqdn_to_selector: HashMap<String, HashSet<FqdnSelectorItem>>,
    /// Reverse of `fqdn_to_selector`: the known FQDNs each selector matches.
    selector_to_fqdn: HashMap<FqdnSelectorItem, HashSet<String>>,
    /// The rules referencing each selector. A selector lives exactly as
    /// long as this entry is non-empty.
    selector_to_rule_ids: HashMap<FqdnSelectorItem, HashSet<RuleId>>,
}

impl FqdnSelectorEngine {
    pub fn new() -> Self {
        Self {
            dns_cache: HashMap::new(),
            fqdn_to_selector: HashMap::new(),
            selector_to_fqdn: HashMap::new(),
            selector_to_rule_ids: HashMap::new(),
        }
    }

    // ── Rule registration ───────────────────────────────────────────

    /// Register a rule's FQDN expressions.
    ///
    /// Returns the exact names that should be resolved immediately. A new
    /// pattern selector is instead matched against every name already in
    /// the cache; no query can be issued for names nobody has looked up.
    pub fn add_rule(&mut self, rule_id: &str, fqdns: &[String]) -> Result<Vec<String>, FqdnError> {
        let mut to_query = Vec::new();
        for fqdn in fqdns {
            let selector = FqdnSelectorItem::from_expression(fqdn)?;
            if let Some(rule_ids) = self.selector_to_rule_ids.get_mut(&selector) {
                rule_ids.insert(rule_id.to_string());
                continue;
            }
            self.selector_to_rule_ids
                .insert(selector.clone(), HashSet::from([rule_id.to_string()]));
            match selector.exact_name() {
                Some(name) => {
                    let name = name.to_string();
                    self.set_fqdn_match_selector(&name, selector);
                    to_query.push(name);
                }
                None => {
                    let matched: Vec<String> = self
                        .dns_cache
                        .keys()
                        .filter(|name| selector.matches(name.as_str()))
                        .cloned()
                        .collect();
                    for name in matched {
                        self.set_fqdn_match_selector(&name, selector.clone());
                    }
                }
            }
        }
        Ok(to_query)
    }

    /// Drop a rule from each selector it referenced; selectors left with
    /// no rules are garbage-collected, and names left with no selectors
    /// are evicted from the cache.
    pub fn remove_rule(&mut self, rule_id: &str, fqdns: &[String]) -> Result<(), FqdnError> {
        for fqdn in fqdns {
            let selector = FqdnSelectorItem::from_expression(fqdn)?;
            let Some(rule_ids) = self.selector_to_rule_ids.get_mut(&selector) else {
                continue;
            };
            if rule_ids.remove(rule_id) && rule_ids.is_empty() {
                self.cleanup_selector(&selector);
            }
        }
        Ok(())
    }

    fn cleanup_selector(&mut self, selector: &FqdnSelectorItem) {
        for fqdn in self.selector_to_fqdn.remove(selector).unwrap_or_default() {
            let Some(selectors) = self.fqdn_to_selector.get_mut(&fqdn) else {
                continue;
            };
            selectors.remove(selector);
            if selectors.is_empty() {
                self.fqdn_to_selector.remove(&fqdn);
                self.dns_cache.remove(&fqdn);
            }
        }
        self.selector_to_rule_ids.remove(selector);
    }

    /// Record that `fqdn` and `selector` match, in both directions.
    fn set_fqdn_match_selector(&mut self, fqdn: &str, selector: FqdnSelectorItem) {
        self.selector_to_fqdn
            .entry(selector.clone())
            .or_default()
            .insert(fqdn.to_string());
        self.fqdn_to_selector
            .entry(fqdn.to_string())
            .or_default()
            .insert(selector);
    }

    // ── Lookups ─────────────────────────────────────────────────────

    /// The cached addresses for every name a known selector matches.
    /// `None` when the selector was never registered by any rule.
    pub fn ips_for_selector(&self, selector: &FqdnSelectorItem) -> Option<Vec<IpAddr>> {
        let fqdns = self.selector_to_fqdn.get(selector)?;
        let mut ips = Vec::new();
        for fqdn in fqdns {
            if let Some(meta) = self.dns_cache.get(fqdn) {
                ips.extend(meta.response_ips.keys().copied());
            }
        }
        Some(ips)
    }

    /// Every rule whose selectors match the given name.
    pub fn affected_rules(&self, fqdn: &str) -> HashSet<RuleId> {
        let mut rules = HashSet::new();
        let Some(selectors) = self.fqdn_to_selector.get(fqdn) else {
            return rules;
        };
        for selector in selectors {
            if let Some(rule_ids) = self.selector_to_rule_ids.get(selector) {
                rules.extend(rule_ids.iter().cloned());
            }
        }
        rules
    }

    /// Whether the name is currently tracked in the cache.
    pub fn is_tracking(&self, fqdn: &str) -> bool {
        self.dns_cache.contains_key(fqdn)
    }

    pub fn tracked_fqdn_count(&self) -> usize {
        self.dns_cache.len()
    }

    pub fn selector_count(&self) -> usize {
        self.selector_to_rule_ids.len()
    }

    // ── Response merge ──────────────────────────────────────────────

    /// Merge a DNS response into the cache.
    ///
    /// A name seen for the first time is admitted only if a registered
    /// selector matches it (binding the mappings as a side effect).
    /// For a cached name: new addresses are added; addresses present in
    /// both keep the later expiration; addresses absent from the response
    /// are retained until they expire, then dropped. The outcome carries
    /// the delay until the earliest surviving expiration so the caller
    /// can schedule a re-query.
    pub fn merge_response(
        &mut self,
        fqdn: &str,
        new_ips: &HashMap<IpAddr, Instant>,
        now: Instant,
    ) -> MergeOutcome {
        let mut merged: HashMap<IpAddr, Instant> = HashMap::new();
        let mut address_update = false;

        if let Some(cached) = self.dns_cache.get(fqdn) {
            for (ip, expires_at) in new_ips {
                if !cached.response_ips.contains_key(ip) {
                    merged.insert(*ip, *expires_at);
                    address_update = true;
                }
            }
            for (ip, cached_expiry) in &cached.response_ips {
                match new_ips.get(ip) {
                    // Present in both: never shorten a lifetime already promised.
                    Some(new_expiry) => {
                        merged.insert(*ip, (*cached_expiry).max(*new_expiry));
                    }
                    // Absent and expired: drop, and let the rules resync.
                    None if *cached_expiry < now => {
                        address_update = true;
                    }
                    // Absent but still live: keep it. Round-robin DNS and
                    // split answer sets would otherwise make rules flap.
                    None => {
                        merged.insert(*ip, *cached_expiry);
                    }
                }
            }
        } else {
            let matching: Vec<FqdnSelectorItem> = self
                .selector_to_rule_ids
                .keys()
                .filter(|selector| selector.matches(fqdn))
                .cloned()
                .collect();
            if !matching.is_empty() {
                // A name can be matched by several selectors; bind them all.
                for selector in matching {
                    self.set_fqdn_match_selector(fqdn, selector);
                }
                merged.extend(new_ips.iter());
                address_update = true;
            }
        }

        // Empty only when no selector matched a first-seen name.
        if merged.is_empty() {
            return MergeOutcome::default();
        }
        let earliest = merged.values().min().copied();
        self.dns_cache
            .insert(fqdn.to_string(), DnsMeta { response_ips: merged });
        MergeOutcome {
            address_update,
            requery_after: earliest.map(|e| e.saturating_duration_since(now)),
        }
    }
}

impl Default for FqdnSelectorEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ───────────────────────────────────────────────────────────
