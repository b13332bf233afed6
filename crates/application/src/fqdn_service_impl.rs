use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use domain::dns::entity::DnsAnswer;
use domain::dns::parser::{parse_response, parse_response_partially};
use domain::fqdn::engine::FqdnSelectorEngine;
use domain::fqdn::entity::{
    FqdnControllerOptions, FqdnSelectorItem, RuleId, RuleRealizationUpdate, ips_with_expiration,
};
use domain::fqdn::error::FqdnError;
use domain::packet::entity::{DnsTransportPayload, PausedDnsPacket};
use domain::packet::frame::extract_dns_payload;
use ports::primary::fqdn_policy_port::FqdnPolicyPort;
use ports::secondary::datapath_port::{DNS_INTERCEPTION_FLOW_ID, DatapathPort};
use ports::secondary::metrics_port::MetricsPort;
use ports::secondary::rule_reconciler_port::RuleReconcilerPort;
use ports::secondary::upstream_resolver_port::UpstreamResolverPort;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::query_scheduler::{
    QueryResultSink, QueryScheduler, QuerySchedulerConfig, run_scheduler,
};
use crate::rule_sync_tracker::{RealizationWaiter, RuleSyncTracker};

/// How long a paused DNS response may wait for rule realization before
/// it is dropped and the workload is left to retry.
const RULE_REALIZATION_TIMEOUT: Duration = Duration::from_secs(2);

/// FQDN-aware NetworkPolicy enforcement service.
///
/// Owns the selector/cache engine, the per-rule workload port union
/// backing the DNS interception flow, the realization tracker, and the
/// proactive re-query scheduler. The policy controller drives it through
/// `FqdnPolicyPort`; the datapath hands it paused DNS responses.
///
/// Lock ordering: the selector/cache mutex is always released before the
/// tracker is touched.
pub struct FqdnPolicyService {
    options: FqdnControllerOptions,
    /// Selector index and DNS cache. One mutex: a response merge must
    /// observe and mutate them atomically.
    selectors: Mutex<FqdnSelectorEngine>,
    /// Workload ports selected by each rule; their union is the
    /// interception flow's match set.
    rule_ports: Mutex<HashMap<RuleId, HashSet<u32>>>,
    tracker: Arc<RuleSyncTracker>,
    scheduler: QueryScheduler,
    datapath: Arc<dyn DatapathPort>,
    reconciler: Arc<dyn RuleReconcilerPort>,
    metrics: Arc<dyn MetricsPort>,
}

impl FqdnPolicyService {
    /// Install the interception flow, start the tracker dispatch task
    /// and the query scheduler, and return the ready-to-use service.
    pub fn spawn(
        options: FqdnControllerOptions,
        datapath: Arc<dyn DatapathPort>,
        reconciler: Arc<dyn RuleReconcilerPort>,
        resolver: Arc<dyn UpstreamResolverPort>,
        metrics: Arc<dyn MetricsPort>,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>, FqdnError> {
        datapath.install_dns_interception_flow(DNS_INTERCEPTION_FLOW_ID)?;

        let scheduler_config = QuerySchedulerConfig {
            workers: options.query_workers,
            ipv4_enabled: options.ipv4_enabled,
            ipv6_enabled: options.ipv6_enabled,
            min_retry_delay: options.min_retry_delay,
            max_retry_delay: options.max_retry_delay,
        };
        let (tracker, update_rx) = RuleSyncTracker::new(Arc::clone(&metrics));
        let tracker = Arc::new(tracker);
        let (scheduler, scheduler_rx) = QueryScheduler::channel();

        let service = Arc::new(Self {
            options,
            selectors: Mutex::new(FqdnSelectorEngine::new()),
            rule_ports: Mutex::new(HashMap::new()),
            tracker: Arc::clone(&tracker),
            scheduler: scheduler.clone(),
            datapath,
            reconciler,
            metrics: Arc::clone(&metrics),
        });

        tokio::spawn(tracker.run(update_rx, cancel.clone()));
        tokio::spawn(run_scheduler(
            scheduler_config,
            scheduler,
            scheduler_rx,
            resolver,
            Arc::clone(&service) as Arc<dyn QueryResultSink>,
            metrics,
            cancel,
        ));
        Ok(service)
    }

    // ── Rule management ─────────────────────────────────────────────

    /// Register a rule's FQDN expressions and program its workload
    /// ports into the interception flow.
    pub fn add_fqdn_rule(
        &self,
        rule_id: &str,
        fqdns: &[String],
        ports: &[u32],
    ) -> Result<(), FqdnError> {
        let to_query = {
            let mut selectors = self.selectors.lock().unwrap_or_else(PoisonError::into_inner);
            selectors.add_rule(rule_id, fqdns)?
        };
        for fqdn in to_query {
            tracing::debug!(rule_id, fqdn = %fqdn, "new exact FQDN selector, querying immediately");
            self.scheduler.schedule(fqdn, Duration::ZERO);
        }
        self.update_rule_ports(rule_id, ports)
    }

    /// Remove a rule's selectors and withdraw its ports from the
    /// interception flow.
    pub fn delete_fqdn_rule(&self, rule_id: &str, fqdns: &[String]) -> Result<(), FqdnError> {
        {
            let mut selectors = self.selectors.lock().unwrap_or_else(PoisonError::into_inner);
            selectors.remove_rule(rule_id, fqdns)?;
            self.metrics
                .set_tracked_fqdn_count(selectors.tracked_fqdn_count() as u64);
        }
        self.delete_rule_ports(rule_id)
    }

    /// Replace the workload port set of a rule and push the resulting
    /// union deltas to the datapath. On datapath failure the previous
    /// port set is restored, so a retry recomputes the same deltas.
    pub fn update_rule_ports(&self, rule_id: &str, ports: &[u32]) -> Result<(), FqdnError> {
        let mut rule_ports = self.rule_ports.lock().unwrap_or_else(PoisonError::into_inner);
        let old_union = port_union(&rule_ports);
        let previous = rule_ports.insert(rule_id.to_string(), ports.iter().copied().collect());
        let new_union = port_union(&rule_ports);

        if let Err(err) = self.apply_port_deltas(&old_union, &new_union) {
            match previous {
                Some(ports) => rule_ports.insert(rule_id.to_string(), ports),
                None => rule_ports.remove(rule_id),
            };
            return Err(err);
        }
        Ok(())
    }

    fn delete_rule_ports(&self, rule_id: &str) -> Result<(), FqdnError> {
        let mut rule_ports = self.rule_ports.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(previous) = rule_ports.remove(rule_id) else {
            return Ok(());
        };
        let new_union = port_union(&rule_ports);
        let removed: Vec<u32> = previous
            .iter()
            .copied()
            .filter(|port| !new_union.contains(port))
            .collect();
        if !removed.is_empty()
            && let Err(err) = self
                .datapath
                .remove_ports_from_interception(DNS_INTERCEPTION_FLOW_ID, &sorted(removed))
        {
            rule_ports.insert(rule_id.to_string(), previous);
            return Err(err);
        }
        Ok(())
    }

    fn apply_port_deltas(
        &self,
        old_union: &HashSet<u32>,
        new_union: &HashSet<u32>,
    ) -> Result<(), FqdnError> {
        let added: Vec<u32> = new_union.difference(old_union).copied().collect();
        let removed: Vec<u32> = old_union.difference(new_union).copied().collect();
        if !added.is_empty() {
            self.datapath
                .add_ports_to_interception(DNS_INTERCEPTION_FLOW_ID, &sorted(added))?;
        }
        if !removed.is_empty() {
            self.datapath
                .remove_ports_from_interception(DNS_INTERCEPTION_FLOW_ID, &sorted(removed))?;
        }
        Ok(())
    }

    // ── Lookups and realization reports ─────────────────────────────

    /// Deduplicated union of cached addresses for the given FQDN
    /// expressions.
    pub fn ips_for_selectors(&self, fqdns: &[String]) -> Vec<IpAddr> {
        let selectors = self.selectors.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ips = HashSet::new();
        for fqdn in fqdns {
            let item = match FqdnSelectorItem::from_expression(fqdn) {
                Ok(item) => item,
                Err(err) => {
                    tracing::warn!(fqdn = %fqdn, error = %err, "skipping invalid FQDN expression");
                    continue;
                }
            };
            match selectors.ips_for_selector(&item) {
                Some(matched) => ips.extend(matched),
                None => {
                    tracing::warn!(
                        selector = %item,
                        "FQDN selector is not known to the controller, cannot get IPs"
                    );
                }
            }
        }
        ips.into_iter().collect()
    }

    /// Entry point for the rule reconciler's realization reports.
    pub fn notify_rule_realization(&self, update: RuleRealizationUpdate) {
        self.tracker.notify(update);
    }

    // ── DNS response processing ─────────────────────────────────────

    /// Merge a response into the cache and decide what the waiter (if
    /// any) must wait for before its packet may be released.
    fn on_dns_response(
        &self,
        fqdn: &str,
        new_ips: HashMap<IpAddr, Instant>,
        now: Instant,
        waiter: Option<RealizationWaiter>,
    ) {
        if new_ips.is_empty() {
            tracing::debug!(fqdn = %fqdn, "response resolved to no addresses, skipping cache update");
            if let Some(waiter) = waiter {
                let _ = waiter.send(Ok(()));
            }
            return;
        }

        let (outcome, affected_rules) = {
            let mut selectors = self.selectors.lock().unwrap_or_else(PoisonError::into_inner);
            let outcome = selectors.merge_response(fqdn, &new_ips, now);
            let affected_rules = selectors.affected_rules(fqdn);
            self.metrics
                .set_tracked_fqdn_count(selectors.tracked_fqdn_count() as u64);
            (outcome, affected_rules)
        };

        if let Some(delay) = outcome.requery_after {
            self.scheduler.schedule(fqdn.to_string(), delay);
        }
        self.sync_dirty_rules(fqdn, affected_rules, waiter, outcome.address_update);
    }

    /// Kick reconciliation for the rules affected by a DNS response.
    ///
    /// With no waiter (proactive queries) only an address update matters.
    /// With a waiter, even an unchanged address set must block on rules
    /// whose previous realization failed, so the response is never
    /// forwarded ahead of a datapath that is still wrong.
    fn sync_dirty_rules(
        &self,
        fqdn: &str,
        affected_rules: HashSet<RuleId>,
        waiter: Option<RealizationWaiter>,
        address_update: bool,
    ) {
        let Some(waiter) = waiter else {
            if address_update {
                for rule_id in &affected_rules {
                    tracing::debug!(fqdn = %fqdn, rule_id, "reconciling rule for FQDN address update");
                    self.reconciler.mark_rule_dirty(rule_id);
                }
            }
            return;
        };

        let dirty_rules = if address_update {
            affected_rules
        } else {
            let tracked = self.tracker.snapshot_dirty();
            affected_rules
                .into_iter()
                .filter(|rule_id| tracked.contains(rule_id))
                .collect()
        };

        if dirty_rules.is_empty() {
            tracing::debug!(fqdn = %fqdn, "rules already synced for this FQDN");
            let _ = waiter.send(Ok(()));
            return;
        }
        tracing::debug!(fqdn = %fqdn, ?dirty_rules, "dirty rules blocking packet release");
        // Subscribe first: the rules are marked dirty before the
        // reconciler can possibly report them realized.
        self.tracker.subscribe(waiter, &dirty_rules);
        for rule_id in &dirty_rules {
            self.reconciler.mark_rule_dirty(rule_id);
        }
    }

    // ── Packet interception ─────────────────────────────────────────

    /// Process one paused DNS response.
    ///
    /// This is the safety barrier: the packet is resumed only after
    /// every datapath rule governing the just-learned addresses is
    /// realized. On realization failure or timeout the packet is
    /// dropped and the workload retries DNS. Packets that do not parse
    /// as DNS responses are released unchanged.
    pub async fn handle_intercepted_packet(
        &self,
        packet: PausedDnsPacket,
    ) -> Result<(), FqdnError> {
        let (waiter, verdict_rx) = oneshot::channel();
        self.process_paused_frame(&packet, waiter);

        let verdict = match tokio::time::timeout(RULE_REALIZATION_TIMEOUT, verdict_rx).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(_closed)) => Err(FqdnError::Datapath(
                "realization waiter dropped without a verdict".to_string(),
            )),
            Err(_elapsed) => Err(FqdnError::RealizationTimeout {
                timeout_ms: RULE_REALIZATION_TIMEOUT.as_millis() as u64,
            }),
        };

        match verdict {
            Ok(()) => match self.datapath.resume_paused_packet(&packet) {
                Ok(()) => {
                    self.metrics.record_intercepted_packet("released");
                    tracing::debug!(cookie = packet.cookie, "resumed paused DNS response");
                    Ok(())
                }
                Err(err) => {
                    self.metrics.record_intercepted_packet("dropped");
                    tracing::warn!(
                        cookie = packet.cookie,
                        error = %err,
                        "failed to resume paused DNS response"
                    );
                    Err(err)
                }
            },
            Err(err) => {
                self.metrics.record_intercepted_packet("dropped");
                tracing::warn!(
                    cookie = packet.cookie,
                    error = %err,
                    "dropping paused DNS response"
                );
                Err(err)
            }
        }
    }

    /// Parse the paused frame and feed it into the merge path. Anything
    /// that is not a parseable DNS response completes the waiter
    /// immediately so the packet is released unchanged.
    fn process_paused_frame(&self, packet: &PausedDnsPacket, waiter: RealizationWaiter) {
        let payload = match extract_dns_payload(&packet.frame) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::debug!(
                    cookie = packet.cookie,
                    error = %err,
                    "intercepted packet is not UDP/TCP DNS, releasing"
                );
                let _ = waiter.send(Ok(()));
                return;
            }
        };

        let parsed = match payload {
            DnsTransportPayload::Udp { message } => parse_response(&message),
            DnsTransportPayload::Tcp {
                message,
                declared_len,
            } => {
                if declared_len > message.len() {
                    // First segment of a multi-segment response. The
                    // question and answer sections usually fit in it, so
                    // recover what we can.
                    tracing::info!(
                        cookie = packet.cookie,
                        declared_len,
                        captured = message.len(),
                        "segmented TCP DNS response, unpacking partially"
                    );
                    parse_response_partially(&message)
                } else {
                    parse_response(&message)
                }
            }
        };

        match parsed {
            Ok(response) => {
                let now = Instant::now();
                let new_ips = ips_with_expiration(
                    &response.answers,
                    self.options.ipv4_enabled,
                    self.options.ipv6_enabled,
                    self.options.min_ttl_secs,
                    now,
                );
                self.on_dns_response(&response.fqdn, new_ips, now, Some(waiter));
            }
            Err(err) => {
                tracing::debug!(
                    cookie = packet.cookie,
                    error = %err,
                    "unable to parse DNS message in intercepted packet, releasing"
                );
                let _ = waiter.send(Ok(()));
            }
        }
    }
}

impl QueryResultSink for FqdnPolicyService {
    fn on_resolved(&self, fqdn: &str, answers: Vec<DnsAnswer>) {
        let now = Instant::now();
        let new_ips = ips_with_expiration(
            &answers,
            self.options.ipv4_enabled,
            self.options.ipv6_enabled,
            self.options.min_ttl_secs,
            now,
        );
        self.on_dns_response(fqdn, new_ips, now, None);
    }
}

impl FqdnPolicyPort for FqdnPolicyService {
    fn add_fqdn_rule(
        &self,
        rule_id: &str,
        fqdns: &[String],
        ports: &[u32],
    ) -> Result<(), FqdnError> {
        Self::add_fqdn_rule(self, rule_id, fqdns, ports)
    }

    fn delete_fqdn_rule(&self, rule_id: &str, fqdns: &[String]) -> Result<(), FqdnError> {
        Self::delete_fqdn_rule(self, rule_id, fqdns)
    }

    fn ips_for_selectors(&self, fqdns: &[String]) -> Vec<IpAddr> {
        Self::ips_for_selectors(self, fqdns)
    }

    fn notify_rule_realization(&self, update: RuleRealizationUpdate) {
        Self::notify_rule_realization(self, update);
    }

    fn handle_intercepted_packet<'a>(
        &'a self,
        packet: PausedDnsPacket,
    ) -> Pin<Box<dyn Future<Output = Result<(), FqdnError>> + Send + 'a>> {
        Box::pin(Self::handle_intercepted_packet(self, packet))
    }
}

fn port_union(rule_ports: &HashMap<RuleId, HashSet<u32>>) -> HashSet<u32> {
    rule_ports.values().flatten().copied().collect()
}

fn sorted(mut ports: Vec<u32>) -> Vec<u32> {
    ports.sort_unstable();
    ports
}

// ── Tests ───────────────────────────────────────────────────────────
