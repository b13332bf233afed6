use ports::secondary::metrics_port::{InterceptionMetrics, ResolutionMetrics};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

// ── Label types ─────────────────────────────────────────────────────

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct VerdictLabels {
    pub verdict: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct QueryLabels {
    pub family: String,
    pub result: String,
}

// ── Controller metrics registry ─────────────────────────────────────

/// Prometheus metrics for the FQDN policy controller.
///
/// All metric families use interior mutability (atomics), so recording
/// metrics only requires `&self`. The registry itself is NOT Clone —
/// wrap in `Arc` for multi-task sharing.
pub struct ControllerMetrics {
    registry: Registry,
    intercepted_packets_total: Family<VerdictLabels, Counter>,
    dns_queries_total: Family<QueryLabels, Counter>,
    dirty_rules: Gauge,
    tracked_fqdns: Gauge,
}

impl ControllerMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("fqdn");

        let intercepted_packets_total = Family::<VerdictLabels, Counter>::default();
        registry.register(
            "intercepted_packets",
            "DNS responses processed by the interception pipeline, by verdict",
            intercepted_packets_total.clone(),
        );

        let dns_queries_total = Family::<QueryLabels, Counter>::default();
        registry.register(
            "dns_queries",
            "Proactive DNS queries, by address family and result",
            dns_queries_total.clone(),
        );

        let dirty_rules = Gauge::default();
        registry.register(
            "dirty_rules",
            "Rules currently awaiting datapath realization",
            dirty_rules.clone(),
        );

        let tracked_fqdns = Gauge::default();
        registry.register(
            "tracked_fqdns",
            "FQDNs currently tracked in the DNS cache",
            tracked_fqdns.clone(),
        );

        Self {
            registry,
            intercepted_packets_total,
            dns_queries_total,
            dirty_rules,
            tracked_fqdns,
        }
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let mut output = String::new();
        // Encoding only fails on a failing `fmt::Write`, which String is not.
        let _ = encode(&mut output, &self.registry);
        output
    }
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl InterceptionMetrics for ControllerMetrics {
    fn record_intercepted_packet(&self, verdict: &str) {
        self.intercepted_packets_total
            .get_or_create(&VerdictLabels {
                verdict: verdict.to_string(),
            })
            .inc();
    }

    fn set_dirty_rule_count(&self, count: u64) {
        self.dirty_rules.set(i64::try_from(count).unwrap_or(i64::MAX));
    }
}

impl ResolutionMetrics for ControllerMetrics {
    fn record_dns_query(&self, family: &str, result: &str) {
        self.dns_queries_total
            .get_or_create(&QueryLabels {
                family: family.to_string(),
                result: result.to_string(),
            })
            .inc();
    }

    fn set_tracked_fqdn_count(&self, count: u64) {
        self.tracked_fqdns
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }
}
