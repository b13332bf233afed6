// Focused sub-traits for recording Prometheus metrics.
//
// All methods take `&self` because the underlying implementation uses
// atomic operations (interior mutability via `prometheus-client`).
//
// Default implementations are no-ops, allowing test mocks to implement
// only the sub-traits relevant to the service under test.

// ── DNS response interception metrics ──────────────────────────────

pub trait InterceptionMetrics: Send + Sync {
    /// Record the verdict for one intercepted packet
    /// (`released` or `dropped`).
    fn record_intercepted_packet(&self, _verdict: &str) {}

    /// Set the number of rules currently awaiting realization.
    fn set_dirty_rule_count(&self, _count: u64) {}
}

// ── Proactive resolution metrics ───────────────────────────────────

pub trait ResolutionMetrics: Send + Sync {
    /// Record a proactive DNS query with family (`ipv4`/`ipv6`) and
    /// result (`ok`/`error`) labels.
    fn record_dns_query(&self, _family: &str, _result: &str) {}

    /// Set the number of FQDNs currently tracked in the cache.
    fn set_tracked_fqdn_count(&self, _count: u64) {}
}

/// Umbrella trait for components that record across groups.
pub trait MetricsPort: InterceptionMetrics + ResolutionMetrics {}

impl<T: InterceptionMetrics + ResolutionMetrics> MetricsPort for T {}
