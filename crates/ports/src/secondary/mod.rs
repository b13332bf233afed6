pub mod datapath_port;
pub mod metrics_port;
pub mod rule_reconciler_port;
pub mod upstream_resolver_port;
