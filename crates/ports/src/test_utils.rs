use crate::secondary::metrics_port::{InterceptionMetrics, ResolutionMetrics};

/// No-op implementation of all metrics sub-traits for use in tests.
///
/// All methods inherit the default no-op implementations from the sub-traits.
pub struct NoopMetrics;

impl InterceptionMetrics for NoopMetrics {}
impl ResolutionMetrics for NoopMetrics {}
