use std::future::Future;
use std::pin::Pin;

use domain::dns::entity::{DnsAnswer, RecordKind};
use domain::dns::error::DnsError;

/// Secondary port for proactive DNS resolution.
///
/// Implementations query the cluster DNS service directly (so answers
/// match what workloads will see) or fall back to the host resolver with
/// a synthetic TTL. Uses `Pin<Box<dyn Future>>` return type (instead of
/// RPITIT) so the trait is dyn-compatible and can be used as
/// `Arc<dyn UpstreamResolverPort>`.
pub trait UpstreamResolverPort: Send + Sync {
    /// Resolve one record family for `fqdn`, returning address answers
    /// with their record TTLs. An error rcode (NXDOMAIN, SERVFAIL, ...)
    /// is reported as an error so the scheduler backs off.
    fn resolve<'a>(
        &'a self,
        fqdn: &'a str,
        kind: RecordKind,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DnsAnswer>, DnsError>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyResolver;
    impl UpstreamResolverPort for DummyResolver {
        fn resolve<'a>(
            &'a self,
            _fqdn: &'a str,
            _kind: RecordKind,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<DnsAnswer>, DnsError>> + Send + 'a>> {
            Box::pin(async { Ok(vec![]) })
        }
    }

    #[test]
    fn resolver_port_is_dyn_compatible() {
        let port: Box<dyn UpstreamResolverPort> = Box::new(DummyResolver);
        let _ = port;
    }
}
