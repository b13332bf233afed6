use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

use domain::dns::entity::{DnsAnswer, DnsRcode, RecordKind};
use domain::dns::error::DnsError;
use domain::dns::parser::parse_response;
use domain::dns::query::encode_query;
use ports::secondary::upstream_resolver_port::UpstreamResolverPort;
use tokio::net::UdpSocket;

/// Synthetic TTL for host-resolver answers, which carry no per-record
/// TTL of their own.
const HOST_RESOLVER_TTL_SECS: u32 = 600;

/// Maximum UDP response size we accept.
const MAX_RESPONSE_SIZE: usize = 4096;

/// Process-wide DNS transaction id counter. Uniqueness within the
/// in-flight window is all that matters here; queries go to the trusted
/// cluster DNS service over a connected socket.
static NEXT_TRANSACTION_ID: AtomicU16 = AtomicU16::new(1);

fn next_transaction_id() -> u16 {
    NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Build the resolver for the agent's environment: direct queries to
/// the cluster DNS service when its address is known, host resolver
/// fallback otherwise.
pub fn upstream_resolver(server_addr: Option<String>) -> Arc<dyn UpstreamResolverPort> {
    match server_addr {
        Some(addr) => {
            tracing::info!(dns_server = %addr, "using cluster DNS service for FQDN queries");
            Arc::new(UpstreamDnsClient::new(addr))
        }
        None => {
            tracing::info!(
                "no cluster DNS server available, falling back to the host resolver \
                 (per-record TTLs are approximated)"
            );
            Arc::new(SystemResolverClient::default())
        }
    }
}

// ── Direct UDP client ───────────────────────────────────────────────

/// Queries a DNS server directly over UDP, so the answers (and their
/// TTLs) match what a workload querying the same server would see.
pub struct UpstreamDnsClient {
    server_addr: String,
}

impl UpstreamDnsClient {
    pub fn new(server_addr: String) -> Self {
        Self { server_addr }
    }

    async fn query(&self, fqdn: &str, kind: RecordKind) -> Result<Vec<DnsAnswer>, DnsError> {
        let transaction_id = next_transaction_id();
        let query = encode_query(transaction_id, fqdn, kind)?;

        let is_v6_server = self
            .server_addr
            .parse::<std::net::SocketAddr>()
            .is_ok_and(|addr| addr.is_ipv6());
        let bind_addr = if is_v6_server { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(&self.server_addr).await?;
        socket.send(&query).await?;

        let mut buf = [0u8; MAX_RESPONSE_SIZE];
        let received = socket.recv(&mut buf).await?;
        let response = parse_response(&buf[..received])?;

        if response.transaction_id != transaction_id {
            return Err(DnsError::TransactionIdMismatch {
                got: response.transaction_id,
                want: transaction_id,
            });
        }
        if response.rcode != DnsRcode::NoError {
            return Err(DnsError::ErrorRcode(response.rcode));
        }

        // A CNAME chain can drag answers of the other family along;
        // keep only the family that was asked for.
        Ok(response
            .answers
            .into_iter()
            .filter(|answer| family_matches(answer.ip, kind))
            .collect())
    }
}

impl UpstreamResolverPort for UpstreamDnsClient {
    fn resolve<'a>(
        &'a self,
        fqdn: &'a str,
        kind: RecordKind,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DnsAnswer>, DnsError>> + Send + 'a>> {
        Box::pin(self.query(fqdn, kind))
    }
}

// ── Host resolver fallback ──────────────────────────────────────────

/// Resolves through the host's stub resolver. Used when neither a DNS
/// server override nor the cluster DNS service environment is present.
/// The resolver API exposes no TTLs, so answers get a synthetic one.
pub struct SystemResolverClient {
    synthetic_ttl_secs: u32,
}

impl Default for SystemResolverClient {
    fn default() -> Self {
        Self {
            synthetic_ttl_secs: HOST_RESOLVER_TTL_SECS,
        }
    }
}

impl SystemResolverClient {
    async fn lookup(&self, fqdn: &str, kind: RecordKind) -> Result<Vec<DnsAnswer>, DnsError> {
        let addrs = tokio::net::lookup_host((fqdn, 0u16)).await?;
        Ok(answers_for_family(
            addrs.map(|addr| addr.ip()),
            kind,
            self.synthetic_ttl_secs,
        ))
    }
}

impl UpstreamResolverPort for SystemResolverClient {
    fn resolve<'a>(
        &'a self,
        fqdn: &'a str,
        kind: RecordKind,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DnsAnswer>, DnsError>> + Send + 'a>> {
        Box::pin(self.lookup(fqdn, kind))
    }
}

fn family_matches(ip: IpAddr, kind: RecordKind) -> bool {
    match kind {
        RecordKind::A => ip.is_ipv4(),
        RecordKind::Aaaa => ip.is_ipv6(),
    }
}

fn answers_for_family(
    ips: impl Iterator<Item = IpAddr>,
    kind: RecordKind,
    ttl_secs: u32,
) -> Vec<DnsAnswer> {
    ips.filter(|ip| family_matches(*ip, kind))
        .map(|ip| DnsAnswer { ip, ttl_secs })
        .collect()
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use domain::dns::testutil::{a_response, aaaa_record, encode_name, question, response_header};

    /// Spawn a one-shot DNS server on localhost that answers every query
    /// with `make_response(received_query_id)`.
    async fn one_shot_server<F>(make_response: F) -> String
    where
        F: FnOnce(u16) -> Vec<u8> + Send + 'static,
    {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (received, peer) = socket.recv_from(&mut buf).await.unwrap();
            assert!(received >= 12, "short query");
            let id = u16::from_be_bytes([buf[0], buf[1]]);
            socket
                .send_to(&make_response(id), peer)
                .await
                .unwrap();
        });
        addr.to_string()
    }

    #[tokio::test]
    async fn resolves_a_records_from_upstream() {
        let server = one_shot_server(|id| {
            a_response(id, "api.example.com", 60, &[[10, 0, 0, 1], [10, 0, 0, 2]])
        })
        .await;

        let client = UpstreamDnsClient::new(server);
        let answers = client.resolve("api.example.com", RecordKind::A).await.unwrap();

        assert_eq!(
            answers,
            vec![
                DnsAnswer {
                    ip: "10.0.0.1".parse().unwrap(),
                    ttl_secs: 60,
                },
                DnsAnswer {
                    ip: "10.0.0.2".parse().unwrap(),
                    ttl_secs: 60,
                },
            ]
        );
    }

    #[tokio::test]
    async fn rejects_mismatched_transaction_id() {
        let server =
            one_shot_server(|id| a_response(id.wrapping_add(1), "api.example.com", 60, &[[1, 2, 3, 4]]))
                .await;

        let client = UpstreamDnsClient::new(server);
        let err = client
            .resolve("api.example.com", RecordKind::A)
            .await
            .unwrap_err();
        assert!(matches!(err, DnsError::TransactionIdMismatch { .. }));
    }

    #[tokio::test]
    async fn error_rcode_is_reported() {
        let server = one_shot_server(|id| {
            let mut msg = response_header(id, 3, 1, 0);
            msg.extend(question("gone.example.com", 1));
            msg
        })
        .await;

        let client = UpstreamDnsClient::new(server);
        let err = client
            .resolve("gone.example.com", RecordKind::A)
            .await
            .unwrap_err();
        assert!(matches!(err, DnsError::ErrorRcode(DnsRcode::NXDomain)));
    }

    #[tokio::test]
    async fn answers_are_filtered_to_requested_family() {
        let server = one_shot_server(|id| {
            // Mixed-family answer section for an A query.
            let name = encode_name("dual.example.com");
            let mut msg = a_response(id, "dual.example.com", 60, &[[10, 0, 0, 1]]);
            msg[7] = 2; // ancount = 2
            msg.extend(aaaa_record(&name, 60, [0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]));
            msg
        })
        .await;

        let client = UpstreamDnsClient::new(server);
        let answers = client
            .resolve("dual.example.com", RecordKind::A)
            .await
            .unwrap();
        assert_eq!(answers.len(), 1);
        assert!(answers[0].ip.is_ipv4());
    }

    #[test]
    fn family_filter_assigns_synthetic_ttl() {
        let ips = vec![
            "10.0.0.1".parse::<IpAddr>().unwrap(),
            "2001:db8::1".parse::<IpAddr>().unwrap(),
            "10.0.0.2".parse::<IpAddr>().unwrap(),
        ];
        let v4 = answers_for_family(ips.iter().copied(), RecordKind::A, 600);
        assert_eq!(v4.len(), 2);
        assert!(v4.iter().all(|a| a.ip.is_ipv4() && a.ttl_secs == 600));

        let v6 = answers_for_family(ips.into_iter(), RecordKind::Aaaa, 600);
        assert_eq!(v6.len(), 1);
        assert!(v6[0].ip.is_ipv6());
    }

    #[test]
    fn transaction_ids_advance() {
        let a = next_transaction_id();
        let b = next_transaction_id();
        assert_ne!(a, b);
    }
}
