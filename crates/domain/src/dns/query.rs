use super::entity::RecordKind;
use super::error::DnsError;
use super::parser::DNS_HEADER_LEN;

/// Maximum label length per RFC 1035.
const MAX_LABEL_LEN: usize = 63;
/// Maximum domain name length per RFC 1035.
const MAX_NAME_LEN: usize = 253;

/// Recursion Desired flag.
const FLAG_RD: u16 = 0x0100;

/// Encode a single-question DNS query for `fqdn`.
///
/// The name is lowercased; a trailing dot is accepted and ignored.
/// Recursion is requested, matching what the workload's own resolver
/// would send to the cluster DNS service.
pub fn encode_query(id: u16, fqdn: &str, kind: RecordKind) -> Result<Vec<u8>, DnsError> {
    let name = fqdn.trim().trim_end_matches('.').to_lowercase();
    if name.is_empty() {
        return Err(DnsError::InvalidQueryName {
            name: fqdn.to_string(),
            reason: "empty name".to_string(),
        });
    }
    if name.len() > MAX_NAME_LEN {
        return Err(DnsError::InvalidQueryName {
            name,
            reason: format!("name longer than {MAX_NAME_LEN} bytes"),
        });
    }

    let mut buf = Vec::with_capacity(DNS_HEADER_LEN + name.len() + 6);
    buf.extend_from_slice(&id.to_be_bytes());
    buf.extend_from_slice(&FLAG_RD.to_be_bytes());
    buf.extend_from_slice(&1u16.to_be_bytes()); // qdcount
    buf.extend_from_slice(&0u16.to_be_bytes()); // ancount
    buf.extend_from_slice(&0u16.to_be_bytes()); // nscount
    buf.extend_from_slice(&0u16.to_be_bytes()); // arcount

    for label in name.split('.') {
        if label.is_empty() {
            return Err(DnsError::InvalidQueryName {
                name: name.clone(),
                reason: "empty label".to_string(),
            });
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(DnsError::InvalidQueryName {
                name: name.clone(),
                reason: format!("label '{label}' longer than {MAX_LABEL_LEN} bytes"),
            });
        }
        buf.push(label.len() as u8);
        buf.extend_from_slice(label.as_bytes());
    }
    buf.push(0);
    buf.extend_from_slice(&kind.wire_type().to_be_bytes());
    buf.extend_from_slice(&1u16.to_be_bytes()); // class IN

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_a_query() {
        let msg = encode_query(0xBEEF, "api.example.com", RecordKind::A).unwrap();

        assert_eq!(&msg[0..2], &0xBEEFu16.to_be_bytes());
        // RD set, QR clear.
        assert_eq!(&msg[2..4], &[0x01, 0x00]);
        // One question, nothing else.
        assert_eq!(&msg[4..6], &[0, 1]);
        assert_eq!(&msg[6..12], &[0u8; 6]);

        let mut expected = Vec::new();
        expected.extend_from_slice(&[3]);
        expected.extend_from_slice(b"api");
        expected.extend_from_slice(&[7]);
        expected.extend_from_slice(b"example");
        expected.extend_from_slice(&[3]);
        expected.extend_from_slice(b"com");
        expected.push(0);
        expected.extend_from_slice(&1u16.to_be_bytes());
        expected.extend_from_slice(&1u16.to_be_bytes());
        assert_eq!(&msg[12..], &expected[..]);
    }

    #[test]
    fn encodes_aaaa_query() {
        let msg = encode_query(1, "v6.example.com", RecordKind::Aaaa).unwrap();
        let qtype = u16::from_be_bytes([msg[msg.len() - 4], msg[msg.len() - 3]]);
        assert_eq!(qtype, 28);
    }

    #[test]
    fn lowercases_and_strips_trailing_dot() {
        let a = encode_query(7, "API.Example.COM.", RecordKind::A).unwrap();
        let b = encode_query(7, "api.example.com", RecordKind::A).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_empty_name() {
        assert!(encode_query(1, "", RecordKind::A).is_err());
        assert!(encode_query(1, ".", RecordKind::A).is_err());
    }

    #[test]
    fn rejects_empty_label() {
        assert!(encode_query(1, "a..b", RecordKind::A).is_err());
    }

    #[test]
    fn rejects_oversized_label() {
        let name = format!("{}.com", "a".repeat(64));
        assert!(matches!(
            encode_query(1, &name, RecordKind::A).unwrap_err(),
            DnsError::InvalidQueryName { .. }
        ));
    }

    #[test]
    fn query_parses_back_as_name() {
        // The encoded question section must round-trip through the name
        // parser used on the response path.
        let msg = encode_query(42, "Svc.Cluster.Local", RecordKind::A).unwrap();
        // Splice the question into a response-shaped message.
        let mut resp = crate::dns::testutil::response_header(42, 0, 1, 0);
        resp.extend_from_slice(&msg[12..]);
        let parsed = crate::dns::parser::parse_response(&resp).unwrap();
        assert_eq!(parsed.fqdn, "svc.cluster.local");
    }
}
