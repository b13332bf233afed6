use super::entity::DnsTransportPayload;
use super::error::PacketParseError;

// ── Constants ───────────────────────────────────────────────────────

const ETHERNET_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const ETHERTYPE_VLAN: u16 = 0x8100;

const IPV6_HEADER_LEN: usize = 40;
const UDP_HEADER_LEN: usize = 8;

const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;

// ── Public API ──────────────────────────────────────────────────────

/// Strip the L2/L3/L4 framing off an intercepted packet and return the
/// raw DNS message bytes.
///
/// Handles IPv4 and IPv6 over plain or single-VLAN-tagged Ethernet, with
/// UDP or TCP transport. Trailing Ethernet padding is trimmed using the
/// IP length fields. Non-initial IP fragments and anything that is not
/// UDP/TCP over IP is rejected (the caller releases those packets).
pub fn extract_dns_payload(frame: &[u8]) -> Result<DnsTransportPayload, PacketParseError> {
    if frame.len() < ETHERNET_HEADER_LEN {
        return Err(PacketParseError::Truncated {
            need: ETHERNET_HEADER_LEN,
            got: frame.len(),
        });
    }

    let mut ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    let mut l3_offset = ETHERNET_HEADER_LEN;
    if ethertype == ETHERTYPE_VLAN {
        if frame.len() < ETHERNET_HEADER_LEN + VLAN_TAG_LEN {
            return Err(PacketParseError::Truncated {
                need: ETHERNET_HEADER_LEN + VLAN_TAG_LEN,
                got: frame.len(),
            });
        }
        ethertype = u16::from_be_bytes([frame[16], frame[17]]);
        l3_offset += VLAN_TAG_LEN;
    }

    let (protocol, l4) = match ethertype {
        ETHERTYPE_IPV4 => parse_ipv4(&frame[l3_offset..])?,
        ETHERTYPE_IPV6 => parse_ipv6(&frame[l3_offset..])?,
        other => return Err(PacketParseError::UnsupportedEtherType(other)),
    };

    match protocol {
        IPPROTO_UDP => parse_udp(l4),
        IPPROTO_TCP => parse_tcp(l4),
        other => Err(PacketParseError::UnsupportedProtocol(other)),
    }
}

// ── L3 ──────────────────────────────────────────────────────────────

/// Returns the L4 protocol number and the L4 bytes, trimmed to the IPv4
/// total length so Ethernet padding does not leak into the payload.
fn parse_ipv4(packet: &[u8]) -> Result<(u8, &[u8]), PacketParseError> {
    if packet.len() < 20 {
        return Err(PacketParseError::Truncated {
            need: 20,
            got: packet.len(),
        });
    }
    let version = packet[0] >> 4;
    if version != 4 {
        return Err(PacketParseError::InvalidIpHeader(format!(
            "version {version} in IPv4 packet"
        )));
    }
    let header_len = usize::from(packet[0] & 0x0F) * 4;
    if header_len < 20 {
        return Err(PacketParseError::InvalidIpHeader(format!(
            "header length {header_len}"
        )));
    }
    let total_len = usize::from(u16::from_be_bytes([packet[2], packet[3]]));
    if total_len < header_len || total_len > packet.len() {
        return Err(PacketParseError::InvalidIpHeader(format!(
            "total length {total_len} (captured {})",
            packet.len()
        )));
    }
    // Reassembly is out of reach here; only the first fragment can carry
    // a parseable DNS header.
    let frag_offset = u16::from_be_bytes([packet[6], packet[7]]) & 0x1FFF;
    if frag_offset != 0 {
        return Err(PacketParseError::IpFragment);
    }
    Ok((packet[9], &packet[header_len..total_len]))
}

fn parse_ipv6(packet: &[u8]) -> Result<(u8, &[u8]), PacketParseError> {
    if packet.len() < IPV6_HEADER_LEN {
        return Err(PacketParseError::Truncated {
            need: IPV6_HEADER_LEN,
            got: packet.len(),
        });
    }
    let version = packet[0] >> 4;
    if version != 6 {
        return Err(PacketParseError::InvalidIpHeader(format!(
            "version {version} in IPv6 packet"
        )));
    }
    let payload_len = usize::from(u16::from_be_bytes([packet[4], packet[5]]));
    let end = IPV6_HEADER_LEN + payload_len;
    if end > packet.len() {
        return Err(PacketParseError::Truncated {
            need: end,
            got: packet.len(),
        });
    }
    // Extension headers (including fragments) are not walked; a DNS
    // response from the cluster DNS service does not carry them.
    Ok((packet[6], &packet[IPV6_HEADER_LEN..end]))
}

// ── L4 ──────────────────────────────────────────────────────────────

fn parse_udp(segment: &[u8]) -> Result<DnsTransportPayload, PacketParseError> {
    if segment.len() < UDP_HEADER_LEN {
        return Err(PacketParseError::Truncated {
            need: UDP_HEADER_LEN,
            got: segment.len(),
        });
    }
    let udp_len = usize::from(u16::from_be_bytes([segment[4], segment[5]]));
    let end = if udp_len >= UDP_HEADER_LEN && udp_len <= segment.len() {
        udp_len
    } else {
        segment.len()
    };
    Ok(DnsTransportPayload::Udp {
        message: segment[UDP_HEADER_LEN..end].to_vec(),
    })
}

fn parse_tcp(segment: &[u8]) -> Result<DnsTransportPayload, PacketParseError> {
    if segment.len() < 20 {
        return Err(PacketParseError::Truncated {
            need: 20,
            got: segment.len(),
        });
    }
    let data_offset = usize::from(segment[12] >> 4) * 4;
    if data_offset < 20 || data_offset > segment.len() {
        return Err(PacketParseError::InvalidTcpHeader(format!(
            "data offset {data_offset}"
        )));
    }
    let payload = &segment[data_offset..];
    // RFC 1035 4.2.2: two-byte length prefix before the message.
    if payload.len() < 2 {
        return Err(PacketParseError::MissingDnsLength(payload.len()));
    }
    let declared_len = usize::from(u16::from_be_bytes([payload[0], payload[1]]));
    Ok(DnsTransportPayload::Tcp {
        message: payload[2..].to_vec(),
        declared_len,
    })
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::testutil::{
        ipv4_frame, ipv6_frame, tcp_segment, udp_datagram, vlan_ipv4_frame,
    };

    const DNS_BYTES: &[u8] = b"\x12\x34dns-message-bytes";

    #[test]
    fn udp_over_ipv4() {
        let frame = ipv4_frame(IPPROTO_UDP, &udp_datagram(53, 40000, DNS_BYTES));
        let payload = extract_dns_payload(&frame).unwrap();
        assert_eq!(
            payload,
            DnsTransportPayload::Udp {
                message: DNS_BYTES.to_vec()
            }
        );
    }

    #[test]
    fn udp_over_ipv6() {
        let frame = ipv6_frame(IPPROTO_UDP, &udp_datagram(53, 40000, DNS_BYTES));
        let payload = extract_dns_payload(&frame).unwrap();
        assert_eq!(
            payload,
            DnsTransportPayload::Udp {
                message: DNS_BYTES.to_vec()
            }
        );
    }

    #[test]
    fn udp_over_vlan_tagged_ipv4() {
        let frame = vlan_ipv4_frame(IPPROTO_UDP, &udp_datagram(53, 40000, DNS_BYTES));
        let payload = extract_dns_payload(&frame).unwrap();
        assert_eq!(
            payload,
            DnsTransportPayload::Udp {
                message: DNS_BYTES.to_vec()
            }
        );
    }

    #[test]
    fn ethernet_padding_is_trimmed() {
        let mut frame = ipv4_frame(IPPROTO_UDP, &udp_datagram(53, 40000, b"\x00\x01ab"));
        // Pad to the 60-byte Ethernet minimum.
        while frame.len() < 60 {
            frame.push(0);
        }
        let payload = extract_dns_payload(&frame).unwrap();
        assert_eq!(
            payload,
            DnsTransportPayload::Udp {
                message: b"\x00\x01ab".to_vec()
            }
        );
    }

    #[test]
    fn tcp_with_length_prefix() {
        let mut tcp_payload = Vec::new();
        tcp_payload.extend_from_slice(&(DNS_BYTES.len() as u16).to_be_bytes());
        tcp_payload.extend_from_slice(DNS_BYTES);
        let frame = ipv4_frame(IPPROTO_TCP, &tcp_segment(53, 40000, &tcp_payload));

        let payload = extract_dns_payload(&frame).unwrap();
        assert_eq!(
            payload,
            DnsTransportPayload::Tcp {
                message: DNS_BYTES.to_vec(),
                declared_len: DNS_BYTES.len(),
            }
        );
    }

    #[test]
    fn tcp_first_segment_reports_declared_length() {
        // Length field says 1000 bytes but only 10 were captured.
        let mut tcp_payload = Vec::new();
        tcp_payload.extend_from_slice(&1000u16.to_be_bytes());
        tcp_payload.extend_from_slice(&[0xAB; 10]);
        let frame = ipv4_frame(IPPROTO_TCP, &tcp_segment(53, 40000, &tcp_payload));

        match extract_dns_payload(&frame).unwrap() {
            DnsTransportPayload::Tcp {
                message,
                declared_len,
            } => {
                assert_eq!(declared_len, 1000);
                assert_eq!(message.len(), 10);
            }
            DnsTransportPayload::Udp { .. } => panic!("expected TCP payload"),
        }
    }

    #[test]
    fn tcp_ack_without_data_is_rejected() {
        let frame = ipv4_frame(IPPROTO_TCP, &tcp_segment(53, 40000, &[]));
        assert!(matches!(
            extract_dns_payload(&frame).unwrap_err(),
            PacketParseError::MissingDnsLength(0)
        ));
    }

    #[test]
    fn non_ip_ethertype_is_rejected() {
        let mut frame = vec![0u8; 14];
        frame[12] = 0x08;
        frame[13] = 0x06; // ARP
        assert!(matches!(
            extract_dns_payload(&frame).unwrap_err(),
            PacketParseError::UnsupportedEtherType(0x0806)
        ));
    }

    #[test]
    fn non_udp_tcp_protocol_is_rejected() {
        let frame = ipv4_frame(1, &[0u8; 8]); // ICMP
        assert!(matches!(
            extract_dns_payload(&frame).unwrap_err(),
            PacketParseError::UnsupportedProtocol(1)
        ));
    }

    #[test]
    fn non_initial_fragment_is_rejected() {
        let mut frame = ipv4_frame(IPPROTO_UDP, &udp_datagram(53, 40000, DNS_BYTES));
        // Set a non-zero fragment offset in the IPv4 header.
        frame[14 + 6] = 0x00;
        frame[14 + 7] = 0x10;
        assert!(matches!(
            extract_dns_payload(&frame).unwrap_err(),
            PacketParseError::IpFragment
        ));
    }

    #[test]
    fn short_frame_is_rejected() {
        assert!(matches!(
            extract_dns_payload(&[0u8; 9]).unwrap_err(),
            PacketParseError::Truncated { need: 14, got: 9 }
        ));
    }
}
