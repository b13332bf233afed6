//! Frame builders for interception tests, shared by tests across crates.

/// Build a UDP datagram with the given ports and payload.
pub fn udp_datagram(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + payload.len());
    buf.extend_from_slice(&src_port.to_be_bytes());
    buf.extend_from_slice(&dst_port.to_be_bytes());
    buf.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes()); // checksum (unverified)
    buf.extend_from_slice(payload);
    buf
}

/// Build a minimal TCP segment (20-byte header, no options).
pub fn tcp_segment(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(20 + payload.len());
    buf.extend_from_slice(&src_port.to_be_bytes());
    buf.extend_from_slice(&dst_port.to_be_bytes());
    buf.extend_from_slice(&1u32.to_be_bytes()); // seq
    buf.extend_from_slice(&1u32.to_be_bytes()); // ack
    buf.push(5 << 4); // data offset = 5 words
    buf.push(0x18); // PSH|ACK
    buf.extend_from_slice(&0xFFFFu16.to_be_bytes()); // window
    buf.extend_from_slice(&0u16.to_be_bytes()); // checksum
    buf.extend_from_slice(&0u16.to_be_bytes()); // urgent pointer
    buf.extend_from_slice(payload);
    buf
}

fn ipv4_packet(protocol: u8, l4: &[u8]) -> Vec<u8> {
    let total_len = 20 + l4.len();
    let mut buf = Vec::with_capacity(total_len);
    buf.push(0x45); // version 4, IHL 5
    buf.push(0);
    buf.extend_from_slice(&(total_len as u16).to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes()); // identification
    buf.extend_from_slice(&0u16.to_be_bytes()); // flags + fragment offset
    buf.push(64); // TTL
    buf.push(protocol);
    buf.extend_from_slice(&0u16.to_be_bytes()); // checksum
    buf.extend_from_slice(&[10, 96, 0, 10]); // src
    buf.extend_from_slice(&[10, 96, 1, 5]); // dst
    buf.extend_from_slice(l4);
    buf
}

fn ipv6_packet(next_header: u8, l4: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(40 + l4.len());
    buf.push(0x60);
    buf.extend_from_slice(&[0, 0, 0]);
    buf.extend_from_slice(&(l4.len() as u16).to_be_bytes());
    buf.push(next_header);
    buf.push(64); // hop limit
    buf.extend_from_slice(&[0xFD; 16]); // src
    buf.extend_from_slice(&[0xFE; 16]); // dst
    buf.extend_from_slice(l4);
    buf
}

fn ethernet(ethertype: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(14 + payload.len());
    buf.extend_from_slice(&[0x02, 0, 0, 0, 0, 1]); // dst MAC
    buf.extend_from_slice(&[0x02, 0, 0, 0, 0, 2]); // src MAC
    buf.extend_from_slice(&ethertype.to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Build an IPv4 Ethernet frame carrying the given L4 segment.
pub fn ipv4_frame(protocol: u8, l4: &[u8]) -> Vec<u8> {
    ethernet(0x0800, &ipv4_packet(protocol, l4))
}

/// Build an IPv6 Ethernet frame carrying the given L4 segment.
pub fn ipv6_frame(next_header: u8, l4: &[u8]) -> Vec<u8> {
    ethernet(0x86DD, &ipv6_packet(next_header, l4))
}

/// Build an 802.1Q-tagged IPv4 frame.
pub fn vlan_ipv4_frame(protocol: u8, l4: &[u8]) -> Vec<u8> {
    let inner = ipv4_packet(protocol, l4);
    let mut buf = Vec::with_capacity(18 + inner.len());
    buf.extend_from_slice(&[0x02, 0, 0, 0, 0, 1]);
    buf.extend_from_slice(&[0x02, 0, 0, 0, 0, 2]);
    buf.extend_from_slice(&0x8100u16.to_be_bytes());
    buf.extend_from_slice(&100u16.to_be_bytes()); // VLAN ID 100
    buf.extend_from_slice(&0x0800u16.to_be_bytes());
    buf.extend_from_slice(&inner);
    buf
}

/// Build a complete UDP/IPv4 frame carrying a DNS message from port 53.
pub fn dns_udp_frame(message: &[u8]) -> Vec<u8> {
    ipv4_frame(17, &udp_datagram(53, 41000, message))
}

/// Build a complete TCP/IPv4 frame carrying a DNS message from port 53,
/// with the two-byte length prefix set to `declared_len`.
pub fn dns_tcp_frame(message: &[u8], declared_len: u16) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + message.len());
    payload.extend_from_slice(&declared_len.to_be_bytes());
    payload.extend_from_slice(message);
    ipv4_frame(6, &tcp_segment(53, 41000, &payload))
}
