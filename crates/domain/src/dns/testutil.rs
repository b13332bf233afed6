//! Wire-format builders for DNS messages, shared by tests across crates.

/// Build a DNS response header with the given counts.
pub fn response_header(id: u16, rcode: u8, qdcount: u16, ancount: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12);
    buf.extend_from_slice(&id.to_be_bytes());
    let flags: u16 = (1 << 15) | u16::from(rcode & 0x0F);
    buf.extend_from_slice(&flags.to_be_bytes());
    buf.extend_from_slice(&qdcount.to_be_bytes());
    buf.extend_from_slice(&ancount.to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes()); // nscount
    buf.extend_from_slice(&0u16.to_be_bytes()); // arcount
    buf
}

/// Encode a domain name as DNS wire-format labels.
pub fn encode_name(domain: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    for label in domain.split('.') {
        buf.push(label.len() as u8);
        buf.extend_from_slice(label.as_bytes());
    }
    buf.push(0);
    buf
}

/// Build a question section entry (name + qtype + qclass IN).
pub fn question(domain: &str, qtype: u16) -> Vec<u8> {
    let mut buf = encode_name(domain);
    buf.extend_from_slice(&qtype.to_be_bytes());
    buf.extend_from_slice(&1u16.to_be_bytes());
    buf
}

fn record(name: &[u8], rtype: u16, ttl: u32, rdata: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(name);
    buf.extend_from_slice(&rtype.to_be_bytes());
    buf.extend_from_slice(&1u16.to_be_bytes()); // class IN
    buf.extend_from_slice(&ttl.to_be_bytes());
    buf.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
    buf.extend_from_slice(rdata);
    buf
}

/// Build an A resource record.
pub fn a_record(name: &[u8], ttl: u32, ip: [u8; 4]) -> Vec<u8> {
    record(name, 1, ttl, &ip)
}

/// Build an AAAA resource record.
pub fn aaaa_record(name: &[u8], ttl: u32, ip: [u8; 16]) -> Vec<u8> {
    record(name, 28, ttl, &ip)
}

/// Build a CNAME resource record.
pub fn cname_record(name: &[u8], ttl: u32, target: &[u8]) -> Vec<u8> {
    record(name, 5, ttl, target)
}

/// Build a complete response for one name with the given A answers.
pub fn a_response(id: u16, fqdn: &str, ttl: u32, ips: &[[u8; 4]]) -> Vec<u8> {
    let name = encode_name(fqdn);
    let mut msg = response_header(id, 0, 1, ips.len() as u16);
    msg.extend(question(fqdn, 1));
    for ip in ips {
        msg.extend(a_record(&name, ttl, *ip));
    }
    msg
}
