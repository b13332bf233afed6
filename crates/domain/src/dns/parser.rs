use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use super::entity::{DnsAnswer, DnsRcode, ParsedDnsResponse};
use super::error::DnsError;

// ── Constants ───────────────────────────────────────────────────────

/// DNS header is always 12 bytes.
pub(crate) const DNS_HEADER_LEN: usize = 12;
/// Maximum label length per RFC 1035.
const MAX_LABEL_LEN: usize = 63;
/// Maximum domain name length per RFC 1035.
const MAX_NAME_LEN: usize = 253;
/// Maximum pointer hops to prevent infinite loops.
const MAX_POINTER_HOPS: usize = 10;
/// Maximum question entries we'll parse per message.
const MAX_QUESTIONS: u16 = 10;
/// Maximum answer records we'll parse per response.
const MAX_ANSWERS: u16 = 64;

// ── Public API ──────────────────────────────────────────────────────

/// Parse a raw DNS response message.
///
/// The first question name becomes the response FQDN (lowercased, no
/// trailing dot). Only A and AAAA answers are collected; other record
/// types are skipped. Messages without a question section are rejected.
pub fn parse_response(payload: &[u8]) -> Result<ParsedDnsResponse, DnsError> {
    parse_with_mode(payload, ParseMode::Strict)
}

/// Parse a DNS response whose answer section may be cut short.
///
/// Used for the first segment of a TCP response whose length field
/// announces more bytes than were captured. The header and question
/// section must still parse; answer records are collected until the
/// payload runs out, and the partial tail is discarded silently.
pub fn parse_response_partially(payload: &[u8]) -> Result<ParsedDnsResponse, DnsError> {
    parse_with_mode(payload, ParseMode::Partial)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ParseMode {
    Strict,
    Partial,
}

fn parse_with_mode(payload: &[u8], mode: ParseMode) -> Result<ParsedDnsResponse, DnsError> {
    if payload.len() < DNS_HEADER_LEN {
        return Err(DnsError::Truncated {
            need: DNS_HEADER_LEN,
            got: payload.len(),
        });
    }

    let transaction_id = u16::from_be_bytes([payload[0], payload[1]]);
    let flags = u16::from_be_bytes([payload[2], payload[3]]);
    let rcode = DnsRcode::from_wire((flags & 0x000F) as u8);
    let qdcount = u16::from_be_bytes([payload[4], payload[5]]);
    let ancount = u16::from_be_bytes([payload[6], payload[7]]);

    if qdcount == 0 {
        return Err(DnsError::Malformed("no question section".to_string()));
    }
    if qdcount > MAX_QUESTIONS {
        return Err(DnsError::TooManyRecords {
            count: qdcount,
            max: MAX_QUESTIONS,
        });
    }
    if mode == ParseMode::Strict && ancount > MAX_ANSWERS {
        return Err(DnsError::TooManyRecords {
            count: ancount,
            max: MAX_ANSWERS,
        });
    }

    // Question section. Only the first name is kept; the rest is walked
    // to find where the answer section starts.
    let mut offset = DNS_HEADER_LEN;
    let mut fqdn = String::new();
    for i in 0..qdcount {
        let (name, after_name) = parse_name(payload, offset)?;
        // qtype (2) + qclass (2)
        offset = checked_advance(payload, after_name, 4)?;
        if i == 0 {
            fqdn = name;
        }
    }

    let mut answers = Vec::new();
    for _ in 0..ancount.min(MAX_ANSWERS) {
        match parse_answer(payload, offset) {
            Ok((answer, next_offset)) => {
                offset = next_offset;
                if let Some(answer) = answer {
                    answers.push(answer);
                }
            }
            Err(err) => {
                if mode == ParseMode::Strict {
                    return Err(err);
                }
                // Partial mode: the record straddles the captured bytes.
                break;
            }
        }
    }

    Ok(ParsedDnsResponse {
        transaction_id,
        rcode,
        fqdn,
        answers,
    })
}

// ── Answer parsing ──────────────────────────────────────────────────

/// Parse one resource record. Returns the extracted address answer
/// (None for record types that carry no address) and the offset of the
/// next record.
fn parse_answer(payload: &[u8], offset: usize) -> Result<(Option<DnsAnswer>, usize), DnsError> {
    let (_, offset) = parse_name(payload, offset)?;

    // type (2) + class (2) + ttl (4) + rdlength (2)
    if offset + 10 > payload.len() {
        return Err(DnsError::Truncated {
            need: offset + 10,
            got: payload.len(),
        });
    }
    let rtype = u16::from_be_bytes([payload[offset], payload[offset + 1]]);
    let ttl_secs = u32::from_be_bytes([
        payload[offset + 4],
        payload[offset + 5],
        payload[offset + 6],
        payload[offset + 7],
    ]);
    let rdlength = u16::from_be_bytes([payload[offset + 8], payload[offset + 9]]) as usize;
    let rdata = offset + 10;
    let next_offset = checked_advance(payload, rdata, rdlength)?;

    let ip = match (rtype, rdlength) {
        (1, 4) => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&payload[rdata..rdata + 4]);
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        (28, 16) => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&payload[rdata..rdata + 16]);
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        // CNAME, TXT, OPT, and anything else carries no enforceable address.
        _ => None,
    };

    Ok((ip.map(|ip| DnsAnswer { ip, ttl_secs }), next_offset))
}

fn checked_advance(payload: &[u8], offset: usize, len: usize) -> Result<usize, DnsError> {
    let end = offset
        .checked_add(len)
        .ok_or_else(|| DnsError::Malformed("record length overflow".to_string()))?;
    if end > payload.len() {
        return Err(DnsError::Truncated {
            need: end,
            got: payload.len(),
        });
    }
    Ok(end)
}

// ── DNS name decompression (RFC 1035 section 4.1.4) ─────────────────

/// Parse a domain name starting at `start_offset`, following label
/// compression pointers. Returns the lowercased dotted name and the
/// offset just past the name in the wire data.
fn parse_name(payload: &[u8], start_offset: usize) -> Result<(String, usize), DnsError> {
    let mut labels: Vec<String> = Vec::new();
    let mut total_len: usize = 0;
    let mut offset = start_offset;
    let mut pointer_hops = 0;
    // Advances only while we have not followed a pointer yet.
    let mut wire_end: Option<usize> = None;

    loop {
        if offset >= payload.len() {
            return Err(DnsError::Truncated {
                need: offset + 1,
                got: payload.len(),
            });
        }

        let label_byte = payload[offset];

        // Null label terminates the name.
        if label_byte == 0 {
            if wire_end.is_none() {
                wire_end = Some(offset + 1);
            }
            break;
        }

        // Compression pointer: top two bits set.
        if label_byte & 0xC0 == 0xC0 {
            if offset + 1 >= payload.len() {
                return Err(DnsError::Truncated {
                    need: offset + 2,
                    got: payload.len(),
                });
            }
            let pointer = ((label_byte as usize & 0x3F) << 8) | payload[offset + 1] as usize;
            if wire_end.is_none() {
                wire_end = Some(offset + 2);
            }
            pointer_hops += 1;
            if pointer_hops > MAX_POINTER_HOPS {
                return Err(DnsError::CompressionLoop);
            }
            if pointer >= payload.len() {
                return Err(DnsError::Malformed(format!(
                    "compression pointer {pointer} beyond message length {}",
                    payload.len()
                )));
            }
            offset = pointer;
            continue;
        }

        let label_len = label_byte as usize;
        if label_len > MAX_LABEL_LEN {
            return Err(DnsError::LabelTooLong { length: label_len });
        }
        if offset + 1 + label_len > payload.len() {
            return Err(DnsError::Truncated {
                need: offset + 1 + label_len,
                got: payload.len(),
            });
        }

        // DNS names are case-insensitive; normalize to lowercase.
        let label: String = payload[offset + 1..offset + 1 + label_len]
            .iter()
            .map(|&b| (b as char).to_ascii_lowercase())
            .collect();

        total_len += label_len;
        if !labels.is_empty() {
            total_len += 1;
        }
        if total_len > MAX_NAME_LEN {
            return Err(DnsError::NameTooLong { length: total_len });
        }

        labels.push(label);
        offset += 1 + label_len;
    }

    let end = wire_end.unwrap_or(offset + 1);
    Ok((labels.join("."), end))
}

// ── Tests ───────────────────────────────────────────────────────────
