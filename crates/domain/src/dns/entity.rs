use std::fmt;
use std::net::IpAddr;

/// The two record families this controller resolves and enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    A,
    Aaaa,
}

impl RecordKind {
    /// RFC 1035 wire type code.
    pub fn wire_type(self) -> u16 {
        match self {
            Self::A => 1,
            Self::Aaaa => 28,
        }
    }

    /// Label used in logs and metrics.
    pub fn family(self) -> &'static str {
        match self {
            Self::A => "ipv4",
            Self::Aaaa => "ipv6",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::Aaaa => write!(f, "AAAA"),
        }
    }
}

/// DNS response code (RCODE).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsRcode {
    NoError,
    FormErr,
    ServFail,
    NXDomain,
    NotImp,
    Refused,
    Other(u8),
}

impl DnsRcode {
    pub fn from_wire(value: u8) -> Self {
        match value & 0x0F {
            0 => Self::NoError,
            1 => Self::FormErr,
            2 => Self::ServFail,
            3 => Self::NXDomain,
            4 => Self::NotImp,
            5 => Self::Refused,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for DnsRcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoError => write!(f, "NOERROR"),
            Self::FormErr => write!(f, "FORMERR"),
            Self::ServFail => write!(f, "SERVFAIL"),
            Self::NXDomain => write!(f, "NXDOMAIN"),
            Self::NotImp => write!(f, "NOTIMP"),
            Self::Refused => write!(f, "REFUSED"),
            Self::Other(n) => write!(f, "RCODE{n}"),
        }
    }
}

/// An address answer extracted from a DNS response.
///
/// Only A and AAAA records carry addresses; all other record types are
/// skipped during parsing. The family is implied by the `IpAddr` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsAnswer {
    pub ip: IpAddr,
    pub ttl_secs: u32,
}

/// A parsed DNS response, reduced to what FQDN policy enforcement needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDnsResponse {
    pub transaction_id: u16,
    pub rcode: DnsRcode,
    /// First question name, lowercased, without the trailing dot.
    pub fqdn: String,
    /// A/AAAA answers in response order.
    pub answers: Vec<DnsAnswer>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_kind_wire_types() {
        assert_eq!(RecordKind::A.wire_type(), 1);
        assert_eq!(RecordKind::Aaaa.wire_type(), 28);
    }

    #[test]
    fn rcode_from_wire() {
        assert_eq!(DnsRcode::from_wire(0), DnsRcode::NoError);
        assert_eq!(DnsRcode::from_wire(2), DnsRcode::ServFail);
        assert_eq!(DnsRcode::from_wire(3), DnsRcode::NXDomain);
        assert_eq!(DnsRcode::from_wire(9), DnsRcode::Other(9));
        // Upper bits are masked off.
        assert_eq!(DnsRcode::from_wire(0xF3), DnsRcode::NXDomain);
    }

    #[test]
    fn rcode_display() {
        assert_eq!(DnsRcode::NXDomain.to_string(), "NXDOMAIN");
        assert_eq!(DnsRcode::Other(11).to_string(), "RCODE11");
    }
}
