use thiserror::Error;

/// Failures while digging a DNS message out of a raw L2 frame.
///
/// Every variant means "this is not a DNS response we can act on";
/// the interceptor releases such packets unchanged.
#[derive(Debug, Error)]
pub enum PacketParseError {
    #[error("truncated frame: need at least {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },

    #[error("unsupported ethertype {0:#06x}")]
    UnsupportedEtherType(u16),

    #[error("unsupported IP protocol {0}")]
    UnsupportedProtocol(u8),

    #[error("invalid IP header: {0}")]
    InvalidIpHeader(String),

    #[error("invalid TCP header: {0}")]
    InvalidTcpHeader(String),

    #[error("non-initial IP fragment")]
    IpFragment,

    #[error("TCP payload too short for a DNS length prefix: {0} bytes")]
    MissingDnsLength(usize),
}
