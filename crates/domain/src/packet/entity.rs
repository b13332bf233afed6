/// A suspected DNS response paused by the datapath, pending a
/// release-or-drop verdict from the interception pipeline.
#[derive(Debug, Clone)]
pub struct PausedDnsPacket {
    /// Opaque datapath handle used to resume this exact packet.
    pub cookie: u64,
    /// Raw L2 frame bytes as captured by the interception flow.
    pub frame: Vec<u8>,
}

/// The DNS message bytes carried by an intercepted packet, after the
/// transport framing has been stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsTransportPayload {
    Udp {
        message: Vec<u8>,
    },
    /// DNS-over-TCP: a two-byte length prefix precedes the message.
    /// `declared_len` larger than `message.len()` means the capture holds
    /// only the first segment of the response.
    Tcp {
        message: Vec<u8>,
        declared_len: usize,
    },
}
