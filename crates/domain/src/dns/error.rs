use thiserror::Error;

use super::entity::DnsRcode;

#[derive(Debug, Error)]
pub enum DnsError {
    #[error("malformed DNS message: {0}")]
    Malformed(String),

    #[error("truncated DNS message: need at least {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },

    #[error("label too long: {length} bytes (max 63)")]
    LabelTooLong { length: usize },

    #[error("domain name too long: {length} bytes (max 253)")]
    NameTooLong { length: usize },

    #[error("too many records in section: {count} (max {max})")]
    TooManyRecords { count: u16, max: u16 },

    #[error("compression pointer loop detected")]
    CompressionLoop,

    #[error("invalid query name '{name}': {reason}")]
    InvalidQueryName { name: String, reason: String },

    #[error("upstream returned error rcode {0}")]
    ErrorRcode(DnsRcode),

    #[error("unexpected DNS transaction id: got {got}, want {want}")]
    TransactionIdMismatch { got: u16, want: u16 },

    #[error("DNS transport error: {0}")]
    Transport(String),
}

impl From<std::io::Error> for DnsError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
