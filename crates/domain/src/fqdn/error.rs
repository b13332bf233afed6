use thiserror::Error;

#[derive(Debug, Error)]
pub enum FqdnError {
    #[error("invalid FQDN selector '{expression}': {reason}")]
    InvalidSelector { expression: String, reason: String },

    #[error("failed to realize rule {rule_id} in the datapath")]
    RuleRealization { rule_id: String },

    #[error("datapath rules not synced within {timeout_ms} ms for DNS response")]
    RealizationTimeout { timeout_ms: u64 },

    #[error("datapath error: {0}")]
    Datapath(String),
}
