use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

use domain::fqdn::entity::RuleRealizationUpdate;
use domain::fqdn::error::FqdnError;
use domain::packet::entity::PausedDnsPacket;

/// Primary port exposed to the NetworkPolicy controller and to the
/// datapath's packet-in dispatcher.
///
/// `handle_intercepted_packet` uses a `Pin<Box<dyn Future>>` return type
/// (instead of RPITIT) so the trait is dyn-compatible and can be used as
/// `Arc<dyn FqdnPolicyPort>`.
pub trait FqdnPolicyPort: Send + Sync {
    /// Register a rule's FQDN expressions and the workload ports it
    /// applies to. Exact new names are queried immediately.
    fn add_fqdn_rule(
        &self,
        rule_id: &str,
        fqdns: &[String],
        ports: &[u32],
    ) -> Result<(), FqdnError>;

    /// Remove a rule; selectors and cached names nothing references
    /// anymore are garbage-collected.
    fn delete_fqdn_rule(&self, rule_id: &str, fqdns: &[String]) -> Result<(), FqdnError>;

    /// Union of currently-cached addresses for the given FQDN
    /// expressions, used when materializing a rule's peer address set.
    fn ips_for_selectors(&self, fqdns: &[String]) -> Vec<IpAddr>;

    /// Called by the rule reconciler after each realization attempt.
    fn notify_rule_realization(&self, update: RuleRealizationUpdate);

    /// Process one paused DNS response: merge its addresses, wait for
    /// the affected rules to be realized, then resume the packet.
    /// An error verdict means the packet was dropped (the workload
    /// retries DNS).
    fn handle_intercepted_packet<'a>(
        &'a self,
        packet: PausedDnsPacket,
    ) -> Pin<Box<dyn Future<Output = Result<(), FqdnError>> + Send + 'a>>;
}
