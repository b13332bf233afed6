use domain::fqdn::error::FqdnError;
use domain::packet::entity::PausedDnsPacket;

/// Flow identifier of the DNS interception conjunction owned by the
/// FQDN controller. Only this controller mutates its address set or
/// resumes packets it paused.
pub const DNS_INTERCEPTION_FLOW_ID: u32 = 1;

/// Secondary port for the datapath operations the FQDN controller
/// depends on. Implemented by the OVS bridge client in the embedding
/// agent.
pub trait DatapathPort: Send + Sync {
    /// Install the flow that pauses DNS responses destined to selected
    /// workloads. Idempotent; called once at controller construction.
    fn install_dns_interception_flow(&self, flow_id: u32) -> Result<(), FqdnError>;

    /// Add workload ports to the interception flow's match set.
    fn add_ports_to_interception(&self, flow_id: u32, ports: &[u32]) -> Result<(), FqdnError>;

    /// Remove workload ports from the interception flow's match set.
    fn remove_ports_from_interception(&self, flow_id: u32, ports: &[u32]) -> Result<(), FqdnError>;

    /// Forward a paused packet to its destination workload.
    fn resume_paused_packet(&self, packet: &PausedDnsPacket) -> Result<(), FqdnError>;
}
