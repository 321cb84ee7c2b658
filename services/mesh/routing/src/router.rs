//! Routing decisions and the flood policy.

use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;

/// What to do with a packet, given its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingDecision {
    /// Deliver locally; this node is the destination
    Local,
    /// Unicast to this directly reachable neighbor only
    Relay(Ipv6Addr),
    /// No direct neighbor is the destination; flood per policy
    Flood,
}

/// Which neighbors a flood targets.
///
/// The single-hop optimization always gates *unicast* relay on the
/// destination being a direct neighbor; this policy only controls flood
/// breadth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FloodPolicy {
    /// Every discovered neighbor receives the flood, qualified or not,
    /// maximizing delivery probability at the cost of airtime
    AllNeighbors,
    /// Only neighbors on the destination's configured path receive the
    /// flood, trading delivery probability for airtime
    QualifiedOnly,
}

/// Flood breadth used unless configuration overrides it.
pub const DEFAULT_FLOOD_POLICY: FloodPolicy = FloodPolicy::AllNeighbors;

impl Default for FloodPolicy {
    fn default() -> Self {
        DEFAULT_FLOOD_POLICY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_flood_policy_is_broadcast() {
        assert_eq!(FloodPolicy::default(), FloodPolicy::AllNeighbors);
        assert_eq!(DEFAULT_FLOOD_POLICY, FloodPolicy::AllNeighbors);
    }
}
