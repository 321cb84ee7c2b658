//! Reachable radio peers.

use std::collections::HashMap;
use std::net::Ipv6Addr;
use tokio::sync::RwLock;
use tracing::debug;

/// A radio peer currently reachable. The transport owns its lifecycle; the
/// forwarding engine only reads these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbor {
    /// The peer's mesh address
    pub address: Ipv6Addr,
    /// Opaque transport identifier for the peer's radio
    pub device_id: String,
}

impl Neighbor {
    /// Create a neighbor record.
    pub fn new(address: Ipv6Addr, device_id: impl Into<String>) -> Self {
        Self {
            address,
            device_id: device_id.into(),
        }
    }
}

/// The set of currently reachable neighbors, shared between the discovery
/// side (writer) and the forwarding loop (reader).
#[derive(Debug, Default)]
pub struct NeighborSet {
    neighbors: RwLock<HashMap<Ipv6Addr, Neighbor>>,
}

impl NeighborSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reachable neighbor, replacing any previous record.
    pub async fn insert(&self, neighbor: Neighbor) {
        debug!(address = %neighbor.address, device = %neighbor.device_id, "neighbor reachable");
        self.neighbors
            .write()
            .await
            .insert(neighbor.address, neighbor);
    }

    /// Forget a neighbor.
    pub async fn remove(&self, address: &Ipv6Addr) {
        if self.neighbors.write().await.remove(address).is_some() {
            debug!(%address, "neighbor lost");
        }
    }

    /// The neighbor at `address`, if reachable.
    pub async fn get(&self, address: &Ipv6Addr) -> Option<Neighbor> {
        self.neighbors.read().await.get(address).cloned()
    }

    /// Whether `address` is a directly reachable neighbor.
    pub async fn contains(&self, address: &Ipv6Addr) -> bool {
        self.neighbors.read().await.contains_key(address)
    }

    /// Snapshot of all reachable neighbors.
    pub async fn snapshot(&self) -> Vec<Neighbor> {
        self.neighbors.read().await.values().cloned().collect()
    }

    /// Number of reachable neighbors.
    pub async fn len(&self) -> usize {
        self.neighbors.read().await.len()
    }

    /// Whether no neighbor is reachable.
    pub async fn is_empty(&self) -> bool {
        self.neighbors.read().await.is_empty()
    }
}
