//! Routing table and neighbor qualification.

use crate::router::RoutingDecision;
use crate::RoutingError;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;
use tracing::{debug, info};

/// One configured route: the ordered path from the border router to a
/// destination, ending at the destination itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRoute {
    /// The destination this route reaches
    pub destination: Ipv6Addr,
    /// Border router first, destination last
    pub path: Vec<Ipv6Addr>,
}

/// In-memory routing table, read-mostly after load.
#[derive(Debug)]
pub struct RoutingTable {
    /// This node's own address
    local: Ipv6Addr,
    /// Destination -> path from the border router
    routes: DashMap<Ipv6Addr, Vec<Ipv6Addr>>,
}

impl RoutingTable {
    /// Create an empty table for the node at `local`.
    pub fn new(local: Ipv6Addr) -> Self {
        Self {
            local,
            routes: DashMap::new(),
        }
    }

    /// Build the table from configured routes.
    pub fn from_routes(local: Ipv6Addr, routes: Vec<StaticRoute>) -> Self {
        let table = Self::new(local);
        for route in routes {
            table.insert_route(route.destination, route.path);
        }
        info!("loaded routing table with {} routes", table.len());
        table
    }

    /// This node's own address.
    pub fn local_address(&self) -> Ipv6Addr {
        self.local
    }

    /// Add or replace the route to a destination.
    pub fn insert_route(&self, destination: Ipv6Addr, path: Vec<Ipv6Addr>) {
        debug!(%destination, hops = path.len(), "adding route");
        self.routes.insert(destination, path);
    }

    /// Remove the route to a destination.
    pub fn remove_route(&self, destination: &Ipv6Addr) {
        if self.routes.remove(destination).is_some() {
            debug!(%destination, "removed route");
        }
    }

    /// Number of routes currently loaded.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table holds no routes.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// The path to a destination; a missing entry is a configuration
    /// error, not an empty path.
    pub fn path(&self, destination: &Ipv6Addr) -> Result<Vec<Ipv6Addr>, RoutingError> {
        self.routes
            .get(destination)
            .map(|entry| entry.clone())
            .ok_or(RoutingError::MalformedRoutingEntry(*destination))
    }

    /// Whether `candidate` qualifies to carry a packet toward
    /// `destination`: it is the destination itself or appears anywhere in
    /// the destination's path.
    pub fn qualifies(
        &self,
        candidate: &Ipv6Addr,
        destination: &Ipv6Addr,
    ) -> Result<bool, RoutingError> {
        if candidate == destination {
            return Ok(true);
        }
        let path = self.path(destination)?;
        Ok(path.contains(candidate))
    }

    /// Classify a destination against this node and its directly reachable
    /// neighbors.
    pub fn decide<'a, I>(&self, destination: &Ipv6Addr, neighbors: I) -> RoutingDecision
    where
        I: IntoIterator<Item = &'a Ipv6Addr>,
    {
        if *destination == self.local {
            return RoutingDecision::Local;
        }

        if neighbors.into_iter().any(|n| n == destination) {
            debug!(%destination, "destination is a direct neighbor");
            return RoutingDecision::Relay(*destination);
        }

        RoutingDecision::Flood
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn border() -> Ipv6Addr {
        "fe80::b826:1c8b:ccbb:32f0".parse().unwrap()
    }

    fn pi1() -> Ipv6Addr {
        "fe80::291:a8ff:feeb:27b8".parse().unwrap()
    }

    fn pi2() -> Ipv6Addr {
        "fe80::3ff8:d2ff:feeb:27b8".parse().unwrap()
    }

    /// Border Router -> Pi 1 -> Pi 2
    fn test_table() -> RoutingTable {
        RoutingTable::from_routes(
            border(),
            vec![
                StaticRoute {
                    destination: pi1(),
                    path: vec![border(), pi1()],
                },
                StaticRoute {
                    destination: pi2(),
                    path: vec![border(), pi1(), pi2()],
                },
            ],
        )
    }

    #[test]
    fn test_qualification() {
        let table = test_table();
        let unrelated: Ipv6Addr = "fe80::dead:beef".parse().unwrap();

        assert!(table.qualifies(&pi1(), &pi2()).unwrap());
        assert!(table.qualifies(&pi2(), &pi2()).unwrap());
        assert!(table.qualifies(&border(), &pi2()).unwrap());
        assert!(!table.qualifies(&unrelated, &pi2()).unwrap());
    }

    #[test]
    fn test_missing_destination_is_an_error_not_false() {
        let table = test_table();
        let unknown: Ipv6Addr = "fe80::aaaa".parse().unwrap();

        let err = table.qualifies(&pi1(), &unknown).unwrap_err();
        assert_eq!(err, RoutingError::MalformedRoutingEntry(unknown));
        assert_eq!(
            table.path(&unknown).unwrap_err(),
            RoutingError::MalformedRoutingEntry(unknown)
        );

        // A candidate equal to the destination qualifies even without an
        // entry; only path membership needs the table.
        assert!(table.qualifies(&unknown, &unknown).unwrap());
    }

    #[test]
    fn test_decide() {
        let table = test_table();
        let neighbors = [pi1()];

        assert_eq!(table.decide(&border(), &neighbors), RoutingDecision::Local);
        assert_eq!(
            table.decide(&pi1(), &neighbors),
            RoutingDecision::Relay(pi1())
        );
        assert_eq!(table.decide(&pi2(), &neighbors), RoutingDecision::Flood);
    }

    #[test]
    fn test_route_mutation() {
        let table = test_table();
        assert_eq!(table.len(), 2);

        table.remove_route(&pi2());
        assert_eq!(table.len(), 1);
        assert!(table.path(&pi2()).is_err());

        table.insert_route(pi2(), vec![border(), pi2()]);
        assert_eq!(table.path(&pi2()).unwrap(), vec![border(), pi2()]);
    }
}
