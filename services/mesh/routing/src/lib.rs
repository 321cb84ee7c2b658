//! Static routing for the mesh.
//!
//! The routing table maps each destination to the ordered path from the
//! border router to it. There is no routing protocol: the table is supplied
//! as configuration, and every destination a packet may be relayed to must
//! have an entry. Absence of an entry is a configuration error surfaced as
//! [`RoutingError::MalformedRoutingEntry`], never treated as "no one
//! qualifies".

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod router;
pub mod table;

pub use router::{FloodPolicy, RoutingDecision, DEFAULT_FLOOD_POLICY};
pub use table::{RoutingTable, StaticRoute};

use std::net::Ipv6Addr;
use thiserror::Error;

/// Routing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// The destination has no entry in the routing table
    #[error("no routing entry for destination {0}")]
    MalformedRoutingEntry(Ipv6Addr),
}
