//! Forwarding error types.

use mesh_lowpan::CodecError;
use mesh_routing::RoutingError;
use mesh_transport::TransportError;
use std::net::Ipv6Addr;
use thiserror::Error;

/// Errors from handling one packet. None of these terminate the
/// forwarding loop; they are logged and the next packet is processed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ForwardError {
    /// The packet or its compressed form was malformed
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The destination is missing from the routing table
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// A unicast relay attempt failed
    #[error("transmission to {neighbor} failed: {source}")]
    Transmission {
        /// The neighbor the attempt targeted
        neighbor: Ipv6Addr,
        /// The phase that failed
        source: TransportError,
    },
}
