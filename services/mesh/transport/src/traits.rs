//! The transport collaborator interface.

use crate::error::TransportError;
use crate::neighbor::Neighbor;
use async_trait::async_trait;

/// The radio transport as the mesh core sees it. `connect` covers the
/// whole pre-write state machine: discovery of the advertising peer, the
/// connection itself, and verification that the peer exposes the packet
/// service.
#[async_trait]
pub trait RadioTransport: Send + Sync {
    /// Peers currently advertising readiness to receive a packet.
    async fn discover(&self) -> Vec<Neighbor>;

    /// Connect to a neighbor and verify its packet service, yielding a
    /// session the three field writes go over.
    async fn connect(&self, neighbor: &Neighbor)
        -> Result<Box<dyn RadioSession>, TransportError>;
}

/// A verified point-to-point session with one peer. Each write is
/// acknowledged independently; the peer takes the packet write as the
/// completeness signal, so the two lengths must land first.
#[async_trait]
pub trait RadioSession: Send + std::fmt::Debug {
    /// Announce the compressed header length.
    async fn write_header_length(&mut self, len: u32) -> Result<(), TransportError>;

    /// Announce the payload length.
    async fn write_payload_length(&mut self, len: u32) -> Result<(), TransportError>;

    /// Write the packet bytes, completing the transmission.
    async fn write_packet(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
}
