//! In-process radio link.
//!
//! A registry of peers connected by channels, implementing the transport
//! seam for tests and simulation runs. A session buffers the two length
//! writes and delivers the whole transmission on the packet write, which
//! is exactly the completeness rule real receivers follow.

use crate::error::TransportError;
use crate::neighbor::Neighbor;
use crate::traits::{RadioSession, RadioTransport};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::net::Ipv6Addr;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

/// One complete transmission as seen by the receiving peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedTransmission {
    /// Address of the peer that wrote the packet
    pub from: Ipv6Addr,
    /// Compressed header length announced before the packet
    pub header_len: u32,
    /// Payload length announced before the packet
    pub payload_len: u32,
    /// The packet bytes themselves
    pub bytes: Bytes,
}

#[derive(Default)]
struct Registry {
    peers: HashMap<Ipv6Addr, mpsc::UnboundedSender<ReceivedTransmission>>,
    /// Peers that refuse connections, for failure-path tests
    unreachable: HashSet<Ipv6Addr>,
    /// Peers reachable but without the packet service
    without_service: HashSet<Ipv6Addr>,
}

/// In-process transport connecting registered peers.
#[derive(Clone, Default)]
pub struct MemTransport {
    local_address: Option<Ipv6Addr>,
    registry: Arc<Mutex<Registry>>,
}

impl MemTransport {
    /// Create an empty link with no local identity.
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle onto the same link that writes as `local_address`.
    pub fn endpoint(&self, local_address: Ipv6Addr) -> Self {
        Self {
            local_address: Some(local_address),
            registry: Arc::clone(&self.registry),
        }
    }

    /// Register a peer; returns the receiver its transmissions arrive on.
    pub fn register(&self, address: Ipv6Addr) -> mpsc::UnboundedReceiver<ReceivedTransmission> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry.lock().unwrap().peers.insert(address, tx);
        rx
    }

    /// Make a peer refuse connections.
    pub fn mark_unreachable(&self, address: Ipv6Addr) {
        self.registry.lock().unwrap().unreachable.insert(address);
    }

    /// Make a peer connect but fail service verification.
    pub fn mark_without_service(&self, address: Ipv6Addr) {
        self.registry.lock().unwrap().without_service.insert(address);
    }
}

#[async_trait]
impl RadioTransport for MemTransport {
    async fn discover(&self) -> Vec<Neighbor> {
        let registry = self.registry.lock().unwrap();
        registry
            .peers
            .keys()
            .filter(|address| Some(**address) != self.local_address)
            .map(|address| Neighbor::new(*address, format!("mem:{address}")))
            .collect()
    }

    async fn connect(
        &self,
        neighbor: &Neighbor,
    ) -> Result<Box<dyn RadioSession>, TransportError> {
        let registry = self.registry.lock().unwrap();

        if registry.unreachable.contains(&neighbor.address) {
            return Err(TransportError::Discovery);
        }
        let tx = registry
            .peers
            .get(&neighbor.address)
            .cloned()
            .ok_or(TransportError::Discovery)?;
        if registry.without_service.contains(&neighbor.address) {
            return Err(TransportError::ServiceVerification);
        }

        debug!(peer = %neighbor.address, "connected and verified packet service");
        Ok(Box::new(MemSession {
            from: self.local_address.unwrap_or(Ipv6Addr::UNSPECIFIED),
            tx,
            header_len: None,
            payload_len: None,
        }))
    }
}

#[derive(Debug)]
struct MemSession {
    from: Ipv6Addr,
    tx: mpsc::UnboundedSender<ReceivedTransmission>,
    header_len: Option<u32>,
    payload_len: Option<u32>,
}

#[async_trait]
impl RadioSession for MemSession {
    async fn write_header_length(&mut self, len: u32) -> Result<(), TransportError> {
        self.header_len = Some(len);
        Ok(())
    }

    async fn write_payload_length(&mut self, len: u32) -> Result<(), TransportError> {
        self.payload_len = Some(len);
        Ok(())
    }

    async fn write_packet(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        // The two lengths must have landed first.
        let header_len = self.header_len.ok_or(TransportError::Write("packet"))?;
        let payload_len = self.payload_len.ok_or(TransportError::Write("packet"))?;

        self.tx
            .send(ReceivedTransmission {
                from: self.from,
                header_len,
                payload_len,
                bytes: Bytes::copy_from_slice(bytes),
            })
            .map_err(|_| TransportError::Write("packet"))
    }
}
