//! The forwarding engine.

use crate::dedup::DedupCache;
use crate::error::ForwardError;
use async_trait::async_trait;
use mesh_lowpan::{Eui64, HeaderCodec, Ipv6Header, LinkContext};
use mesh_routing::{FloodPolicy, RoutingDecision, RoutingTable};
use mesh_transport::{
    send_compressed, Neighbor, NeighborSet, RadioTransport, ReceivedTransmission, TransportError,
};
use std::net::Ipv6Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// The host network stack's injection interface: locally destined,
/// decompressed packets are handed to it. Implemented over the driver's
/// synchronous inject control call.
#[async_trait]
pub trait LocalStack: Send + Sync {
    /// Hand a packet to the host stack as inbound traffic.
    async fn inject_inbound(&self, packet: &[u8]) -> bool;
}

/// Policy knobs for the engine. The transmission bound and the settle
/// pacing are deployment parameters, not protocol invariants.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound on one whole transmission attempt (connect through final write)
    pub attempt_timeout: Duration,
    /// Pause between flood attempts so consecutive writes to the same
    /// receiver's in-progress connection do not overlap
    pub settle_interval: Duration,
    /// Which neighbors a flood targets
    pub flood_policy: FloodPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(5),
            settle_interval: Duration::from_millis(100),
            flood_policy: FloodPolicy::default(),
        }
    }
}

/// What the engine did with a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Injected into the host stack; this node was the destination
    DeliveredLocal,
    /// Seen before; suppressed
    DroppedDuplicate,
    /// Unicast to the destination itself
    Relayed(Ipv6Addr),
    /// Flooded toward the destination
    Flooded {
        /// Neighbors the flood targeted
        targets: usize,
        /// Attempts that completed all three writes
        delivered: usize,
    },
}

/// Per-node forwarding engine. One engine runs per mesh node; the dedup
/// cache is the only state it mutates, behind a single mutex shared by the
/// loop task and completion tasks.
pub struct ForwardingEngine<T, L> {
    table: Arc<RoutingTable>,
    neighbors: Arc<NeighborSet>,
    transport: T,
    local_stack: L,
    local_iid: Eui64,
    dedup: Mutex<DedupCache>,
    config: EngineConfig,
}

impl<T, L> ForwardingEngine<T, L>
where
    T: RadioTransport,
    L: LocalStack,
{
    /// Create an engine for the node owning `local_iid`.
    pub fn new(
        table: Arc<RoutingTable>,
        neighbors: Arc<NeighborSet>,
        transport: T,
        local_stack: L,
        local_iid: Eui64,
        config: EngineConfig,
    ) -> Self {
        Self {
            table,
            neighbors,
            transport,
            local_stack,
            local_iid,
            dedup: Mutex::new(DedupCache::new()),
            config,
        }
    }

    /// Handle one uncompressed packet from any source: the driver bridge,
    /// the radio (after decompression), or local injection.
    pub async fn handle_packet(&self, packet: &[u8]) -> Result<Disposition, ForwardError> {
        let header = Ipv6Header::parse(packet)?;
        let destination = header.destination;

        let neighbors = self.neighbors.snapshot().await;
        let addresses: Vec<Ipv6Addr> = neighbors.iter().map(|n| n.address).collect();

        match self.table.decide(&destination, addresses.iter()) {
            RoutingDecision::Local => {
                if !self.dedup.lock().unwrap().observe(packet) {
                    debug!(%destination, "locally destined packet seen before");
                    return Ok(Disposition::DroppedDuplicate);
                }

                debug!(%destination, len = packet.len(), "delivering packet to host stack");
                if !self.local_stack.inject_inbound(packet).await {
                    warn!(%destination, "host stack rejected inbound injection");
                }
                Ok(Disposition::DeliveredLocal)
            }

            RoutingDecision::Relay(next_hop) => {
                if !self.dedup.lock().unwrap().observe(packet) {
                    debug!(%destination, "packet seen before, suppressing relay");
                    return Ok(Disposition::DroppedDuplicate);
                }

                let Some(neighbor) = neighbors.into_iter().find(|n| n.address == next_hop)
                else {
                    return Err(ForwardError::Transmission {
                        neighbor: next_hop,
                        source: TransportError::Discovery,
                    });
                };
                self.transmit(&neighbor, packet).await?;

                info!(%destination, "relayed to destination neighbor");
                Ok(Disposition::Relayed(next_hop))
            }

            RoutingDecision::Flood => {
                if !self.dedup.lock().unwrap().observe(packet) {
                    debug!(%destination, "packet seen before, suppressing flood");
                    return Ok(Disposition::DroppedDuplicate);
                }

                // An unroutable destination is a configuration error; no
                // flood is attempted for it.
                let path = self.table.path(&destination)?;

                let targets: Vec<Neighbor> = match self.config.flood_policy {
                    FloodPolicy::AllNeighbors => neighbors,
                    FloodPolicy::QualifiedOnly => neighbors
                        .into_iter()
                        .filter(|n| n.address == destination || path.contains(&n.address))
                        .collect(),
                };

                let mut delivered = 0;
                for (index, neighbor) in targets.iter().enumerate() {
                    if index > 0 {
                        tokio::time::sleep(self.config.settle_interval).await;
                    }

                    // Attempts are independent; one neighbor failing does
                    // not abort the rest of the flood.
                    match self.transmit(neighbor, packet).await {
                        Ok(()) => delivered += 1,
                        Err(err) => {
                            warn!(neighbor = %neighbor.address, %err, "flood attempt failed");
                        }
                    }
                }

                info!(
                    %destination,
                    targets = targets.len(),
                    delivered,
                    "flood pass complete"
                );
                Ok(Disposition::Flooded {
                    targets: targets.len(),
                    delivered,
                })
            }
        }
    }

    /// Handle one transmission received over the radio: decompress against
    /// the writing peer's link context, then forward as usual.
    pub async fn handle_received(
        &self,
        transmission: &ReceivedTransmission,
    ) -> Result<Disposition, ForwardError> {
        let context = LinkContext::new(peer_iid(&transmission.from), self.local_iid);
        let packet = HeaderCodec::new(context).decompress(
            &transmission.bytes,
            transmission.header_len as usize,
            transmission.payload_len as usize,
        )?;
        self.handle_packet(&packet).await
    }

    /// One bounded transmission attempt: compress for this neighbor's link,
    /// connect, and push the three fields in order.
    async fn transmit(&self, neighbor: &Neighbor, packet: &[u8]) -> Result<(), ForwardError> {
        let context = LinkContext::new(self.local_iid, peer_iid(&neighbor.address));
        let compressed = HeaderCodec::new(context).compress(packet)?;

        let attempt = async {
            let mut session = self.transport.connect(neighbor).await?;
            send_compressed(session.as_mut(), &compressed).await
        };

        match tokio::time::timeout(self.config.attempt_timeout, attempt).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(ForwardError::Transmission {
                neighbor: neighbor.address,
                source,
            }),
            Err(_) => Err(ForwardError::Transmission {
                neighbor: neighbor.address,
                source: TransportError::Timeout,
            }),
        }
    }
}

/// The interface identifier a peer's link-local address embeds; a zero
/// identifier (matching nothing) when the address is not link-local.
fn peer_iid(address: &Ipv6Addr) -> Eui64 {
    Eui64::from_link_local(address).unwrap_or(Eui64([0u8; 8]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use mesh_lowpan::UdpHeader;
    use mesh_routing::StaticRoute;
    use mesh_transport::MemTransport;
    use tokio::sync::mpsc;

    fn iid(tag: u64) -> Eui64 {
        Eui64::from_radio_address(tag)
    }

    fn border_iid() -> Eui64 {
        iid(0x0000_B827_0000_0001)
    }

    fn pi1_iid() -> Eui64 {
        iid(0x0000_B827_0000_0002)
    }

    fn pi2_iid() -> Eui64 {
        iid(0x0000_B827_0000_0003)
    }

    fn unrelated_iid() -> Eui64 {
        iid(0x0000_B827_0000_00FF)
    }

    /// Border Router -> Pi 1 -> Pi 2
    fn test_table(local: Ipv6Addr) -> Arc<RoutingTable> {
        let border = border_iid().link_local_address();
        let pi1 = pi1_iid().link_local_address();
        let pi2 = pi2_iid().link_local_address();
        Arc::new(RoutingTable::from_routes(
            local,
            vec![
                StaticRoute {
                    destination: pi1,
                    path: vec![border, pi1],
                },
                StaticRoute {
                    destination: pi2,
                    path: vec![border, pi1, pi2],
                },
            ],
        ))
    }

    /// Records injected packets instead of touching a host stack.
    struct RecordingStack {
        tx: mpsc::UnboundedSender<Vec<u8>>,
    }

    impl RecordingStack {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Vec<u8>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Arc::new(Self { tx }), rx)
        }
    }

    #[async_trait]
    impl LocalStack for Arc<RecordingStack> {
        async fn inject_inbound(&self, packet: &[u8]) -> bool {
            self.tx.send(packet.to_vec()).is_ok()
        }
    }

    fn udp_packet(source: Ipv6Addr, destination: Ipv6Addr, payload: &[u8]) -> Vec<u8> {
        let ip = Ipv6Header {
            traffic_class: 0,
            flow_label: 0,
            payload_length: (8 + payload.len()) as u16,
            next_header: 17,
            hop_limit: 64,
            source,
            destination,
        };
        let udp = UdpHeader {
            source_port: 0xF0B1,
            destination_port: 0xF0B2,
            length: (8 + payload.len()) as u16,
            checksum: 0,
        };

        let mut buf = BytesMut::new();
        ip.encode(&mut buf);
        udp.encode(&mut buf);
        buf.extend_from_slice(payload);
        buf.to_vec()
    }

    struct TestNode {
        engine: ForwardingEngine<MemTransport, Arc<RecordingStack>>,
        injected_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    }

    async fn build_node(
        link: &MemTransport,
        local: Eui64,
        neighbor_iids: &[Eui64],
        config: EngineConfig,
    ) -> TestNode {
        let local_addr = local.link_local_address();
        let neighbors = Arc::new(NeighborSet::new());
        for n in neighbor_iids {
            let addr = n.link_local_address();
            neighbors
                .insert(Neighbor::new(addr, format!("mem:{addr}")))
                .await;
        }

        let (stack, injected_rx) = RecordingStack::new();
        let engine = ForwardingEngine::new(
            test_table(local_addr),
            neighbors,
            link.endpoint(local_addr),
            stack,
            local,
            config,
        );
        TestNode {
            engine,
            injected_rx,
        }
    }

    fn fast_config(flood_policy: FloodPolicy) -> EngineConfig {
        EngineConfig {
            attempt_timeout: Duration::from_secs(1),
            settle_interval: Duration::from_millis(1),
            flood_policy,
        }
    }

    #[tokio::test]
    async fn test_local_destination_is_injected() {
        let link = MemTransport::new();
        let mut node = build_node(
            &link,
            border_iid(),
            &[],
            fast_config(FloodPolicy::AllNeighbors),
        )
        .await;

        let packet = udp_packet(
            pi1_iid().link_local_address(),
            border_iid().link_local_address(),
            b"for the border router",
        );

        let disposition = node.engine.handle_packet(&packet).await.unwrap();
        assert_eq!(disposition, Disposition::DeliveredLocal);
        assert_eq!(node.injected_rx.recv().await.unwrap(), packet);
    }

    #[tokio::test]
    async fn test_duplicate_is_dropped_before_relay_and_injection() {
        let link = MemTransport::new();
        let mut pi1_inbox = link.register(pi1_iid().link_local_address());
        let mut node = build_node(
            &link,
            border_iid(),
            &[pi1_iid()],
            fast_config(FloodPolicy::AllNeighbors),
        )
        .await;

        let remote = udp_packet(
            border_iid().link_local_address(),
            pi1_iid().link_local_address(),
            b"remote",
        );
        assert_eq!(
            node.engine.handle_packet(&remote).await.unwrap(),
            Disposition::Relayed(pi1_iid().link_local_address())
        );
        assert!(pi1_inbox.recv().await.is_some());

        // Second receipt of the same bytes is suppressed silently.
        assert_eq!(
            node.engine.handle_packet(&remote).await.unwrap(),
            Disposition::DroppedDuplicate
        );
        assert!(pi1_inbox.try_recv().is_err());

        // The same applies to a locally destined duplicate.
        let local = udp_packet(
            pi1_iid().link_local_address(),
            border_iid().link_local_address(),
            b"local",
        );
        assert_eq!(
            node.engine.handle_packet(&local).await.unwrap(),
            Disposition::DeliveredLocal
        );
        assert_eq!(
            node.engine.handle_packet(&local).await.unwrap(),
            Disposition::DroppedDuplicate
        );
        assert_eq!(node.injected_rx.recv().await.unwrap(), local);
        assert!(node.injected_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_flood_targets_all_neighbors_including_unqualified() {
        let link = MemTransport::new();
        let mut pi1_inbox = link.register(pi1_iid().link_local_address());
        let mut x_inbox = link.register(unrelated_iid().link_local_address());

        // Pi 2 is not a direct neighbor of the border router.
        let node = build_node(
            &link,
            border_iid(),
            &[pi1_iid(), unrelated_iid()],
            fast_config(FloodPolicy::AllNeighbors),
        )
        .await;

        let packet = udp_packet(
            border_iid().link_local_address(),
            pi2_iid().link_local_address(),
            b"two hops away",
        );

        let disposition = node.engine.handle_packet(&packet).await.unwrap();
        assert_eq!(
            disposition,
            Disposition::Flooded {
                targets: 2,
                delivered: 2
            }
        );

        // Pi 1 qualifies; X does not, but the broadcast policy still
        // reaches it.
        assert!(pi1_inbox.recv().await.is_some());
        assert!(x_inbox.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_qualified_only_flood_excludes_off_path_neighbors() {
        let link = MemTransport::new();
        let mut pi1_inbox = link.register(pi1_iid().link_local_address());
        let mut x_inbox = link.register(unrelated_iid().link_local_address());

        let node = build_node(
            &link,
            border_iid(),
            &[pi1_iid(), unrelated_iid()],
            fast_config(FloodPolicy::QualifiedOnly),
        )
        .await;

        let packet = udp_packet(
            border_iid().link_local_address(),
            pi2_iid().link_local_address(),
            b"restricted flood",
        );

        let disposition = node.engine.handle_packet(&packet).await.unwrap();
        assert_eq!(
            disposition,
            Disposition::Flooded {
                targets: 1,
                delivered: 1
            }
        );
        assert!(pi1_inbox.recv().await.is_some());
        assert!(x_inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_missing_route_drops_without_flooding() {
        let link = MemTransport::new();
        let mut pi1_inbox = link.register(pi1_iid().link_local_address());
        let node = build_node(
            &link,
            border_iid(),
            &[pi1_iid()],
            fast_config(FloodPolicy::AllNeighbors),
        )
        .await;

        let unknown = iid(0x0000_B827_0000_0042).link_local_address();
        let packet = udp_packet(border_iid().link_local_address(), unknown, b"unroutable");

        let err = node.engine.handle_packet(&packet).await.unwrap_err();
        assert!(matches!(
            err,
            ForwardError::Routing(mesh_routing::RoutingError::MalformedRoutingEntry(addr))
                if addr == unknown
        ));
        assert!(pi1_inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_one_failing_neighbor_does_not_abort_the_flood() {
        let link = MemTransport::new();
        let mut pi1_inbox = link.register(pi1_iid().link_local_address());
        link.register(unrelated_iid().link_local_address());
        link.mark_unreachable(unrelated_iid().link_local_address());

        let node = build_node(
            &link,
            border_iid(),
            &[unrelated_iid(), pi1_iid()],
            fast_config(FloodPolicy::AllNeighbors),
        )
        .await;

        let packet = udp_packet(
            border_iid().link_local_address(),
            pi2_iid().link_local_address(),
            b"partial flood",
        );

        let disposition = node.engine.handle_packet(&packet).await.unwrap();
        assert_eq!(
            disposition,
            Disposition::Flooded {
                targets: 2,
                delivered: 1
            }
        );
        assert!(pi1_inbox.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_malformed_packet_is_rejected() {
        let link = MemTransport::new();
        let node = build_node(
            &link,
            border_iid(),
            &[],
            fast_config(FloodPolicy::AllNeighbors),
        )
        .await;

        let err = node.engine.handle_packet(&[0u8; 12]).await.unwrap_err();
        assert!(matches!(err, ForwardError::Codec(_)));
    }

    #[tokio::test]
    async fn test_two_hop_scenario_end_to_end() {
        // Border Router -> Pi 1 -> Pi 2, with the packet destined to Pi 2
        // arriving at the border router. The border floods (Pi 2 is not a
        // direct neighbor), Pi 1 decompresses and relays, Pi 2 delivers
        // locally; the packet survives both compressions bit-for-bit.
        let link = MemTransport::new();
        let mut pi1_inbox = link.register(pi1_iid().link_local_address());
        let mut pi2_inbox = link.register(pi2_iid().link_local_address());

        let border = build_node(
            &link,
            border_iid(),
            &[pi1_iid()],
            fast_config(FloodPolicy::AllNeighbors),
        )
        .await;
        let pi1 = build_node(
            &link,
            pi1_iid(),
            &[border_iid(), pi2_iid()],
            fast_config(FloodPolicy::AllNeighbors),
        )
        .await;
        let mut pi2 = build_node(
            &link,
            pi2_iid(),
            &[pi1_iid()],
            fast_config(FloodPolicy::AllNeighbors),
        )
        .await;

        let packet = udp_packet(
            border_iid().link_local_address(),
            pi2_iid().link_local_address(),
            b"hello pi 2",
        );

        // Hop 1: border floods toward Pi 2.
        assert_eq!(
            border.engine.handle_packet(&packet).await.unwrap(),
            Disposition::Flooded {
                targets: 1,
                delivered: 1
            }
        );

        // Hop 2: Pi 1 receives, reconstructs the packet, and relays to its
        // direct neighbor Pi 2.
        let transmission = pi1_inbox.recv().await.unwrap();
        assert_eq!(
            pi1.engine.handle_received(&transmission).await.unwrap(),
            Disposition::Relayed(pi2_iid().link_local_address())
        );

        // Hop 3: Pi 2 receives and injects the original bytes.
        let transmission = pi2_inbox.recv().await.unwrap();
        assert_eq!(
            pi2.engine.handle_received(&transmission).await.unwrap(),
            Disposition::DeliveredLocal
        );
        assert_eq!(pi2.injected_rx.recv().await.unwrap(), packet);
    }
}
