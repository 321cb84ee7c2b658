//! The ordered three-field write.

use crate::error::TransportError;
use crate::traits::RadioSession;
use mesh_lowpan::CompressedPacket;
use tracing::trace;

/// Push a compressed packet over a verified session: compressed header
/// length, then payload length, then the packet bytes. The order is load
/// bearing; the receiver reassembles on the final write.
pub async fn send_compressed(
    session: &mut dyn RadioSession,
    packet: &CompressedPacket,
) -> Result<(), TransportError> {
    session.write_header_length(packet.header_len as u32).await?;
    session.write_payload_length(packet.payload_len as u32).await?;
    session.write_packet(&packet.bytes).await?;

    trace!(
        header_len = packet.header_len,
        payload_len = packet.payload_len,
        "transmission complete"
    );
    Ok(())
}
