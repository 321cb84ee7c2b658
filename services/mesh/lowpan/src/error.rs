//! Codec error types.

use thiserror::Error;

/// Header compression/decompression errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Packet too short to carry the headers it claims
    #[error("malformed packet: {0} bytes")]
    MalformedPacket(usize),

    /// Not an IPv6 packet
    #[error("unsupported IP version {0}")]
    Version(u8),

    /// Compressed stream inconsistent with its out-of-band lengths
    #[error("decompression failed: {0}")]
    Decompression(&'static str),
}
