//! 6LoWPAN header compression for IPv6 over the low-MTU radio link.
//!
//! This crate implements the IPHC encoding (RFC 6282) used to shrink the
//! 40-byte IPv6 header, plus the companion NHC encoding for a following UDP
//! header. The compressed stream is not self-terminating: the compressed
//! header length and the payload length travel out-of-band next to it, and
//! decompression needs both to reconstruct the original packet bit-for-bit.
//!
//! ## Compressed layout
//!
//! ```text
//! +-----------+-----------+---------------------------------------+
//! | IPHC byte | IPHC byte | inline fields (TF, NH, HLIM, SRC, DST)|
//! +-----------+-----------+---------------------------------------+
//! | NHC byte  | inline UDP fields (ports, checksum)   [UDP only]  |
//! +-----------+---------------------------------------------------+
//! | payload                                                       |
//! +---------------------------------------------------------------+
//! ```
//!
//! Fields that match no compressible pattern fall back to full inline
//! encoding; compression of a well-formed packet never fails, it only
//! discards opportunities.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod error;
pub mod header;
pub mod iphc;

pub use address::{Eui64, LinkContext};
pub use error::CodecError;
pub use header::{Ipv6Header, UdpHeader, IPV6_HEADER_SIZE, UDP_HEADER_SIZE};
pub use iphc::{CompressedPacket, HeaderCodec};

/// Largest packet the mesh carries, the IPv6 minimum MTU.
pub const MAX_PACKET_SIZE: usize = 1280;
