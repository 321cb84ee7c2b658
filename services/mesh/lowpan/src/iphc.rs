//! IPHC compression and decompression (RFC 6282), with UDP NHC.
//!
//! Encoding of the two IPHC bytes:
//!
//! ```text
//!   0                                       1
//!   0   1   2   3   4   5   6   7   8   9   0   1   2   3   4   5
//! +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+
//! | 0 | 1 | 1 |  TF   |NH | HLIM  |CID|SAC|  SAM  | M |DAC|  DAM  |
//! +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+
//! ```
//!
//! Only the link-local context is live on this mesh, so CID and the
//! stateful SAC/DAC modes are never emitted and are rejected on receipt.

use crate::address::{self, Eui64, LinkContext};
use crate::error::CodecError;
use crate::header::{
    Ipv6Header, UdpHeader, IPV6_HEADER_SIZE, NEXT_HEADER_UDP, UDP_HEADER_SIZE,
};
use bytes::BytesMut;
use tracing::trace;

// First IPHC byte: dispatch plus TF / NH / HLIM fields.
const DISPATCH_IPHC: u8 = 0x60; // 011xxxxx
const DISPATCH_MASK: u8 = 0xE0;
const FL_ELIDED: u8 = 0x10; // TF high bit: flow label compressed
const TC_ELIDED: u8 = 0x08; // TF low bit: traffic class (DSCP) compressed
const NH_COMPRESSED: u8 = 0x04;
const HLIM_MASK: u8 = 0x03;
const HLIM_1: u8 = 0x01;
const HLIM_64: u8 = 0x02;
const HLIM_255: u8 = 0x03;

// Second IPHC byte: context and address modes.
const CID: u8 = 0x80;
const SAC: u8 = 0x40;
const SAM_SHIFT: u8 = 4;
const MULTICAST: u8 = 0x08;
const DAC: u8 = 0x04;
const ADDR_MODE_MASK: u8 = 0x03;
const ADDR_128: u8 = 0x00; // full address inline
const ADDR_64: u8 = 0x01; // prefix elided, 64-bit IID inline
const ADDR_16: u8 = 0x02; // 0000:00ff:fe00:XXXX, 16 bits inline
const ADDR_0: u8 = 0x03; // fully elided, derived from link context

// UDP NHC byte: 11110CPP.
const NHC_UDP: u8 = 0xF0;
const NHC_UDP_MASK: u8 = 0xF8;
const NHC_UDP_CHECKSUM_ELIDED: u8 = 0x04;
const NHC_UDP_PORTS_MASK: u8 = 0x03;
const NHC_UDP_PORTS_DST8: u8 = 0x01;
const NHC_UDP_PORTS_SRC8: u8 = 0x02;
const NHC_UDP_PORTS_4BIT: u8 = 0x03;

// Compressible UDP port bases (from HC06).
const UDP_4BIT_PORT_BASE: u16 = 0xF0B0;
const UDP_8BIT_PORT_BASE: u16 = 0xF000;

/// A compressed packet together with the two out-of-band lengths the
/// receiver needs, since the compressed stream is not self-terminating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedPacket {
    /// Compressed header immediately followed by the payload
    pub bytes: Vec<u8>,
    /// Length of the compressed header portion of `bytes`
    pub header_len: usize,
    /// Length of the payload portion of `bytes`
    pub payload_len: usize,
}

/// Stateless IPHC codec over a fixed link context.
#[derive(Debug, Clone, Copy)]
pub struct HeaderCodec {
    context: LinkContext,
}

impl HeaderCodec {
    /// Create a codec for the link between two endpoints.
    pub fn new(context: LinkContext) -> Self {
        Self { context }
    }

    /// Compress the IPv6 header (and UDP header, when present) of an
    /// uncompressed packet. Fields that match no compressible pattern are
    /// carried inline; the call fails only on a malformed packet.
    pub fn compress(&self, packet: &[u8]) -> Result<CompressedPacket, CodecError> {
        let ip = Ipv6Header::parse(packet)?;
        let udp_compressed = ip.carries_udp(packet.len());

        let mut iphc0 = DISPATCH_IPHC;
        let mut iphc1 = 0u8;
        let mut fields: Vec<u8> = Vec::with_capacity(40);

        // Traffic class and flow label. The traffic class travels in its
        // rotated ECN-first form so partial elision keeps the ECN bits.
        let ecn_dscp = (ip.traffic_class & 0x03) << 6 | (ip.traffic_class >> 2);
        if ip.flow_label == 0 {
            iphc0 |= FL_ELIDED;
            if ip.traffic_class == 0 {
                iphc0 |= TC_ELIDED;
            } else {
                fields.push(ecn_dscp);
            }
        } else if ip.traffic_class >> 2 == 0 {
            // DSCP is zero: carry ECN alongside the flow label
            iphc0 |= TC_ELIDED;
            fields.push((ip.traffic_class & 0x03) << 6 | ((ip.flow_label >> 16) as u8 & 0x0F));
            fields.push((ip.flow_label >> 8) as u8);
            fields.push(ip.flow_label as u8);
        } else {
            fields.push(ecn_dscp);
            fields.push((ip.flow_label >> 16) as u8 & 0x0F);
            fields.push((ip.flow_label >> 8) as u8);
            fields.push(ip.flow_label as u8);
        }

        // Payload length is always elided; it travels out-of-band.

        // Next header: NHC only covers UDP on this mesh.
        if udp_compressed {
            iphc0 |= NH_COMPRESSED;
        } else {
            fields.push(ip.next_header);
        }

        // Hop limit
        match ip.hop_limit {
            1 => iphc0 |= HLIM_1,
            64 => iphc0 |= HLIM_64,
            255 => iphc0 |= HLIM_255,
            other => fields.push(other),
        }

        // Source address. Cannot be multicast.
        let src = ip.source.octets();
        if address::is_unspecified(&src) {
            iphc1 |= SAC;
        } else if address::is_link_local(&src) {
            let mode = compress_iid(&src, &self.context.source_iid, &mut fields);
            iphc1 |= mode << SAM_SHIFT;
        } else {
            fields.extend_from_slice(&src);
        }

        // Destination address
        let dst = ip.destination.octets();
        if address::is_multicast(&dst) {
            iphc1 |= MULTICAST;
            if address::multicast_is_8bit_compressible(&dst) {
                iphc1 |= ADDR_0;
                fields.push(dst[15]);
            } else if address::multicast_is_32bit_compressible(&dst) {
                iphc1 |= ADDR_16;
                fields.push(dst[1]);
                fields.extend_from_slice(&dst[13..16]);
            } else if address::multicast_is_48bit_compressible(&dst) {
                iphc1 |= ADDR_64;
                fields.push(dst[1]);
                fields.extend_from_slice(&dst[11..16]);
            } else {
                fields.extend_from_slice(&dst);
            }
        } else if address::is_link_local(&dst) {
            let mode = compress_iid(&dst, &self.context.destination_iid, &mut fields);
            iphc1 |= mode;
        } else {
            fields.extend_from_slice(&dst);
        }

        // UDP NHC
        if udp_compressed {
            let udp = UdpHeader::parse(packet)?;
            compress_udp(&udp, &mut fields);
        }

        let payload_offset = if udp_compressed {
            IPV6_HEADER_SIZE + UDP_HEADER_SIZE
        } else {
            IPV6_HEADER_SIZE
        };
        let payload = &packet[payload_offset..];

        let header_len = 2 + fields.len();
        let mut bytes = Vec::with_capacity(header_len + payload.len());
        bytes.push(iphc0);
        bytes.push(iphc1);
        bytes.extend_from_slice(&fields);
        bytes.extend_from_slice(payload);

        trace!(
            header_len,
            payload_len = payload.len(),
            saved = packet.len() - bytes.len(),
            "compressed header"
        );

        Ok(CompressedPacket {
            bytes,
            header_len,
            payload_len: payload.len(),
        })
    }

    /// Reconstruct the original uncompressed packet from the compressed
    /// stream and the two out-of-band lengths.
    pub fn decompress(
        &self,
        compressed: &[u8],
        header_len: usize,
        payload_len: usize,
    ) -> Result<Vec<u8>, CodecError> {
        if header_len + payload_len != compressed.len() {
            return Err(CodecError::Decompression(
                "length metadata disagrees with stream length",
            ));
        }
        if header_len < 2 {
            return Err(CodecError::Decompression("compressed header truncated"));
        }

        let iphc0 = compressed[0];
        let iphc1 = compressed[1];
        if iphc0 & DISPATCH_MASK != DISPATCH_IPHC {
            return Err(CodecError::Decompression("not an IPHC dispatch"));
        }
        if iphc1 & CID != 0 {
            return Err(CodecError::Decompression(
                "context identifier extension not supported",
            ));
        }

        let mut cursor = Cursor::new(&compressed[2..header_len]);

        // Traffic class and flow label
        let (traffic_class, flow_label) = match (iphc0 & FL_ELIDED != 0, iphc0 & TC_ELIDED != 0) {
            (true, true) => (0, 0),
            (true, false) => {
                let b = cursor.take_byte()?;
                (b << 2 | b >> 6, 0)
            }
            (false, true) => {
                let b = cursor.take(3)?;
                let tc = b[0] >> 6; // ECN only, DSCP elided
                let flow = ((b[0] as u32 & 0x0F) << 16) | (b[1] as u32) << 8 | b[2] as u32;
                (tc, flow)
            }
            (false, false) => {
                let b = cursor.take(4)?;
                let tc = b[0] << 2 | b[0] >> 6;
                let flow = ((b[1] as u32 & 0x0F) << 16) | (b[2] as u32) << 8 | b[3] as u32;
                (tc, flow)
            }
        };

        let udp_compressed = iphc0 & NH_COMPRESSED != 0;
        let next_header = if udp_compressed {
            NEXT_HEADER_UDP
        } else {
            cursor.take_byte()?
        };

        let hop_limit = match iphc0 & HLIM_MASK {
            HLIM_1 => 1,
            HLIM_64 => 64,
            HLIM_255 => 255,
            _ => cursor.take_byte()?,
        };

        // Source address
        let sam = (iphc1 >> SAM_SHIFT) & ADDR_MODE_MASK;
        let source = if iphc1 & SAC != 0 {
            if sam != ADDR_128 {
                return Err(CodecError::Decompression(
                    "stateful source compression not supported",
                ));
            }
            [0u8; 16]
        } else {
            decompress_iid(sam, &self.context.source_iid, &mut cursor)?
        };

        // Destination address
        let dam = iphc1 & ADDR_MODE_MASK;
        let destination = if iphc1 & MULTICAST != 0 {
            if iphc1 & DAC != 0 {
                return Err(CodecError::Decompression(
                    "stateful multicast compression not supported",
                ));
            }
            let mut addr = [0u8; 16];
            addr[0] = 0xFF;
            match dam {
                ADDR_0 => {
                    addr[1] = 0x02;
                    addr[15] = cursor.take_byte()?;
                }
                ADDR_16 => {
                    let b = cursor.take(4)?;
                    addr[1] = b[0];
                    addr[13..16].copy_from_slice(&b[1..4]);
                }
                ADDR_64 => {
                    let b = cursor.take(6)?;
                    addr[1] = b[0];
                    addr[11..16].copy_from_slice(&b[1..6]);
                }
                _ => {
                    addr.copy_from_slice(cursor.take(16)?);
                }
            }
            addr
        } else {
            if iphc1 & DAC != 0 {
                return Err(CodecError::Decompression(
                    "stateful destination compression not supported",
                ));
            }
            decompress_iid(dam, &self.context.destination_iid, &mut cursor)?
        };

        // UDP NHC
        let udp = if udp_compressed {
            Some(decompress_udp(&mut cursor, payload_len)?)
        } else {
            None
        };

        if !cursor.is_empty() {
            return Err(CodecError::Decompression(
                "dispatch disagrees with header length",
            ));
        }

        let ip_payload_len = payload_len + if udp.is_some() { UDP_HEADER_SIZE } else { 0 };
        let ip = Ipv6Header {
            traffic_class,
            flow_label,
            payload_length: ip_payload_len as u16,
            next_header,
            hop_limit,
            source: source.into(),
            destination: destination.into(),
        };

        let mut out = BytesMut::with_capacity(IPV6_HEADER_SIZE + ip_payload_len);
        ip.encode(&mut out);
        if let Some(udp) = udp {
            udp.encode(&mut out);
        }
        out.extend_from_slice(&compressed[header_len..]);

        Ok(out.to_vec())
    }
}

/// Compress the interface identifier of a link-local address, pushing any
/// inline bytes, and return the two-bit address mode.
fn compress_iid(addr: &[u8; 16], iid: &Eui64, fields: &mut Vec<u8>) -> u8 {
    if address::matches_iid(addr, iid) {
        ADDR_0
    } else if address::iid_is_16bit_compressible(addr) {
        fields.extend_from_slice(&addr[14..16]);
        ADDR_16
    } else {
        fields.extend_from_slice(&addr[8..16]);
        ADDR_64
    }
}

/// Rebuild a unicast address from its two-bit mode and the link context.
fn decompress_iid(
    mode: u8,
    iid: &Eui64,
    cursor: &mut Cursor<'_>,
) -> Result<[u8; 16], CodecError> {
    let mut addr = [0u8; 16];
    match mode {
        ADDR_128 => {
            addr.copy_from_slice(cursor.take(16)?);
        }
        ADDR_64 => {
            addr[0] = 0xFE;
            addr[1] = 0x80;
            addr[8..16].copy_from_slice(cursor.take(8)?);
        }
        ADDR_16 => {
            addr[0] = 0xFE;
            addr[1] = 0x80;
            addr[11] = 0xFF;
            addr[12] = 0xFE;
            addr[14..16].copy_from_slice(cursor.take(2)?);
        }
        _ => {
            addr[0] = 0xFE;
            addr[1] = 0x80;
            addr[8..16].copy_from_slice(&iid.0);
        }
    }
    Ok(addr)
}

/// Compress the UDP header into an NHC byte plus inline fields.
fn compress_udp(udp: &UdpHeader, fields: &mut Vec<u8>) {
    let sp = udp.source_port;
    let dp = udp.destination_port;

    let mut nhc = NHC_UDP;
    let mut ports: Vec<u8> = Vec::with_capacity(4);

    if sp & 0xFFF0 == UDP_4BIT_PORT_BASE && dp & 0xFFF0 == UDP_4BIT_PORT_BASE {
        nhc |= NHC_UDP_PORTS_4BIT;
        ports.push(((sp & 0x0F) as u8) << 4 | (dp & 0x0F) as u8);
    } else if dp & 0xFF00 == UDP_8BIT_PORT_BASE {
        nhc |= NHC_UDP_PORTS_DST8;
        ports.extend_from_slice(&sp.to_be_bytes());
        ports.push((dp & 0xFF) as u8);
    } else if sp & 0xFF00 == UDP_8BIT_PORT_BASE {
        nhc |= NHC_UDP_PORTS_SRC8;
        ports.push((sp & 0xFF) as u8);
        ports.extend_from_slice(&dp.to_be_bytes());
    } else {
        ports.extend_from_slice(&sp.to_be_bytes());
        ports.extend_from_slice(&dp.to_be_bytes());
    }

    if udp.checksum == 0 {
        nhc |= NHC_UDP_CHECKSUM_ELIDED;
    }

    fields.push(nhc);
    fields.extend_from_slice(&ports);
    if udp.checksum != 0 {
        fields.extend_from_slice(&udp.checksum.to_be_bytes());
    }
    // UDP length is always elided; it is re-derived from the payload length.
}

/// Decode the NHC byte and inline fields back into a UDP header.
fn decompress_udp(cursor: &mut Cursor<'_>, payload_len: usize) -> Result<UdpHeader, CodecError> {
    let nhc = cursor.take_byte()?;
    if nhc & NHC_UDP_MASK != NHC_UDP {
        return Err(CodecError::Decompression(
            "unsupported next-header compression",
        ));
    }

    let (source_port, destination_port) = match nhc & NHC_UDP_PORTS_MASK {
        NHC_UDP_PORTS_4BIT => {
            let b = cursor.take_byte()?;
            (
                UDP_4BIT_PORT_BASE | (b >> 4) as u16,
                UDP_4BIT_PORT_BASE | (b & 0x0F) as u16,
            )
        }
        NHC_UDP_PORTS_DST8 => {
            let b = cursor.take(3)?;
            (
                u16::from_be_bytes([b[0], b[1]]),
                UDP_8BIT_PORT_BASE | b[2] as u16,
            )
        }
        NHC_UDP_PORTS_SRC8 => {
            let b = cursor.take(3)?;
            (
                UDP_8BIT_PORT_BASE | b[0] as u16,
                u16::from_be_bytes([b[1], b[2]]),
            )
        }
        _ => {
            let b = cursor.take(4)?;
            (
                u16::from_be_bytes([b[0], b[1]]),
                u16::from_be_bytes([b[2], b[3]]),
            )
        }
    };

    let checksum = if nhc & NHC_UDP_CHECKSUM_ELIDED != 0 {
        0
    } else {
        let b = cursor.take(2)?;
        u16::from_be_bytes([b[0], b[1]])
    };

    Ok(UdpHeader {
        source_port,
        destination_port,
        length: (payload_len + UDP_HEADER_SIZE) as u16,
        checksum,
    })
}

/// Bounds-checked reader over the inline-field region of the compressed
/// header.
struct Cursor<'a> {
    rest: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(rest: &'a [u8]) -> Self {
        Self { rest }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.rest.len() < n {
            return Err(CodecError::Decompression("compressed header truncated"));
        }
        let (head, tail) = self.rest.split_at(n);
        self.rest = tail;
        Ok(head)
    }

    fn take_byte(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn is_empty(&self) -> bool {
        self.rest.is_empty()
    }
}
