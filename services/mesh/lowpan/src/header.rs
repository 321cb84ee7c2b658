//! Uncompressed IPv6 and UDP header views.
//!
//! Parsed field-at-a-time from the packet buffer so the compressor can make
//! per-field decisions, and re-encoded the same way during decompression.

use crate::error::CodecError;
use bytes::{Buf, BufMut, BytesMut};
use std::net::Ipv6Addr;

/// Uncompressed IPv6 header size in bytes
pub const IPV6_HEADER_SIZE: usize = 40;

/// Uncompressed UDP header size in bytes
pub const UDP_HEADER_SIZE: usize = 8;

/// IP protocol number for UDP
pub const NEXT_HEADER_UDP: u8 = 17;

/// A parsed 40-byte IPv6 header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6Header {
    /// 8-bit traffic class (ECN in the low 2 bits)
    pub traffic_class: u8,
    /// 20-bit flow label
    pub flow_label: u32,
    /// Length of everything after this header
    pub payload_length: u16,
    /// Next header protocol number
    pub next_header: u8,
    /// Hop limit
    pub hop_limit: u8,
    /// Source address
    pub source: Ipv6Addr,
    /// Destination address
    pub destination: Ipv6Addr,
}

impl Ipv6Header {
    /// Parse the header from the front of an uncompressed packet.
    pub fn parse(packet: &[u8]) -> Result<Self, CodecError> {
        if packet.len() < IPV6_HEADER_SIZE {
            return Err(CodecError::MalformedPacket(packet.len()));
        }

        let mut buf = &packet[..IPV6_HEADER_SIZE];
        let vtcfl = buf.get_u32();

        let version = (vtcfl >> 28) as u8;
        if version != 6 {
            return Err(CodecError::Version(version));
        }

        let traffic_class = ((vtcfl >> 20) & 0xFF) as u8;
        let flow_label = vtcfl & 0x000F_FFFF;
        let payload_length = buf.get_u16();
        let next_header = buf.get_u8();
        let hop_limit = buf.get_u8();

        let mut source = [0u8; 16];
        buf.copy_to_slice(&mut source);
        let mut destination = [0u8; 16];
        buf.copy_to_slice(&mut destination);

        Ok(Self {
            traffic_class,
            flow_label,
            payload_length,
            next_header,
            hop_limit,
            source: Ipv6Addr::from(source),
            destination: Ipv6Addr::from(destination),
        })
    }

    /// Encode the header into its 40-byte wire form.
    pub fn encode(&self, buf: &mut BytesMut) {
        let vtcfl = (6u32 << 28)
            | ((self.traffic_class as u32) << 20)
            | (self.flow_label & 0x000F_FFFF);
        buf.put_u32(vtcfl);
        buf.put_u16(self.payload_length);
        buf.put_u8(self.next_header);
        buf.put_u8(self.hop_limit);
        buf.put_slice(&self.source.octets());
        buf.put_slice(&self.destination.octets());
    }

    /// Whether the packet carries a compressible UDP header.
    pub fn carries_udp(&self, packet_len: usize) -> bool {
        self.next_header == NEXT_HEADER_UDP && packet_len >= IPV6_HEADER_SIZE + UDP_HEADER_SIZE
    }
}

/// A parsed 8-byte UDP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    /// Source port
    pub source_port: u16,
    /// Destination port
    pub destination_port: u16,
    /// Header plus payload length
    pub length: u16,
    /// Checksum (zero when not computed)
    pub checksum: u16,
}

impl UdpHeader {
    /// Parse the UDP header following the IPv6 header.
    pub fn parse(packet: &[u8]) -> Result<Self, CodecError> {
        if packet.len() < IPV6_HEADER_SIZE + UDP_HEADER_SIZE {
            return Err(CodecError::MalformedPacket(packet.len()));
        }

        let mut buf = &packet[IPV6_HEADER_SIZE..IPV6_HEADER_SIZE + UDP_HEADER_SIZE];
        Ok(Self {
            source_port: buf.get_u16(),
            destination_port: buf.get_u16(),
            length: buf.get_u16(),
            checksum: buf.get_u16(),
        })
    }

    /// Encode the header into its 8-byte wire form.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.source_port);
        buf.put_u16(self.destination_port);
        buf.put_u16(self.length);
        buf.put_u16(self.checksum);
    }
}

/// Read the destination address out of an uncompressed packet without
/// parsing the rest of the header.
pub fn destination_address(packet: &[u8]) -> Result<Ipv6Addr, CodecError> {
    if packet.len() < IPV6_HEADER_SIZE {
        return Err(CodecError::MalformedPacket(packet.len()));
    }
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&packet[24..40]);
    Ok(Ipv6Addr::from(octets))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Ipv6Header {
        Ipv6Header {
            traffic_class: 0x2E,
            flow_label: 0x5_4321,
            payload_length: 24,
            next_header: NEXT_HEADER_UDP,
            hop_limit: 64,
            source: "fe80::1".parse().unwrap(),
            destination: "fe80::2".parse().unwrap(),
        }
    }

    #[test]
    fn test_ipv6_header_encode_parse() {
        let header = sample_header();
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), IPV6_HEADER_SIZE);

        let parsed = Ipv6Header::parse(&buf).unwrap();
        assert_eq!(header, parsed);
    }

    #[test]
    fn test_parse_rejects_short_buffer() {
        assert_eq!(
            Ipv6Header::parse(&[0u8; 39]),
            Err(CodecError::MalformedPacket(39))
        );
    }

    #[test]
    fn test_parse_rejects_wrong_version() {
        let mut buf = BytesMut::new();
        sample_header().encode(&mut buf);
        buf[0] = 0x45; // IPv4 version nibble
        assert_eq!(Ipv6Header::parse(&buf), Err(CodecError::Version(4)));
    }

    #[test]
    fn test_udp_header_encode_parse() {
        let udp = UdpHeader {
            source_port: 0xF0B1,
            destination_port: 5683,
            length: 16,
            checksum: 0xBEEF,
        };

        let mut buf = BytesMut::new();
        sample_header().encode(&mut buf);
        udp.encode(&mut buf);

        let parsed = UdpHeader::parse(&buf).unwrap();
        assert_eq!(udp, parsed);
    }

    #[test]
    fn test_destination_address() {
        let mut buf = BytesMut::new();
        sample_header().encode(&mut buf);
        let dst = destination_address(&buf).unwrap();
        assert_eq!(dst, "fe80::2".parse::<Ipv6Addr>().unwrap());
    }
}
