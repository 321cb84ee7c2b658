//! Address classification and the EUI-64 link context.
//!
//! IPHC elides address bits that the receiver can re-derive from the link:
//! the link-local prefix, the interface identifier embedded in a neighbor's
//! address, and the well-known multicast groups. The predicates here decide
//! which of those patterns an address matches.

use std::net::Ipv6Addr;

/// A 64-bit interface identifier in modified EUI-64 form, exactly as it
/// appears in the low 8 bytes of a link-local address (universal/local bit
/// already flipped).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eui64(pub [u8; 8]);

impl Eui64 {
    /// Derive the interface identifier from a 48-bit radio hardware address:
    /// insert `FFFE` into the middle, then flip the universal/local bit.
    pub fn from_radio_address(radio: u64) -> Self {
        let mac = radio.to_be_bytes();
        // mac[2..8] holds the 48-bit address in network order
        let mut iid = [
            mac[2], mac[3], mac[4], 0xFF, 0xFE, mac[5], mac[6], mac[7],
        ];
        iid[0] ^= 0x02;
        Self(iid)
    }

    /// The interface identifier embedded in a link-local address, if any.
    pub fn from_link_local(addr: &Ipv6Addr) -> Option<Self> {
        let octets = addr.octets();
        if !is_link_local(&octets) {
            return None;
        }
        let mut iid = [0u8; 8];
        iid.copy_from_slice(&octets[8..16]);
        Some(Self(iid))
    }

    /// The link-local address carrying this interface identifier.
    pub fn link_local_address(&self) -> Ipv6Addr {
        let mut octets = [0u8; 16];
        octets[0] = 0xFE;
        octets[1] = 0x80;
        octets[8..16].copy_from_slice(&self.0);
        Ipv6Addr::from(octets)
    }
}

/// Interface identifiers of the two link endpoints a packet travels between.
///
/// Compression elides the source address against `source_iid` and the
/// destination address against `destination_iid`; decompression re-derives
/// them the same way. The sender builds the context with its own identifier
/// as source; the receiver mirrors it.
#[derive(Debug, Clone, Copy)]
pub struct LinkContext {
    /// Interface identifier of the packet's source endpoint
    pub source_iid: Eui64,
    /// Interface identifier of the packet's destination endpoint
    pub destination_iid: Eui64,
}

impl LinkContext {
    /// Create a link context from the two endpoint identifiers
    pub fn new(source_iid: Eui64, destination_iid: Eui64) -> Self {
        Self {
            source_iid,
            destination_iid,
        }
    }
}

/// Address is on the link-local prefix `fe80::/64` with zero padding.
pub fn is_link_local(addr: &[u8; 16]) -> bool {
    addr[0] == 0xFE && addr[1] == 0x80 && addr[2..8].iter().all(|&b| b == 0)
}

/// Address is the unspecified address `::`.
pub fn is_unspecified(addr: &[u8; 16]) -> bool {
    addr.iter().all(|&b| b == 0)
}

/// Address is multicast (`ff00::/8`).
pub fn is_multicast(addr: &[u8; 16]) -> bool {
    addr[0] == 0xFF
}

/// The low 64 bits equal the given interface identifier.
pub fn matches_iid(addr: &[u8; 16], iid: &Eui64) -> bool {
    addr[8..16] == iid.0
}

/// The interface identifier reduces to 16 bits: `::0000:00ff:fe00:XXXX`.
pub fn iid_is_16bit_compressible(addr: &[u8; 16]) -> bool {
    addr[8] == 0
        && addr[9] == 0
        && addr[10] == 0
        && addr[11] == 0xFF
        && addr[12] == 0xFE
        && addr[13] == 0
}

/// Multicast address of the form `ff02::00XX` (all-nodes, all-routers, and
/// the rest of the link-local 8-bit group space).
pub fn multicast_is_8bit_compressible(addr: &[u8; 16]) -> bool {
    addr[1] == 0x02 && addr[2..15].iter().all(|&b| b == 0)
}

/// Multicast address of the form `ffXX::00XX:XXXX` (32 bits of group).
pub fn multicast_is_32bit_compressible(addr: &[u8; 16]) -> bool {
    addr[2..13].iter().all(|&b| b == 0)
}

/// Multicast address of the form `ffXX::00XX:XXXX:XXXX` (48 bits of group).
pub fn multicast_is_48bit_compressible(addr: &[u8; 16]) -> bool {
    addr[2..11].iter().all(|&b| b == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eui64_from_radio_address() {
        let iid = Eui64::from_radio_address(0x0000_B827_EB12_34CD);
        assert_eq!(iid.0, [0xBA, 0x27, 0xEB, 0xFF, 0xFE, 0x12, 0x34, 0xCD]);
    }

    #[test]
    fn test_link_local_round_trip() {
        let iid = Eui64::from_radio_address(0x0000_B827_EB12_34CD);
        let addr = iid.link_local_address();
        assert!(is_link_local(&addr.octets()));
        assert_eq!(Eui64::from_link_local(&addr), Some(iid));
        assert!(matches_iid(&addr.octets(), &iid));
    }

    #[test]
    fn test_classification() {
        let ll: Ipv6Addr = "fe80::1".parse().unwrap();
        assert!(is_link_local(&ll.octets()));
        assert!(!is_multicast(&ll.octets()));

        let global: Ipv6Addr = "2001:db8::1".parse().unwrap();
        assert!(!is_link_local(&global.octets()));

        assert!(is_unspecified(&Ipv6Addr::UNSPECIFIED.octets()));
    }

    #[test]
    fn test_16bit_compressible_iid() {
        let addr: Ipv6Addr = "fe80::ff:fe00:1234".parse().unwrap();
        assert!(iid_is_16bit_compressible(&addr.octets()));

        let addr: Ipv6Addr = "fe80::211:22ff:fe33:4455".parse().unwrap();
        assert!(!iid_is_16bit_compressible(&addr.octets()));
    }

    #[test]
    fn test_multicast_ranges() {
        let all_nodes: Ipv6Addr = "ff02::1".parse().unwrap();
        assert!(multicast_is_8bit_compressible(&all_nodes.octets()));

        let solicited: Ipv6Addr = "ff02::1:ff00:1234".parse().unwrap();
        assert!(!multicast_is_8bit_compressible(&solicited.octets()));
        assert!(!multicast_is_32bit_compressible(&solicited.octets()));
        assert!(multicast_is_48bit_compressible(&solicited.octets()));

        let mdns: Ipv6Addr = "ff05::fb".parse().unwrap();
        assert!(!multicast_is_8bit_compressible(&mdns.octets()));
        assert!(multicast_is_32bit_compressible(&mdns.octets()));
    }
}
