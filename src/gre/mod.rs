//! GRE framing for the tunnel side of the bridge.
//!
//! Frames on the tunnel interface are Ethernet / IPv4 / GRE with the key
//! bit set; the key tags what kind of layer-2 traffic the payload is.

mod encap;

pub use encap::Encapsulator;

use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;

use crate::error::DecodeError;

/// Key marking inbound discovery/configuration traffic whose source
/// address must be rewritten before it reaches the LAN.
pub const DISCOVERY_KEY: u32 = 0xFFFF_FFFF;

/// Key this bridge applies to layer-2 frames relayed from the LAN.
pub const LAYER2_KEY: u32 = 0x0CB2_0CB2;

pub(crate) const ETHERNET_HEADER_LEN: usize = 14;
pub(crate) const IPV4_HEADER_LEN: usize = 20;
pub(crate) const GRE_BASE_HEADER_LEN: usize = 4;

const GRE_FLAG_CHECKSUM: u8 = 0x80;
const GRE_FLAG_ROUTING: u8 = 0x40;
const GRE_FLAG_KEY: u8 = 0x20;
const GRE_FLAG_SEQUENCE: u8 = 0x10;

/// A decoded GRE envelope borrowing from the captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GreFrame<'a> {
    pub key: Option<u32>,
    pub protocol: u16,
    pub payload: &'a [u8],
}

/// Decode the GRE layer of an Ethernet frame.
///
/// Returns `Ok(None)` when the frame is not IPv4-carried GRE at all, and an
/// error when it claims to be but its headers do not hold together.
pub fn decode(frame: &[u8]) -> Result<Option<GreFrame<'_>>, DecodeError> {
    let Some(ethernet) = EthernetPacket::new(frame) else {
        return Ok(None);
    };
    if ethernet.get_ethertype() != EtherTypes::Ipv4 {
        return Ok(None);
    }

    let ip_bytes = &frame[ETHERNET_HEADER_LEN..];
    let ipv4 = Ipv4Packet::new(ip_bytes).ok_or(DecodeError::Truncated {
        expected: ETHERNET_HEADER_LEN + IPV4_HEADER_LEN,
        actual: frame.len(),
    })?;
    if ipv4.get_next_level_protocol() != IpNextHeaderProtocols::Gre {
        return Ok(None);
    }

    let header_len = usize::from(ipv4.get_header_length()) * 4;
    let total_len = usize::from(ipv4.get_total_length());
    if header_len < IPV4_HEADER_LEN || total_len < header_len || total_len > ip_bytes.len() {
        return Err(DecodeError::Malformed("IPv4"));
    }

    parse_gre(&ip_bytes[header_len..total_len]).map(Some)
}

fn parse_gre(gre: &[u8]) -> Result<GreFrame<'_>, DecodeError> {
    if gre.len() < GRE_BASE_HEADER_LEN {
        return Err(DecodeError::Truncated {
            expected: GRE_BASE_HEADER_LEN,
            actual: gre.len(),
        });
    }

    let flags = gre[0];
    if flags & GRE_FLAG_ROUTING != 0 {
        return Err(DecodeError::Malformed("GRE"));
    }
    let protocol = u16::from_be_bytes([gre[2], gre[3]]);

    let mut offset = GRE_BASE_HEADER_LEN;
    if flags & GRE_FLAG_CHECKSUM != 0 {
        offset += 4;
    }
    let mut key = None;
    if flags & GRE_FLAG_KEY != 0 {
        let bytes = gre.get(offset..offset + 4).ok_or(DecodeError::Truncated {
            expected: offset + 4,
            actual: gre.len(),
        })?;
        key = Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]));
        offset += 4;
    }
    if flags & GRE_FLAG_SEQUENCE != 0 {
        offset += 4;
    }
    if offset > gre.len() {
        return Err(DecodeError::Truncated {
            expected: offset,
            actual: gre.len(),
        });
    }

    Ok(GreFrame {
        key,
        protocol,
        payload: &gre[offset..],
    })
}
