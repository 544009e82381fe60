//! GRE encapsulation of relayed layer-2 frames.

use std::net::Ipv4Addr;

use macaddr::MacAddr6;
use pnet::datalink::MacAddr;
use pnet::packet::ethernet::{EtherTypes, MutableEthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::{self, MutableIpv4Packet};
use pnet::packet::MutablePacket;

use super::{ETHERNET_HEADER_LEN, GRE_BASE_HEADER_LEN, GRE_FLAG_KEY, IPV4_HEADER_LEN};
use crate::error::EncapError;
use crate::iface::NetInterface;

/// Shortest Ethernet frame on the wire, excluding the FCS.
const MIN_ETHERNET_FRAME_LEN: usize = 60;

const GRE_KEYED_HEADER_LEN: usize = GRE_BASE_HEADER_LEN + 4;

/// The remote endpoint expects 7 in the GRE version bits.
const GRE_VERSION: u8 = 7;

const ETHERTYPE_IPV4: u16 = 0x0800;

/// Wraps frames in Ethernet / IPv4 / GRE addressed to the broadcast
/// address, sourced from the tunnel interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encapsulator {
    src_mac: MacAddr6,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
}

impl Encapsulator {
    /// Build an encapsulator sourcing frames from `iface`.
    ///
    /// Both the hardware and the IPv4 address must be known; without them
    /// no valid envelope can be built.
    pub fn for_interface(iface: &NetInterface) -> Result<Self, EncapError> {
        let src_mac = iface
            .mac
            .ok_or_else(|| EncapError::NoHardwareAddress(iface.name.clone()))?;
        let src_ip = iface
            .ipv4
            .ok_or_else(|| EncapError::NoIpv4Address(iface.name.clone()))?;

        Ok(Self {
            src_mac,
            src_ip,
            dst_ip: Ipv4Addr::BROADCAST,
        })
    }

    /// Wrap `payload` in a GRE envelope tagged with `key`.
    pub fn encapsulate(&self, payload: &[u8], key: u32) -> Result<Vec<u8>, EncapError> {
        let ip_len = IPV4_HEADER_LEN + GRE_KEYED_HEADER_LEN + payload.len();
        let total_length =
            u16::try_from(ip_len).map_err(|_| EncapError::PayloadTooLarge(payload.len()))?;

        let frame_len = (ETHERNET_HEADER_LEN + ip_len).max(MIN_ETHERNET_FRAME_LEN);
        let mut frame = vec![0u8; frame_len];

        let mut ethernet =
            MutableEthernetPacket::new(&mut frame).ok_or(EncapError::HeaderSpace("Ethernet"))?;
        ethernet.set_destination(MacAddr::broadcast());
        ethernet.set_source(MacAddr::from(self.src_mac.into_array()));
        ethernet.set_ethertype(EtherTypes::Ipv4);

        // The view spans any padding; the IPv4 payload is bounded by total_length.
        let mut ip = MutableIpv4Packet::new(ethernet.payload_mut())
            .ok_or(EncapError::HeaderSpace("IPv4"))?;
        ip.set_version(4);
        ip.set_header_length((IPV4_HEADER_LEN / 4) as u8);
        ip.set_total_length(total_length);
        ip.set_ttl(u8::MAX);
        ip.set_next_level_protocol(IpNextHeaderProtocols::Gre);
        ip.set_source(self.src_ip);
        ip.set_destination(self.dst_ip);
        let sum = ipv4::checksum(&ip.to_immutable());
        ip.set_checksum(sum);

        let gre = ip.payload_mut();
        gre[0] = GRE_FLAG_KEY;
        gre[1] = GRE_VERSION;
        gre[2..4].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        gre[4..GRE_KEYED_HEADER_LEN].copy_from_slice(&key.to_be_bytes());
        gre[GRE_KEYED_HEADER_LEN..].copy_from_slice(payload);

        Ok(frame)
    }
}
