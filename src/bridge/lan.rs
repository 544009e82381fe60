//! LAN to tunnel direction.

use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::udp::UdpPacket;
use pnet::packet::Packet;

use super::FrameHandler;
use crate::gre::{Encapsulator, LAYER2_KEY};
use crate::writer::WriterHandle;

/// DHCP server port
const DHCP_SERVER_PORT: u16 = 67;
/// DHCP client port
const DHCP_CLIENT_PORT: u16 = 68;
/// Fixed BOOTP header plus the magic cookie
const DHCP_MIN_LEN: usize = 240;
/// DHCP magic cookie: 0x63825363
const DHCP_MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

/// Wraps LAN broadcasts in GRE and queues them for the tunnel interface.
///
/// ARP and DHCP are link-local and are never relayed.
pub struct LanDispatcher {
    encapsulator: Encapsulator,
    tunnel: WriterHandle,
}

impl LanDispatcher {
    pub fn new(encapsulator: Encapsulator, tunnel: WriterHandle) -> Self {
        Self {
            encapsulator,
            tunnel,
        }
    }
}

impl FrameHandler for LanDispatcher {
    fn handle(&self, frame: &[u8]) {
        if is_link_local(frame) {
            return;
        }

        match self.encapsulator.encapsulate(frame, LAYER2_KEY) {
            Ok(wrapped) => self.tunnel.enqueue(wrapped),
            Err(e) => tracing::warn!("Dropping LAN frame: {}", e),
        }
    }
}

/// Whether the frame is ARP or DHCPv4.
fn is_link_local(frame: &[u8]) -> bool {
    let Some(ethernet) = EthernetPacket::new(frame) else {
        return false;
    };

    match ethernet.get_ethertype() {
        EtherTypes::Arp => true,
        EtherTypes::Ipv4 => is_dhcp(ethernet.payload()),
        _ => false,
    }
}

fn is_dhcp(ip_bytes: &[u8]) -> bool {
    let Some(ipv4) = Ipv4Packet::new(ip_bytes) else {
        return false;
    };
    if ipv4.get_next_level_protocol() != IpNextHeaderProtocols::Udp {
        return false;
    }

    let Some(udp) = UdpPacket::new(ipv4.payload()) else {
        return false;
    };
    if !is_dhcp_port(udp.get_source()) && !is_dhcp_port(udp.get_destination()) {
        return false;
    }

    let payload = udp.payload();
    payload.len() >= DHCP_MIN_LEN && payload[236..240] == DHCP_MAGIC_COOKIE
}

fn is_dhcp_port(port: u16) -> bool {
    port == DHCP_SERVER_PORT || port == DHCP_CLIENT_PORT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gre::decode;
    use crate::iface::NetInterface;
    use crate::testing::{arp_request, dhcp_discover, udp_broadcast};
    use crate::writer::spawn_writer;
    use macaddr::MacAddr6;
    use std::net::Ipv4Addr;

    fn encapsulator() -> Encapsulator {
        Encapsulator::for_interface(&NetInterface {
            name: "tap0".to_string(),
            mac: Some(MacAddr6::new(0x02, 0, 0, 0, 0, 0x01)),
            ipv4: Some(Ipv4Addr::new(10, 36, 0, 2)),
        })
        .unwrap()
    }

    #[test]
    fn test_link_local_classification() {
        assert!(is_link_local(&arp_request()));
        assert!(is_link_local(&dhcp_discover()));
        assert!(!is_link_local(&udp_broadcast(5000, &[1, 2, 3])));
    }

    #[test]
    fn test_dhcp_port_without_bootp_body_is_relayed() {
        // Too short to decode as DHCPv4
        assert!(!is_link_local(&udp_broadcast(67, &[0u8; 32])));
    }

    #[test]
    fn test_only_non_link_local_frames_are_wrapped() {
        let sink = crate::testing::MemorySink::new();
        let written = sink.frames();
        let (writer, join) = spawn_writer("tap0", Box::new(sink)).unwrap();

        let dispatcher = LanDispatcher::new(encapsulator(), writer);
        let discovery = udp_broadcast(34964, &[0xde, 0xad]);

        dispatcher.handle(&arp_request());
        dispatcher.handle(&dhcp_discover());
        dispatcher.handle(&discovery);
        drop(dispatcher);
        join.join().unwrap();

        let written = written.lock().unwrap();
        assert_eq!(written.len(), 1);

        let gre = decode(&written[0]).unwrap().unwrap();
        assert_eq!(gre.key, Some(LAYER2_KEY));
        assert_eq!(gre.payload, discovery.as_slice());
    }
}
