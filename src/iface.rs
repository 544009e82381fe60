//! Network interface lookup.
//!
//! The bridge only needs three facts about an interface: its name, its
//! hardware address and its first IPv4 address. `InterfaceDirectory`
//! abstracts the OS enumeration so the controller can be driven by a
//! fixed table in tests.

use std::net::{IpAddr, Ipv4Addr};

use macaddr::MacAddr6;
use pnet::datalink;

/// Addressing facts about one network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetInterface {
    pub name: String,
    pub mac: Option<MacAddr6>,
    pub ipv4: Option<Ipv4Addr>,
}

/// Source of live interfaces by name.
pub trait InterfaceDirectory: Send + Sync {
    /// List the interfaces currently present on the host.
    fn interfaces(&self) -> Vec<NetInterface>;

    /// Look up a single interface by exact name.
    fn find(&self, name: &str) -> Option<NetInterface> {
        self.interfaces().into_iter().find(|iface| iface.name == name)
    }

    /// Names of every interface, in enumeration order.
    fn names(&self) -> Vec<String> {
        self.interfaces().into_iter().map(|iface| iface.name).collect()
    }
}

/// Interface directory backed by `pnet::datalink`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PnetDirectory;

impl InterfaceDirectory for PnetDirectory {
    fn interfaces(&self) -> Vec<NetInterface> {
        datalink::interfaces()
            .into_iter()
            .map(|iface| {
                let mac = iface.mac.map(|m| {
                    let [a, b, c, d, e, f] = m.octets();
                    MacAddr6::new(a, b, c, d, e, f)
                });
                let ipv4 = iface.ips.iter().find_map(|net| match net.ip() {
                    IpAddr::V4(v4) => Some(v4),
                    IpAddr::V6(_) => None,
                });
                NetInterface {
                    name: iface.name,
                    mac,
                    ipv4,
                }
            })
            .collect()
    }
}
