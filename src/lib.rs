//! Broadcast GRE bridge.
//!
//! Relays LAN broadcast discovery traffic into a remote-access tunnel
//! interface wrapped in GRE, and unwraps tunnel traffic back onto the LAN,
//! rewriting the source address of relayed discovery requests.

pub mod bridge;
pub mod capture;
pub mod config;
pub mod error;
pub mod gre;
pub mod iface;
pub mod routes;
pub mod session;
pub mod utils;
pub mod writer;

#[cfg(test)]
pub(crate) mod testing;
