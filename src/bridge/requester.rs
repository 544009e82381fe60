//! Hardware address of the device that issued the first relayed
//! discovery request.

use std::sync::OnceLock;

use macaddr::MacAddr6;

use crate::error::NotEstablished;
use crate::utils::format_mac;

/// Set-once latch holding the original requester's hardware address.
///
/// Only one requester is tracked; later discovery requests from other
/// hosts do not replace it.
#[derive(Debug, Default)]
pub struct RequesterAddress {
    slot: OnceLock<MacAddr6>,
}

impl RequesterAddress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `addr` unless an address is already held.
    pub fn remember(&self, addr: MacAddr6) {
        if self.slot.set(addr).is_ok() {
            tracing::info!("Requester hardware address established: {}", format_mac(&addr));
        }
    }

    pub fn recall(&self) -> Result<MacAddr6, NotEstablished> {
        self.slot.get().copied().ok_or(NotEstablished)
    }
}
