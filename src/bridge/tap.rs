//! Tunnel to LAN direction.

use std::sync::Arc;

use macaddr::MacAddr6;

use super::{FrameHandler, RequesterAddress};
use crate::error::DecodeError;
use crate::gre::{self, DISCOVERY_KEY};
use crate::writer::WriterHandle;

const SRC_MAC: std::ops::Range<usize> = 6..12;

/// Unwraps GRE frames from the tunnel and queues the inner frame for the
/// LAN interface.
///
/// Discovery requests get their source hardware address replaced with the
/// LAN interface's, so LAN devices answer the bridge rather than a host
/// they cannot reach.
pub struct TapDispatcher {
    lan_mac: MacAddr6,
    requester: Arc<RequesterAddress>,
    lan: WriterHandle,
}

impl TapDispatcher {
    pub fn new(lan_mac: MacAddr6, requester: Arc<RequesterAddress>, lan: WriterHandle) -> Self {
        Self {
            lan_mac,
            requester,
            lan,
        }
    }

    /// Copy the inner frame with its source address rewritten, recording
    /// the original source first.
    fn rewrite_source(&self, inner: &[u8]) -> Result<Vec<u8>, DecodeError> {
        let source: [u8; 6] = inner
            .get(SRC_MAC)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(DecodeError::Truncated {
                expected: SRC_MAC.end,
                actual: inner.len(),
            })?;
        self.requester.remember(MacAddr6::from(source));

        let mut rewritten = inner.to_vec();
        rewritten[SRC_MAC].copy_from_slice(self.lan_mac.as_bytes());
        Ok(rewritten)
    }
}

impl FrameHandler for TapDispatcher {
    fn handle(&self, frame: &[u8]) {
        let gre = match gre::decode(frame) {
            Ok(Some(gre)) => gre,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!("Dropping tunnel frame: {}", e);
                return;
            }
        };

        if gre.key == Some(DISCOVERY_KEY) {
            match self.rewrite_source(gre.payload) {
                Ok(rewritten) => self.lan.enqueue(rewritten),
                Err(e) => tracing::warn!("Dropping discovery frame: {}", e),
            }
        } else {
            self.lan.enqueue(gre.payload.to_vec());
        }
    }
}
