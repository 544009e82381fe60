//! Start/stop coordination for the LAN and tunnel capture sessions.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::bridge::{LanDispatcher, RequesterAddress, TapDispatcher};
use crate::capture::{CaptureBackend, CaptureSession, CaptureSettings, SessionHandle};
use crate::config::{Config, DEFAULT_LAN_FILTER, DEFAULT_TAP_FILTER};
use crate::error::{ControlError, SetupError, SetupStage};
use crate::gre::Encapsulator;
use crate::iface::{InterfaceDirectory, NetInterface};
use crate::utils::format_mac;
use crate::writer::spawn_writer;

/// Parameters applied to every pairing the controller starts.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub lan_filter: String,
    pub tap_filter: String,
    pub capture: CaptureSettings,
    /// How long a stop waits for both sessions to confirm they closed
    pub stop_grace: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            lan_filter: DEFAULT_LAN_FILTER.to_string(),
            tap_filter: DEFAULT_TAP_FILTER.to_string(),
            capture: CaptureSettings::default(),
            stop_grace: Duration::from_secs(2),
        }
    }
}

impl From<&Config> for BridgeSettings {
    fn from(config: &Config) -> Self {
        Self {
            lan_filter: config.lan_filter.clone(),
            tap_filter: config.tap_filter.clone(),
            capture: config.capture_settings(),
            stop_grace: config.stop_grace,
        }
    }
}

/// Result of a successful start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A running pairing was stopped to make way for the new one
    Replaced,
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The pairing was signalled; `confirmed` is false when the grace delay
    /// ran out before both sessions acknowledged.
    Stopped { confirmed: bool },
    AlreadyStopped,
}

/// Snapshot of the controller for the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeStatus {
    pub active: bool,
    pub lan: Option<String>,
    pub tap: Option<String>,
    pub requester: Option<String>,
}

struct Pairing {
    lan: SessionHandle,
    tap: SessionHandle,
}

/// Owns the single active LAN/tunnel pairing.
///
/// Start and stop hold the pairing lock for their whole sequence, so two
/// overlapping starts cannot both believe they own the bridge.
pub struct SessionController {
    directory: Arc<dyn InterfaceDirectory>,
    backend: Arc<dyn CaptureBackend>,
    settings: BridgeSettings,
    requester: Arc<RequesterAddress>,
    active: Mutex<Option<Pairing>>,
}

impl SessionController {
    pub fn new(
        directory: Arc<dyn InterfaceDirectory>,
        backend: Arc<dyn CaptureBackend>,
        settings: BridgeSettings,
    ) -> Self {
        Self {
            directory,
            backend,
            settings,
            requester: Arc::new(RequesterAddress::new()),
            active: Mutex::new(None),
        }
    }

    /// Bridge `lan` and `tap`, replacing any running pairing.
    ///
    /// Everything that can fail happens before the running pairing is
    /// touched, so a failed start leaves the bridge as it was.
    pub async fn start(&self, lan: &str, tap: &str) -> Result<StartOutcome, ControlError> {
        let mut active = self.active.lock().await;

        let (lan_iface, tap_iface) = self.resolve(lan, tap)?;
        let lan_mac = lan_iface.mac.ok_or_else(|| {
            ControlError::Validation(format!("interface {} has no hardware address", lan))
        })?;
        let encapsulator = Encapsulator::for_interface(&tap_iface)?;

        let (lan_session, lan_sink) = CaptureSession::open(
            &*self.backend,
            lan,
            &self.settings.lan_filter,
            &self.settings.capture,
        )?;
        // On failure the LAN binding is dropped, and closed, before returning.
        let (tap_session, tap_sink) = CaptureSession::open(
            &*self.backend,
            tap,
            &self.settings.tap_filter,
            &self.settings.capture,
        )?;

        let (lan_writer, _) = spawn_writer(lan, lan_sink).map_err(|e| thread_error(lan, e))?;
        let (tap_writer, _) = spawn_writer(tap, tap_sink).map_err(|e| thread_error(tap, e))?;

        let lan_handler = LanDispatcher::new(encapsulator, tap_writer);
        let tap_handler = TapDispatcher::new(lan_mac, self.requester.clone(), lan_writer);

        // Both loops start paused, so the running pairing keeps bridging
        // until the new one is fully in place.
        let lan_handle = lan_session
            .spawn(Box::new(lan_handler))
            .map_err(|e| thread_error(lan, e))?;
        let tap_handle = match tap_session.spawn(Box::new(tap_handler)) {
            Ok(handle) => handle,
            Err(e) => {
                lan_handle.signal_stop();
                if tokio::time::timeout(self.settings.stop_grace, lan_handle.quit())
                    .await
                    .is_err()
                {
                    tracing::warn!("{} capture loop did not confirm stop", lan);
                }
                return Err(thread_error(tap, e).into());
            }
        };

        let outcome = match active.take() {
            Some(previous) => {
                tracing::info!(
                    "Replacing running bridge {} <-> {}",
                    previous.lan.interface(),
                    previous.tap.interface()
                );
                self.shutdown(previous).await;
                StartOutcome::Replaced
            }
            None => StartOutcome::Started,
        };

        lan_handle.resume();
        tap_handle.resume();

        *active = Some(Pairing {
            lan: lan_handle,
            tap: tap_handle,
        });
        tracing::info!("Start request success lan:{} tap:{}", lan, tap);

        Ok(outcome)
    }

    /// Stop the running pairing, if any.
    pub async fn stop(&self) -> StopOutcome {
        let mut active = self.active.lock().await;

        match active.take() {
            Some(pairing) => {
                let confirmed = self.shutdown(pairing).await;
                tracing::info!("Bridge stopped");
                StopOutcome::Stopped { confirmed }
            }
            None => {
                tracing::info!("Bridge already stopped");
                StopOutcome::AlreadyStopped
            }
        }
    }

    pub async fn status(&self) -> BridgeStatus {
        let active = self.active.lock().await;
        BridgeStatus {
            active: active.is_some(),
            lan: active.as_ref().map(|p| p.lan.interface().to_string()),
            tap: active.as_ref().map(|p| p.tap.interface().to_string()),
            requester: self.requester.recall().ok().map(|mac| format_mac(&mac)),
        }
    }

    fn resolve(&self, lan: &str, tap: &str) -> Result<(NetInterface, NetInterface), ControlError> {
        if lan.is_empty() || tap.is_empty() {
            return Err(ControlError::Validation(format!(
                "Unexpected request, did not find lan '{}' tap '{}'",
                lan, tap
            )));
        }

        match (self.directory.find(lan), self.directory.find(tap)) {
            (Some(lan_iface), Some(tap_iface)) => Ok((lan_iface, tap_iface)),
            (lan_iface, tap_iface) => {
                let missing = match (lan_iface, tap_iface) {
                    (None, None) => format!("interfaces {} and {}", lan, tap),
                    (None, _) => format!("interface {}", lan),
                    _ => format!("interface {}", tap),
                };
                Err(ControlError::Validation(format!(
                    "{} not found, host interfaces are: {}",
                    missing,
                    self.directory.names().join(", ")
                )))
            }
        }
    }

    /// Signal both sessions and wait, bounded by the grace delay, for both
    /// to confirm their bindings are closed.
    async fn shutdown(&self, pairing: Pairing) -> bool {
        let Pairing { lan, tap } = pairing;
        lan.signal_stop();
        tap.signal_stop();

        let acks = async move {
            let (lan_ok, tap_ok) = tokio::join!(lan.quit(), tap.quit());
            lan_ok && tap_ok
        };

        match tokio::time::timeout(self.settings.stop_grace, acks).await {
            Ok(confirmed) => confirmed,
            Err(_) => {
                tracing::warn!(
                    "Capture sessions did not confirm stop within {:?}",
                    self.settings.stop_grace
                );
                false
            }
        }
    }
}

fn thread_error(interface: &str, e: io::Error) -> SetupError {
    SetupError::new(
        interface,
        SetupStage::Activation,
        format!("failed to spawn thread: {}", e),
    )
}
