//! Packet capture abstraction.
//!
//! This module defines the `CaptureBackend` trait and the `CaptureSession`
//! run loop built on top of it, plus a libpcap backend. The bridge depends
//! only on the traits, so sessions can be driven from memory in tests.

mod pcap_capture;

pub use pcap_capture::PcapBackend;

use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::bridge::FrameHandler;
use crate::error::{SetupError, SetupStage};

/// Largest snap length accepted, matching libpcap's ceiling.
pub const MAX_SNAP_LEN: usize = 262_144;

/// Pause after a failed read before trying again.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(100);
/// Upper bound on how long a paused loop sleeps between state checks.
const PAUSE_POLL: Duration = Duration::from_millis(100);

const PAUSED: u8 = 0;
const RUNNING: u8 = 1;
const STOPPING: u8 = 2;

/// Receiving half of a capture binding.
pub trait FrameSource: Send {
    /// Wait for the next frame.
    ///
    /// `Ok(None)` means the read timed out without a frame; callers treat it
    /// as a spurious wake.
    fn next_frame(&mut self) -> io::Result<Option<&[u8]>>;
}

/// Transmitting half of a capture binding.
pub trait FrameSink: Send {
    /// Write one complete frame to the interface.
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()>;
}

/// A live binding to one interface. Dropping both halves closes it.
pub struct CaptureBinding {
    pub source: Box<dyn FrameSource>,
    pub sink: Box<dyn FrameSink>,
}

/// Opens capture bindings on named interfaces.
pub trait CaptureBackend: Send + Sync {
    /// Bind to `interface` and install `filter`, so that the source only
    /// yields frames the filter accepts.
    fn open(
        &self,
        interface: &str,
        filter: &str,
        settings: &CaptureSettings,
    ) -> Result<CaptureBinding, SetupError>;
}

/// Binding parameters shared by both sides of the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSettings {
    /// Maximum bytes captured per frame
    pub snap_len: usize,
    /// How long a read blocks before reporting a spurious wake
    pub read_timeout: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            snap_len: 65_536,
            read_timeout: Duration::from_secs(1),
        }
    }
}

impl CaptureSettings {
    fn validate(&self, interface: &str) -> Result<(), SetupError> {
        if self.snap_len == 0 || self.snap_len > MAX_SNAP_LEN {
            return Err(SetupError::new(
                interface,
                SetupStage::SnapLength,
                format!("snap length {} outside 1..={}", self.snap_len, MAX_SNAP_LEN),
            ));
        }
        let millis = self.read_timeout.as_millis();
        if millis == 0 || millis > i32::MAX as u128 {
            return Err(SetupError::new(
                interface,
                SetupStage::Timeout,
                format!(
                    "read timeout {:?} is not a positive number of milliseconds",
                    self.read_timeout
                ),
            ));
        }
        Ok(())
    }
}

/// A filtered capture on one interface, not yet running.
pub struct CaptureSession {
    interface: String,
    filter: String,
    source: Box<dyn FrameSource>,
}

impl CaptureSession {
    /// Bind to `interface` with `filter` installed.
    ///
    /// Returns the session together with the transmit half of the same
    /// binding, which belongs to whichever writer targets this interface.
    pub fn open(
        backend: &dyn CaptureBackend,
        interface: &str,
        filter: &str,
        settings: &CaptureSettings,
    ) -> Result<(Self, Box<dyn FrameSink>), SetupError> {
        settings.validate(interface)?;
        let binding = backend.open(interface, filter, settings)?;

        let session = Self {
            interface: interface.to_string(),
            filter: filter.to_string(),
            source: binding.source,
        };
        Ok((session, binding.sink))
    }

    /// Start the run loop on its own thread, feeding every frame to
    /// `handler`.
    ///
    /// The loop starts paused and reads nothing until
    /// [`SessionHandle::resume`] is called. Frames arriving meanwhile stay
    /// queued in the binding.
    pub fn spawn(self, handler: Box<dyn FrameHandler>) -> io::Result<SessionHandle> {
        let state = Arc::new(AtomicU8::new(PAUSED));
        let (quit_tx, quit_rx) = oneshot::channel();
        let interface = self.interface.clone();

        let loop_state = state.clone();
        let join = thread::Builder::new()
            .name(format!("capture-{}", interface))
            .spawn(move || self.run(handler, loop_state, quit_tx))?;

        Ok(SessionHandle {
            interface,
            state,
            thread: join.thread().clone(),
            quit: quit_rx,
        })
    }

    fn run(
        mut self,
        handler: Box<dyn FrameHandler>,
        state: Arc<AtomicU8>,
        quit: oneshot::Sender<()>,
    ) {
        tracing::info!(
            "{} capture loop started, filter: {}",
            self.interface,
            self.filter
        );

        loop {
            match state.load(Ordering::Acquire) {
                STOPPING => break,
                PAUSED => {
                    thread::park_timeout(PAUSE_POLL);
                    continue;
                }
                _ => {}
            }

            match self.source.next_frame() {
                Ok(Some(frame)) => {
                    if !frame.is_empty() {
                        handler.handle(frame);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!("{} capture error: {}", self.interface, e);
                    thread::sleep(READ_ERROR_BACKOFF);
                }
            }
        }

        tracing::info!("{} capture loop stop received", self.interface);
        let CaptureSession {
            interface, source, ..
        } = self;
        drop(source);
        drop(handler);
        let _ = quit.send(());
        tracing::debug!("{} capture binding closed", interface);
    }
}

/// Control side of a capture session thread.
pub struct SessionHandle {
    interface: String,
    state: Arc<AtomicU8>,
    thread: thread::Thread,
    quit: oneshot::Receiver<()>,
}

impl SessionHandle {
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Let a paused run loop start reading frames.
    pub fn resume(&self) {
        if self
            .state
            .compare_exchange(PAUSED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.thread.unpark();
        }
    }

    /// Ask the run loop to stop after the frame it is handling, if any.
    pub fn signal_stop(&self) {
        self.state.store(STOPPING, Ordering::Release);
        self.thread.unpark();
    }

    /// Wait for the run loop to confirm it closed its binding.
    pub async fn quit(self) -> bool {
        self.quit.await.is_ok()
    }
}
