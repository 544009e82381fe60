//! libpcap capture backend.

use std::io;

use pcap::{Active, Capture, TimestampType};

use super::{CaptureBackend, CaptureBinding, CaptureSettings, FrameSink, FrameSource};
use crate::error::{SetupError, SetupStage};

/// Snap length of the injection handle, which never delivers frames.
const INJECT_SNAP_LEN: i32 = 64;
/// BPF program matching no frame at all.
const INJECT_FILTER: &str = "less 1";

/// Opens capture handles with libpcap and installs the filter in the
/// kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct PcapBackend;

impl CaptureBackend for PcapBackend {
    fn open(
        &self,
        interface: &str,
        filter: &str,
        settings: &CaptureSettings,
    ) -> Result<CaptureBinding, SetupError> {
        let snap_len = i32::try_from(settings.snap_len).map_err(|_| {
            SetupError::new(interface, SetupStage::SnapLength, "snap length out of range")
        })?;
        let timeout_ms = i32::try_from(settings.read_timeout.as_millis()).map_err(|_| {
            SetupError::new(interface, SetupStage::Timeout, "read timeout out of range")
        })?;

        let mut capture = activate(interface, snap_len, timeout_ms)?;
        install_filter(&mut capture, interface, filter)?;

        // Writes go through their own handle so the run loop owns the
        // reading one outright.
        let mut inject = activate(interface, INJECT_SNAP_LEN, timeout_ms)?;
        install_filter(&mut inject, interface, INJECT_FILTER)?;

        tracing::debug!("Opened pcap handles on {} with filter '{}'", interface, filter);

        Ok(CaptureBinding {
            source: Box::new(PcapSource { capture }),
            sink: Box::new(PcapSink { capture: inject }),
        })
    }
}

/// Create, configure and activate a handle.
///
/// libpcap applies snap length, promiscuity, timeout and timestamp source
/// when the handle is activated, so failures in those steps surface from
/// `open()` and are told apart by their message.
fn activate(
    interface: &str,
    snap_len: i32,
    timeout_ms: i32,
) -> Result<Capture<Active>, SetupError> {
    let inactive = Capture::from_device(interface)
        .map_err(|e| SetupError::new(interface, SetupStage::Bind, e.to_string()))?;

    inactive
        .snaplen(snap_len)
        .promisc(false)
        .timeout(timeout_ms)
        .tstamp_type(TimestampType::Host)
        .open()
        .map_err(|e| activation_error(interface, &e.to_string()))
}

fn install_filter(
    capture: &mut Capture<Active>,
    interface: &str,
    filter: &str,
) -> Result<(), SetupError> {
    capture
        .filter(filter, true)
        .map_err(|e| SetupError::new(interface, SetupStage::FilterInstall, e.to_string()))
}

fn activation_error(interface: &str, message: &str) -> SetupError {
    let lower = message.to_lowercase();

    let timestamp = ["time stamp", "timestamp", "tstamp"]
        .iter()
        .any(|word| lower.contains(word));

    let stage = if lower.contains("promisc") {
        SetupStage::Promiscuity
    } else if timestamp {
        SetupStage::TimestampSource
    } else if lower.contains("no such device") {
        SetupStage::Bind
    } else {
        SetupStage::Activation
    };

    if stage == SetupStage::Activation
        && (lower.contains("permission") || lower.contains("not permitted"))
    {
        return SetupError::new(
            interface,
            stage,
            format!("insufficient permissions (run as root or grant CAP_NET_RAW): {}", message),
        );
    }
    SetupError::new(interface, stage, message)
}

struct PcapSource {
    capture: Capture<Active>,
}

impl FrameSource for PcapSource {
    fn next_frame(&mut self) -> io::Result<Option<&[u8]>> {
        match self.capture.next_packet() {
            Ok(packet) => Ok(Some(packet.data)),
            // Timeout is expected, the caller polls its stop flag
            Err(pcap::Error::TimeoutExpired) => Ok(None),
            Err(e) => Err(io::Error::other(e.to_string())),
        }
    }
}

struct PcapSink {
    capture: Capture<Active>,
}

impl FrameSink for PcapSink {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.capture
            .sendpacket(frame)
            .map_err(|e| io::Error::other(e.to_string()))
    }
}
