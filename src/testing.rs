//! In-memory capture backend, interface table and frame builders for tests.

use std::collections::HashMap;
use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use macaddr::MacAddr6;

use crate::bridge::FrameHandler;
use crate::capture::{CaptureBackend, CaptureBinding, CaptureSettings, FrameSink, FrameSource};
use crate::error::{SetupError, SetupStage};
use crate::iface::{InterfaceDirectory, NetInterface};

const POLL: Duration = Duration::from_millis(5);

pub type Frames = Arc<Mutex<Vec<Vec<u8>>>>;

struct BindingRecord {
    filter: String,
    inject: Sender<Vec<u8>>,
    closed: Arc<AtomicBool>,
    written: Frames,
}

#[derive(Default)]
struct Interface {
    fail_open: bool,
    stall: Option<Duration>,
    bindings: Vec<BindingRecord>,
}

/// Capture backend whose bindings are fed and observed from the test.
#[derive(Default)]
pub struct MemoryBackend {
    interfaces: Mutex<HashMap<String, Interface>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_interface(&self, name: &str) {
        self.interfaces
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default();
    }

    /// Make every later `open` on `name` fail at activation.
    pub fn fail_open(&self, name: &str) {
        self.add_interface(name);
        if let Some(iface) = self.interfaces.lock().unwrap().get_mut(name) {
            iface.fail_open = true;
        }
    }

    /// Make every read on later bindings of `name` block for `stall`.
    pub fn stall_reads(&self, name: &str, stall: Duration) {
        self.add_interface(name);
        if let Some(iface) = self.interfaces.lock().unwrap().get_mut(name) {
            iface.stall = Some(stall);
        }
    }

    pub fn open_count(&self, name: &str) -> usize {
        self.interfaces
            .lock()
            .unwrap()
            .get(name)
            .map_or(0, |iface| iface.bindings.len())
    }

    /// Whether the most recent binding on `name` has closed its capture side.
    pub fn is_closed(&self, name: &str) -> bool {
        self.with_latest(name, |b| b.closed.load(Ordering::SeqCst))
    }

    /// Filter installed on the most recent binding on `name`.
    pub fn installed_filter(&self, name: &str) -> String {
        self.with_latest(name, |b| b.filter.clone())
    }

    /// Deliver a frame to the most recent binding on `name`.
    pub fn inject(&self, name: &str, frame: Vec<u8>) {
        self.with_latest(name, |b| {
            let _ = b.inject.send(frame);
        })
    }

    /// Frames written to the most recent binding on `name`.
    pub fn written(&self, name: &str) -> Frames {
        self.with_latest(name, |b| b.written.clone())
    }

    fn with_latest<T>(&self, name: &str, f: impl FnOnce(&BindingRecord) -> T) -> T {
        let interfaces = self.interfaces.lock().unwrap();
        let binding = interfaces
            .get(name)
            .and_then(|iface| iface.bindings.last())
            .unwrap_or_else(|| panic!("no binding opened on {}", name));
        f(binding)
    }
}

impl CaptureBackend for MemoryBackend {
    fn open(
        &self,
        interface: &str,
        filter: &str,
        _settings: &CaptureSettings,
    ) -> Result<CaptureBinding, SetupError> {
        let mut interfaces = self.interfaces.lock().unwrap();
        let iface = interfaces
            .get_mut(interface)
            .ok_or_else(|| SetupError::new(interface, SetupStage::Bind, "interface not found"))?;
        if iface.fail_open {
            return Err(SetupError::new(
                interface,
                SetupStage::Activation,
                "activation refused",
            ));
        }

        let (tx, rx) = mpsc::channel();
        let closed = Arc::new(AtomicBool::new(false));
        let written = Frames::default();
        iface.bindings.push(BindingRecord {
            filter: filter.to_string(),
            inject: tx,
            closed: closed.clone(),
            written: written.clone(),
        });

        Ok(CaptureBinding {
            source: Box::new(MemorySource {
                rx,
                current: Vec::new(),
                closed,
                stall: iface.stall,
            }),
            sink: Box::new(MemorySink { frames: written }),
        })
    }
}

struct MemorySource {
    rx: Receiver<Vec<u8>>,
    current: Vec<u8>,
    closed: Arc<AtomicBool>,
    stall: Option<Duration>,
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> io::Result<Option<&[u8]>> {
        if let Some(stall) = self.stall {
            std::thread::sleep(stall);
            return Ok(None);
        }
        match self.rx.recv_timeout(POLL) {
            Ok(frame) => {
                self.current = frame;
                Ok(Some(self.current.as_slice()))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                std::thread::sleep(POLL);
                Ok(None)
            }
        }
    }
}

impl Drop for MemorySource {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Sink recording every frame written to it.
#[derive(Default)]
pub struct MemorySink {
    frames: Frames,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Frames {
        self.frames.clone()
    }
}

impl FrameSink for MemorySink {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.frames.lock().unwrap().push(frame.to_vec());
        Ok(())
    }
}

/// Handler recording every frame it is given.
#[derive(Default)]
pub struct RecordingHandler {
    frames: Frames,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Frames {
        self.frames.clone()
    }
}

impl FrameHandler for RecordingHandler {
    fn handle(&self, frame: &[u8]) {
        self.frames.lock().unwrap().push(frame.to_vec());
    }
}

/// Fixed interface table.
#[derive(Default)]
pub struct MemoryDirectory {
    interfaces: Mutex<Vec<NetInterface>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, name: &str, last_octet: u8) {
        self.interfaces.lock().unwrap().push(NetInterface {
            name: name.to_string(),
            mac: Some(MacAddr6::new(0x02, 0x00, 0x00, 0x00, 0x00, last_octet)),
            ipv4: Some(Ipv4Addr::new(10, 0, 0, last_octet)),
        });
    }

    pub fn add_without_ipv4(&self, name: &str, last_octet: u8) {
        self.interfaces.lock().unwrap().push(NetInterface {
            name: name.to_string(),
            mac: Some(MacAddr6::new(0x02, 0x00, 0x00, 0x00, 0x00, last_octet)),
            ipv4: None,
        });
    }
}

impl InterfaceDirectory for MemoryDirectory {
    fn interfaces(&self) -> Vec<NetInterface> {
        self.interfaces.lock().unwrap().clone()
    }
}

/// Poll `cond` until it holds, failing the test after two seconds.
pub async fn wait_for(cond: impl Fn() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(POLL).await;
    }
    panic!("condition not met within 2s");
}

const HOST_MAC: [u8; 6] = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];

/// Broadcast IPv4/UDP frame from 192.168.1.10.
pub fn udp_frame(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::new();
    frame.extend_from_slice(&[0xff; 6]);
    frame.extend_from_slice(&HOST_MAC);
    frame.extend_from_slice(&[0x08, 0x00]);

    let total = (20 + 8 + payload.len()) as u16;
    frame.extend_from_slice(&[0x45, 0x00]);
    frame.extend_from_slice(&total.to_be_bytes());
    frame.extend_from_slice(&[0, 0, 0, 0, 64, 17, 0, 0]);
    frame.extend_from_slice(&[192, 168, 1, 10]);
    frame.extend_from_slice(&[255, 255, 255, 255]);

    frame.extend_from_slice(&src_port.to_be_bytes());
    frame.extend_from_slice(&dst_port.to_be_bytes());
    frame.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
    frame.extend_from_slice(&[0, 0]);
    frame.extend_from_slice(payload);
    frame
}

pub fn udp_broadcast(dst_port: u16, payload: &[u8]) -> Vec<u8> {
    udp_frame(49152, dst_port, payload)
}

/// DHCPDISCOVER from HOST_MAC.
pub fn dhcp_discover() -> Vec<u8> {
    let mut bootp = vec![0u8; 244];
    bootp[0] = 1;
    bootp[1] = 1;
    bootp[2] = 6;
    bootp[28..34].copy_from_slice(&HOST_MAC);
    bootp[236..240].copy_from_slice(&[0x63, 0x82, 0x53, 0x63]);
    bootp[240..244].copy_from_slice(&[53, 1, 1, 255]);
    udp_frame(68, 67, &bootp)
}

/// Broadcast ARP who-has for 192.168.1.1.
pub fn arp_request() -> Vec<u8> {
    let mut frame = Vec::new();
    frame.extend_from_slice(&[0xff; 6]);
    frame.extend_from_slice(&HOST_MAC);
    frame.extend_from_slice(&[0x08, 0x06]);
    frame.extend_from_slice(&[0x00, 0x01, 0x08, 0x00, 6, 4, 0x00, 0x01]);
    frame.extend_from_slice(&HOST_MAC);
    frame.extend_from_slice(&[192, 168, 1, 10]);
    frame.extend_from_slice(&[0; 6]);
    frame.extend_from_slice(&[192, 168, 1, 1]);
    frame
}
