use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::capture::CaptureSettings;
use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/grebridge.conf";
const DEFAULT_PORT: u16 = 8095;
const DEFAULT_SNAP_LEN: usize = 65_536;
const DEFAULT_READ_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_STOP_GRACE_MS: u64 = 2_000;
const DEFAULT_LOG_LEVEL: &str = "info";

/// Capture filter for the LAN interface: IP broadcasts plus PROFINET DCP
/// identify requests.
pub const DEFAULT_LAN_FILTER: &str =
    "(dst 255.255.255.255 and not arp) or (ether[12:2] == 0x8892 and ether[14:2] == 0xfeff)";

/// Capture filter for the tunnel interface.
pub const DEFAULT_TAP_FILTER: &str = "dst 255.255.255.255 and not arp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_address: IpAddr,
    pub port: u16,
    pub lan_filter: String,
    pub tap_filter: String,
    pub snap_len: usize,
    pub read_timeout: Duration,
    pub stop_grace: Duration,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            lan_filter: DEFAULT_LAN_FILTER.to_string(),
            tap_filter: DEFAULT_TAP_FILTER.to_string(),
            snap_len: DEFAULT_SNAP_LEN,
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            stop_grace: Duration::from_millis(DEFAULT_STOP_GRACE_MS),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `path` (if it exists), then apply
    /// `GREBRIDGE_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            config.apply_file(&content)?;
        }

        for key in [
            "bind_address",
            "port",
            "lan_filter",
            "tap_filter",
            "snap_len",
            "read_timeout_ms",
            "stop_grace_ms",
            "log_level",
        ] {
            let var = format!("GREBRIDGE_{}", key.to_uppercase());
            if let Ok(val) = std::env::var(&var) {
                config.set(key, &val)?;
            }
        }

        Ok(config)
    }

    fn apply_file(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                self.set(key.trim(), value.trim())?;
            }
        }
        Ok(())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "bind_address" => self.bind_address = parse(key, value)?,
            "port" => self.port = parse(key, value)?,
            "lan_filter" => self.lan_filter = value.to_string(),
            "tap_filter" => self.tap_filter = value.to_string(),
            "snap_len" => self.snap_len = parse(key, value)?,
            "read_timeout_ms" => self.read_timeout = Duration::from_millis(parse(key, value)?),
            "stop_grace_ms" => self.stop_grace = Duration::from_millis(parse(key, value)?),
            "log_level" => self.log_level = value.to_string(),
            _ => tracing::debug!("Ignoring unknown config key {}", key),
        }
        Ok(())
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            snap_len: self.snap_len,
            read_timeout: self.read_timeout,
        }
    }

    /// Default `tracing` filter directive when `RUST_LOG` is unset.
    pub fn tracing_filter(&self) -> String {
        format!("grebridge={}", self.log_level)
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
