use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Step of capture-binding setup that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    Bind,
    SnapLength,
    Promiscuity,
    Timeout,
    TimestampSource,
    Activation,
    FilterInstall,
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SetupStage::Bind => "bind",
            SetupStage::SnapLength => "snap length",
            SetupStage::Promiscuity => "promiscuous mode",
            SetupStage::Timeout => "read timeout",
            SetupStage::TimestampSource => "timestamp source",
            SetupStage::Activation => "activation",
            SetupStage::FilterInstall => "filter install",
        };
        f.write_str(name)
    }
}

/// Failure to establish a capture binding on an interface.
#[derive(Error, Debug)]
#[error("capture setup on {interface} failed at {stage}: {message}")]
pub struct SetupError {
    pub interface: String,
    pub stage: SetupStage,
    pub message: String,
}

impl SetupError {
    pub fn new(interface: &str, stage: SetupStage, message: impl Into<String>) -> Self {
        Self {
            interface: interface.to_string(),
            stage,
            message: message.into(),
        }
    }
}

/// Errors building a GRE envelope.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum EncapError {
    #[error("interface {0} has no IPv4 address")]
    NoIpv4Address(String),

    #[error("interface {0} has no hardware address")]
    NoHardwareAddress(String),

    #[error("payload of {0} bytes does not fit in one IPv4 datagram")]
    PayloadTooLarge(usize),

    #[error("no room for the {0} header")]
    HeaderSpace(&'static str),
}

/// Errors decoding a captured frame.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("malformed {0} header")]
    Malformed(&'static str),
}

/// The requester address has not been observed yet.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("requester address not yet established")]
pub struct NotEstablished;

/// Errors surfaced by the start/stop control operations.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Precondition(#[from] EncapError),
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ControlError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ControlError::Setup(e) => (
                StatusCode::BAD_REQUEST,
                format!("Unable to start GRE bridge due to capture error: {}", e),
            ),
            ControlError::Precondition(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Unable to start GRE bridge: {}", e),
            ),
        };

        tracing::error!("{}: {}", status, message);
        (status, message).into_response()
    }
}

/// Errors loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}
