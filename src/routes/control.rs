//! Start, stop and status handlers.
//!
//! POST /start   {"lan": "eth0", "tap": "tap0"}
//! GET  /stop
//! GET  /status

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::error::ControlError;
use crate::session::{BridgeStatus, SessionController, StartOutcome, StopOutcome};

/// Body of a start request.
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub lan: Option<String>,
    pub tap: Option<String>,
}

/// Handle POST /start
///
/// Bridges the two named interfaces, replacing any running pairing.
pub async fn handle_start(
    State(controller): State<Arc<SessionController>>,
    body: String,
) -> Result<Response, ControlError> {
    tracing::info!("Received /start request");
    tracing::debug!("Start request body: {}", body);

    let request: StartRequest = match serde_json::from_str(&body) {
        Ok(r) => r,
        Err(e) => {
            return Err(ControlError::Validation(format!(
                "HTTP body parse error, expected JSON {}",
                e
            )))
        }
    };

    let (lan, tap) = match (request.lan, request.tap) {
        (Some(lan), Some(tap)) => (lan, tap),
        _ => {
            return Err(ControlError::Validation(
                r#"Unexpected request format, expected JSON body with lan and tap keys: {"lan":"eth0", "tap":"tap0"}"#
                    .to_string(),
            ))
        }
    };

    let message = match controller.start(&lan, &tap).await? {
        StartOutcome::Started => format!("GRE bridge started lan:{} tap:{}\n", lan, tap),
        StartOutcome::Replaced => format!("GRE bridge restarted lan:{} tap:{}\n", lan, tap),
    };
    Ok((StatusCode::OK, message).into_response())
}

/// Handle GET|POST /stop
pub async fn handle_stop(State(controller): State<Arc<SessionController>>) -> Response {
    tracing::info!("Received /stop request");

    let message = match controller.stop().await {
        StopOutcome::Stopped { confirmed: true } => "handler coroutines stopped!\n",
        StopOutcome::Stopped { confirmed: false } => {
            "handler coroutines stopped, capture close not confirmed\n"
        }
        StopOutcome::AlreadyStopped => "handler coroutines already stopped!\n",
    };
    (StatusCode::OK, message).into_response()
}

/// Handle GET /status
pub async fn handle_status(State(controller): State<Arc<SessionController>>) -> Json<BridgeStatus> {
    Json(controller.status().await)
}
