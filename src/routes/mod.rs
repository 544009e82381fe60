//! HTTP control surface.

pub mod control;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;

use crate::session::SessionController;

/// HTTP request logging middleware.
///
/// Logs each request in format: "IP METHOD PATH - STATUS"
async fn request_logging(request: Request<Body>, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "-".to_string());
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    let status = response.status();
    tracing::info!("{} {} {} - {}", peer, method, uri, status.as_u16());

    response
}

/// Create the control router.
pub fn create_router(controller: Arc<SessionController>) -> Router {
    Router::new()
        .route("/start", post(control::handle_start))
        .route("/stop", get(control::handle_stop).post(control::handle_stop))
        .route("/status", get(control::handle_status))
        .layer(middleware::from_fn(request_logging))
        .with_state(controller)
}
