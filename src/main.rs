//! grebridge - broadcast GRE bridge daemon
//!
//! Bridges a LAN interface and a tunnel interface either directly from the
//! command line or on demand through the HTTP control surface.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;

use grebridge::capture::PcapBackend;
use grebridge::config::{Config, DEFAULT_CONFIG_PATH};
use grebridge::iface::PnetDirectory;
use grebridge::routes;
use grebridge::session::{BridgeSettings, SessionController};

#[derive(Parser)]
#[command(name = "grebridge")]
#[command(about = "Relays LAN broadcast traffic through a tunnel interface using GRE")]
struct Args {
    /// LAN interface name, e.g. eth0
    #[arg(long)]
    lan: Option<String>,

    /// Tunnel interface name, e.g. tap0
    #[arg(long)]
    tap: Option<String>,

    /// Run the HTTP control server instead of bridging immediately
    #[arg(long)]
    server: bool,

    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Control server bind address
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Control server port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config {:?}", args.config))?;
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.tracing_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let controller = Arc::new(SessionController::new(
        Arc::new(PnetDirectory),
        Arc::new(PcapBackend),
        BridgeSettings::from(&config),
    ));

    if args.server {
        run_server(&config, controller.clone()).await?;
    } else {
        let (Some(lan), Some(tap)) = (args.lan.as_deref(), args.tap.as_deref()) else {
            bail!("Missing flag(s); run with both --lan and --tap, or with --server");
        };
        controller.start(lan, tap).await?;
        shutdown_signal().await?;
    }

    controller.stop().await;
    tracing::info!("grebridge stopped");
    Ok(())
}

async fn run_server(config: &Config, controller: Arc<SessionController>) -> Result<()> {
    let addr = SocketAddr::new(config.bind_address, config.port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Control server listening on {}", addr);

    let app = routes::create_router(controller);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            if let Err(e) = shutdown_signal().await {
                tracing::error!("Signal handling failed: {}", e);
            }
        })
        .await?;

    Ok(())
}

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, shutting down");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, shutting down");
        }
    }
    Ok(())
}
