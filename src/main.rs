//! Pinhub CLI entry point

mod cli;

use crate::cli::{Cli, Commands};
use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use pinhub::server::DevicesResponse;
use pinhub::{DeviceCommand, HubServer, HubServerConfig, PinId};
use reqwest::Url;
use std::net::SocketAddr;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve { bind, outbound_buffer } => serve(bind, outbound_buffer).await,
        Commands::Devices { url } => devices(&url).await,
        Commands::Command { device_id, pin_id, state, url } => command(&url, &device_id, pin_id, state).await,
    }
}

async fn serve(bind_addr: SocketAddr, outbound_buffer: usize) -> Result<()> {
    let server = HubServer::new(HubServerConfig {
        bind_addr,
        outbound_buffer,
    });

    info!(addr = %bind_addr, "Pinhub starting");
    server.run(shutdown_signal()).await?;
    info!("Pinhub stopped");

    Ok(())
}

async fn devices(url: &str) -> Result<()> {
    let endpoint = api_url(url, &["api", "devices"])?;
    let response: DevicesResponse = reqwest::get(endpoint.clone())
        .await
        .with_context(|| format!("Failed to reach {}", endpoint))?
        .error_for_status()?
        .json()
        .await
        .context("Unexpected response body")?;

    if response.devices.is_empty() {
        println!("(no devices)");
        return Ok(());
    }

    for device in &response.devices {
        let pins: Vec<String> = device
            .pins
            .iter()
            .map(|pin| format!("{}={}", pin.id(), pin.state()))
            .collect();

        println!(
            "{:<24} {:<8} last seen {}  {}",
            device.id,
            if device.online { "online" } else { "offline" },
            device.last_seen.format("%Y-%m-%d %H:%M:%S"),
            pins.join(" ")
        );
    }

    Ok(())
}

async fn command(url: &str, device_id: &str, pin_id: PinId, state: String) -> Result<()> {
    let endpoint = api_url(url, &["api", "devices", device_id, "command"])?;
    let response = reqwest::Client::new()
        .post(endpoint.clone())
        .json(&DeviceCommand::toggle_pin(pin_id, state))
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", endpoint))?;

    let status = response.status();
    let body: serde_json::Value = response.json().await.unwrap_or_default();

    if !status.is_success() {
        let reason = body["error"].as_str().unwrap_or("unknown error");
        bail!("{} ({})", reason, status);
    }

    println!("{}", body["message"].as_str().unwrap_or("Command sent to device"));
    Ok(())
}

/// Append path segments to the hub's base URL, percent-encoding each one
fn api_url(base: &str, segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(base).with_context(|| format!("Invalid hub URL {}", base))?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("Hub URL cannot take a path: {}", base))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping server");
}
