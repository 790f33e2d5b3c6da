//! CLI command definitions

use clap::{Parser, Subcommand};
use pinhub::server::transport::{DEFAULT_BIND, DEFAULT_OUTBOUND_BUFFER};
use pinhub::PinId;
use std::net::SocketAddr;

#[derive(Parser)]
#[command(name = "pinhub")]
#[command(about = "Real-time relay hub for IoT devices", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the hub
    Serve {
        /// Address to bind to (HTTP and WebSocket share it)
        #[arg(short, long, env = "PINHUB_BIND", default_value_t = DEFAULT_BIND)]
        bind: SocketAddr,

        /// Frames queued per connection before further ones are dropped
        #[arg(long, env = "PINHUB_OUTBOUND_BUFFER", default_value_t = DEFAULT_OUTBOUND_BUFFER)]
        outbound_buffer: usize,
    },

    /// List devices known to a running hub
    Devices {
        /// Base URL of the hub
        #[arg(long, env = "PINHUB_URL", default_value = "http://localhost:8080")]
        url: String,
    },

    /// Ask a device to set a pin
    ///
    /// Examples:
    ///   pinhub command esp32-kitchen 2 HIGH
    ///   pinhub command porch-light LED LOW --url http://hub.local:8080
    Command {
        /// Target device id
        device_id: String,

        /// Pin id (integers are sent as numbers)
        pin_id: PinId,

        /// Requested state, e.g. HIGH or LOW
        state: String,

        /// Base URL of the hub
        #[arg(long, env = "PINHUB_URL", default_value = "http://localhost:8080")]
        url: String,
    },
}
