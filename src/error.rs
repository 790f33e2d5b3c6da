//! Routing errors
//!
//! The `Display` text of each variant is exactly the `message` observers see
//! in the `error` envelope.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Invalid message format")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid message format")]
    UnsupportedCommand(String),

    #[error("Invalid message format")]
    NotUtf8,
}

/// Why a command could not be handed to a device
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("Device not found")]
    UnknownDevice(String),

    #[error("Device not connected")]
    DeviceOffline(String),
}
