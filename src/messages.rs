//! Wire envelopes for the persistent connection
//!
//! Every frame is a flat JSON object tagged by `type`, with camelCase fields.

use crate::error::RouteError;
use crate::registry::{ClientView, PinId, PinReport};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// The only command accepted over the socket
pub const TOGGLE_PIN: &str = "toggle_pin";

/// Messages from devices and observers to the hub
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A device identifying itself with its full pin set
    DeviceInfo {
        id: String,
        pins: Vec<PinReport>,
        #[serde(default)]
        capabilities: Option<Value>,
    },
    /// A device reporting a change on one of its own pins
    #[serde(rename_all = "camelCase")]
    PinStateUpdate { id: String, pin_id: PinId, state: String },
    /// An observer asking a device to change a pin
    #[serde(rename_all = "camelCase")]
    Command {
        command: String,
        device_id: String,
        pin_id: PinId,
        state: String,
    },
    /// A device reporting a sensor reading
    SensorData {
        id: String,
        sensor: String,
        /// `None` only when the key is absent; an explicit `null` is kept
        #[serde(default, deserialize_with = "present")]
        value: Option<Value>,
    },
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl ClientMessage {
    pub fn decode(text: &str) -> Result<Self, RouteError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::DeviceInfo { .. } => "device_info",
            ClientMessage::PinStateUpdate { .. } => "pin_state_update",
            ClientMessage::Command { .. } => "command",
            ClientMessage::SensorData { .. } => "sensor_data",
        }
    }
}

/// A command forwarded to a device
///
/// Over the socket only `toggle_pin` with both pin and state is accepted; the
/// HTTP surface may forward any command, with or without a pin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCommand {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin_id: Option<PinId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl DeviceCommand {
    pub fn toggle_pin(pin_id: PinId, state: impl Into<String>) -> Self {
        Self {
            command: TOGGLE_PIN.to_string(),
            pin_id: Some(pin_id),
            state: Some(state.into()),
        }
    }
}

/// Messages from the hub to devices and observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Registration accepted
    DeviceInfoAck { id: String },
    /// Full snapshot of every known device
    DevicesList { devices: Vec<ClientView> },
    /// A pin changed on some device
    #[serde(rename_all = "camelCase")]
    PinStateUpdate {
        device_id: String,
        pin_id: PinId,
        state: String,
        value: bool,
    },
    /// Forwarded to the addressed device
    Command(DeviceCommand),
    /// The command reached the device's connection
    #[serde(rename_all = "camelCase")]
    CommandAck {
        command: String,
        device_id: String,
        pin_id: PinId,
        state: String,
        message: String,
    },
    /// A new sensor reading
    #[serde(rename_all = "camelCase")]
    SensorUpdate {
        device_id: String,
        sensor: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pin_id: Option<PinId>,
        message: String,
    },
}

impl ServerMessage {
    /// Plain error with no command context
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            command: None,
            device_id: None,
            pin_id: None,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::DeviceInfoAck { .. } => "device_info_ack",
            ServerMessage::DevicesList { .. } => "devices_list",
            ServerMessage::PinStateUpdate { .. } => "pin_state_update",
            ServerMessage::Command(_) => "command",
            ServerMessage::CommandAck { .. } => "command_ack",
            ServerMessage::SensorUpdate { .. } => "sensor_update",
            ServerMessage::Error { .. } => "error",
        }
    }
}
