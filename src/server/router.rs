//! Message routing
//!
//! Decodes inbound envelopes, applies them to the registry and decides who
//! hears about it. Also owns the connect/disconnect side effects.

use crate::error::{ForwardError, RouteError};
use crate::messages::{ClientMessage, DeviceCommand, ServerMessage, TOGGLE_PIN};
use crate::registry::{ConnectionId, DeviceLink, DeviceRegistry, PinId, PinReport};
use crate::server::broadcast::Broadcaster;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

const COMMAND_SENT: &str = "Command sent to device";

/// Dispatches messages over one shared registry
///
/// Every registry change is projected and queued while `fanout` is held, so
/// all sessions see changes in the order they were applied and the last
/// `devices_list` a session receives always matches the registry.
#[derive(Clone)]
pub struct MessageRouter {
    registry: Arc<DeviceRegistry>,
    broadcaster: Broadcaster,
    fanout: Arc<Mutex<()>>,
}

impl MessageRouter {
    pub fn new(registry: Arc<DeviceRegistry>, broadcaster: Broadcaster) -> Self {
        Self {
            registry,
            broadcaster,
            fanout: Arc::new(Mutex::new(())),
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Greet a new connection with the current snapshot
    pub fn connection_opened(&self, conn: ConnectionId) {
        let _fanout = self.fanout.lock();
        let snapshot = ServerMessage::DevicesList {
            devices: self.registry.snapshot(),
        };
        self.broadcaster.send_to(conn, &snapshot);
    }

    /// Detach any device owned by `conn` and tell everyone still connected.
    /// The list goes out even when `conn` was a plain observer.
    pub fn connection_closed(&self, conn: ConnectionId) -> Option<String> {
        let _fanout = self.fanout.lock();
        let device = self.registry.mark_offline(conn);
        if let Some(id) = &device {
            info!(device_id = %id, conn_id = %conn, "Device went offline");
        }
        self.broadcast_devices();
        device
    }

    /// Handle one raw text frame from `conn`
    pub fn handle_text(&self, conn: ConnectionId, text: &str) {
        match ClientMessage::decode(text) {
            Ok(msg) => self.dispatch(conn, msg),
            Err(e) => self.reject(conn, &e),
        }
    }

    /// Reply with an `error` envelope; the connection stays open
    pub fn reject(&self, conn: ConnectionId, error: &RouteError) {
        warn!(conn_id = %conn, error = ?error, "Rejected message");
        self.broadcaster.send_to(conn, &ServerMessage::error(error.to_string()));
    }

    pub fn dispatch(&self, conn: ConnectionId, msg: ClientMessage) {
        debug!(conn_id = %conn, kind = msg.kind(), "Routing message");

        match msg {
            ClientMessage::DeviceInfo { id, pins, capabilities } => {
                self.register_device(conn, id, pins, capabilities);
            }
            ClientMessage::PinStateUpdate { id, pin_id, state } => {
                self.update_pin(conn, id, pin_id, state);
            }
            ClientMessage::Command { command, device_id, pin_id, state } => {
                if command != TOGGLE_PIN {
                    self.reject(conn, &RouteError::UnsupportedCommand(command));
                    return;
                }
                self.toggle_pin(conn, device_id, pin_id, state);
            }
            ClientMessage::SensorData { id, sensor, value } => {
                self.update_sensor(id, sensor, value);
            }
        }
    }

    /// Send a command to a device's live connection
    pub fn forward_command(&self, device_id: &str, command: DeviceCommand) -> Result<(), ForwardError> {
        let target = match self.registry.link(device_id) {
            DeviceLink::Unknown => return Err(ForwardError::UnknownDevice(device_id.to_string())),
            DeviceLink::Offline => return Err(ForwardError::DeviceOffline(device_id.to_string())),
            DeviceLink::Online(target) => target,
        };

        debug!(device_id, command = %command.command, "Forwarding command");

        // The registry may still name a connection whose socket is already gone
        if self.broadcaster.send_to(target, &ServerMessage::Command(command)) {
            Ok(())
        } else {
            Err(ForwardError::DeviceOffline(device_id.to_string()))
        }
    }

    fn register_device(&self, conn: ConnectionId, id: String, pins: Vec<PinReport>, capabilities: Option<Value>) {
        let pin_count = pins.len();
        let _fanout = self.fanout.lock();
        self.registry.register(&id, pins, capabilities, conn);
        info!(device_id = %id, conn_id = %conn, pins = pin_count, "Device registered");

        self.broadcaster.send_to(conn, &ServerMessage::DeviceInfoAck { id });
        self.broadcast_devices();
    }

    fn update_pin(&self, conn: ConnectionId, id: String, pin_id: PinId, state: String) {
        let _fanout = self.fanout.lock();
        if !self.registry.update_pin(&id, &pin_id, &state) {
            debug!(device_id = %id, pin_id = %pin_id, "Ignoring update for unknown device or pin");
            return;
        }

        let value = crate::registry::is_high(&state);
        let update = ServerMessage::PinStateUpdate {
            device_id: id,
            pin_id,
            state,
            value,
        };
        // The reporting device already knows its own state
        self.broadcaster.broadcast(&update, Some(conn));
    }

    fn toggle_pin(&self, conn: ConnectionId, device_id: String, pin_id: PinId, state: String) {
        let command = DeviceCommand::toggle_pin(pin_id.clone(), state.clone());

        let reply = match self.forward_command(&device_id, command) {
            Ok(()) => ServerMessage::CommandAck {
                command: TOGGLE_PIN.to_string(),
                device_id,
                pin_id,
                state,
                message: COMMAND_SENT.to_string(),
            },
            Err(e) => {
                debug!(device_id = %device_id, error = %e, "Command not delivered");
                ServerMessage::Error {
                    command: Some(TOGGLE_PIN.to_string()),
                    device_id: Some(device_id),
                    pin_id: Some(pin_id),
                    message: e.to_string(),
                }
            }
        };

        self.broadcaster.send_to(conn, &reply);
    }

    fn update_sensor(&self, id: String, sensor: String, value: Option<Value>) {
        let _fanout = self.fanout.lock();
        let stored = value.clone().unwrap_or(Value::Null);
        if !self.registry.update_sensor(&id, &sensor, stored) {
            debug!(device_id = %id, sensor = %sensor, "Ignoring sensor data for unknown device");
            return;
        }

        let update = ServerMessage::SensorUpdate {
            device_id: id,
            sensor,
            value,
        };
        self.broadcaster.broadcast(&update, None);
    }

    /// Callers hold `fanout`
    fn broadcast_devices(&self) {
        let list = ServerMessage::DevicesList {
            devices: self.registry.snapshot(),
        };
        self.broadcaster.broadcast(&list, None);
    }
}
