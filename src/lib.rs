//! Pinhub - real-time relay hub between IoT devices and observer clients
//!
//! Devices report pin and sensor state over a persistent WebSocket; observers
//! receive a live view of every device and can send commands that the hub
//! forwards to the addressed device. The hub keeps the authoritative
//! in-memory snapshot of device state and handles all fan-out.

pub mod error;
pub mod messages;
pub mod registry;
pub mod server;

pub use error::{ForwardError, RouteError};
pub use messages::{ClientMessage, DeviceCommand, ServerMessage};
pub use registry::{ClientView, ConnectionId, DeviceLink, DeviceRegistry, PinId, PinRecord, PinReport};
pub use server::{HubServer, HubServerConfig};
