//! Hub server implementation
//!
//! Handles WebSocket connections from devices and observers, message routing,
//! fan-out, and the HTTP query/command surface.

pub mod api;
mod broadcast;
mod connections;
mod router;
pub mod transport;
pub mod websocket;

pub use api::{ApiError, CommandResponse, DevicesResponse};
pub use broadcast::Broadcaster;
pub use connections::{ConnectionDirectory, OutboundMessage, Session};
pub use router::MessageRouter;
pub use transport::{create_router, HubServer, HubServerConfig, HubState};
