//! Hub server: one TCP listener for the WebSocket upgrade and the HTTP API

use crate::registry::DeviceRegistry;
use crate::server::api;
use crate::server::broadcast::Broadcaster;
use crate::server::connections::ConnectionDirectory;
use crate::server::router::MessageRouter;
use crate::server::websocket::ws_handler;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Default listen address
pub const DEFAULT_BIND: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8080);

/// Default per-connection outbound queue length
pub const DEFAULT_OUTBOUND_BUFFER: usize = 64;

/// Hub server configuration
#[derive(Debug, Clone)]
pub struct HubServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// Frames queued per connection before further ones are dropped
    pub outbound_buffer: usize,
}

impl Default for HubServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

/// Shared state for HTTP and WebSocket handlers
#[derive(Clone)]
pub struct HubState {
    pub registry: Arc<DeviceRegistry>,
    pub connections: Arc<ConnectionDirectory>,
    pub router: MessageRouter,
    pub outbound_buffer: usize,
}

impl HubState {
    pub fn new(outbound_buffer: usize) -> Self {
        let registry = Arc::new(DeviceRegistry::new());
        let connections = Arc::new(ConnectionDirectory::new());
        let router = MessageRouter::new(registry.clone(), Broadcaster::new(connections.clone()));

        Self {
            registry,
            connections,
            router,
            // A zero-capacity mpsc channel panics on creation
            outbound_buffer: outbound_buffer.max(1),
        }
    }
}

/// Build the axum app. Sockets may upgrade on `/` or `/ws`.
pub fn create_router(state: HubState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/devices", get(api::list_devices))
        .route("/api/devices/{device_id}", get(api::get_device))
        .route("/api/devices/{device_id}/command", post(api::send_command))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

/// The relay hub
pub struct HubServer {
    config: HubServerConfig,
    state: HubState,
}

impl HubServer {
    pub fn new(config: HubServerConfig) -> Self {
        let state = HubState::new(config.outbound_buffer);
        Self { config, state }
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.bind_addr))?;

        self.serve(listener, shutdown).await
    }

    /// Serve on an already-bound listener until `shutdown` resolves
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let addr = listener.local_addr()?;
        info!(addr = %addr, "Pinhub listening (HTTP + WebSocket)");

        axum::serve(listener, create_router(self.state))
            .with_graceful_shutdown(shutdown)
            .await
            .context("Server error")?;

        Ok(())
    }
}
