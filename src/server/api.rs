//! HTTP query and command surface

use crate::error::ForwardError;
use crate::messages::DeviceCommand;
use crate::registry::{ClientView, PinId};
use crate::server::transport::HubState;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

/// Body of `GET /api/devices`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicesResponse {
    pub devices: Vec<ClientView>,
}

/// Body of a successful `POST /api/devices/{id}/command`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub success: bool,
    pub message: String,
    pub device_id: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin_id: Option<PinId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Device not found")]
    NotFound,

    #[error("Device not connected")]
    Unavailable,
}

impl From<ForwardError> for ApiError {
    fn from(err: ForwardError) -> Self {
        match err {
            ForwardError::UnknownDevice(_) => ApiError::NotFound,
            ForwardError::DeviceOffline(_) => ApiError::Unavailable,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub async fn list_devices(State(state): State<HubState>) -> Json<DevicesResponse> {
    Json(DevicesResponse {
        devices: state.registry.snapshot(),
    })
}

pub async fn get_device(
    State(state): State<HubState>,
    Path(device_id): Path<String>,
) -> Result<Json<ClientView>, ApiError> {
    state.registry.get(&device_id).map(Json).ok_or(ApiError::NotFound)
}

pub async fn send_command(
    State(state): State<HubState>,
    Path(device_id): Path<String>,
    Json(command): Json<DeviceCommand>,
) -> Result<Json<CommandResponse>, ApiError> {
    state.router.forward_command(&device_id, command.clone())?;
    debug!(device_id = %device_id, command = %command.command, "Command accepted over HTTP");

    Ok(Json(CommandResponse {
        success: true,
        message: "Command sent to device".to_string(),
        device_id,
        command: command.command,
        pin_id: command.pin_id,
        state: command.state,
    }))
}
