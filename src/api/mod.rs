//! HTTP/JSON API over the camera controller.
//!
//! # Routes
//!
//! - `GET  /health`
//! - `GET  /metrics` - Prometheus text format
//! - `GET  /api/camera` - current `CameraState`
//! - `POST /api/camera` - `{"action": "init" | "snapshot" | "start_stream" | "stop_stream" | "cleanup"}`
//! - `GET  /api/camera/frame?timeout_ms=N` - next buffered frame as `image/jpeg`
//! - `GET|PUT /api/camera/config` - `CameraConfig` as JSON
//! - `PUT  /api/camera/fps` - `{"fps": N}`
//! - `GET  /images/*` - `snapshot.jpg` / `stream.jpg` from the output directory

mod server;

pub use server::{router, ApiServer, ApiServerConfig, ApiState, ServerError};

use crate::backend::CameraError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Maps a camera error to the HTTP status reported to clients.
pub fn status_for(error: &CameraError) -> StatusCode {
    match error {
        CameraError::DeviceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        CameraError::ConfigRejected(_) => StatusCode::BAD_REQUEST,
        CameraError::CaptureFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        CameraError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        CameraError::NotInitialized | CameraError::NotStreaming => StatusCode::CONFLICT,
    }
}

/// Error returned from request handlers.
#[derive(Debug)]
pub enum ApiError {
    /// Failure reported by the controller.
    Camera(CameraError),
    /// Malformed request body or unknown action.
    BadRequest(String),
    /// The blocking task panicked or was cancelled.
    Internal(String),
}

impl From<CameraError> for ApiError {
    fn from(err: CameraError) -> Self {
        Self::Camera(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Camera(e) => (status_for(&e), e.to_string()),
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        if status.is_server_error() {
            tracing::warn!(%status, %message, "Camera request failed");
        }
        (status, Json(json!({"status": "error", "message": message}))).into_response()
    }
}
