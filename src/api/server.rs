//! HTTP server exposing the camera controller.

use super::ApiError;
use crate::backend::CameraError;
use crate::capture::CameraConfig;
use crate::controller::{CameraController, SNAPSHOT_FILE};
use crate::metrics::{MetricsRegistry, MetricsSnapshot};
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tower_http::{cors::CorsLayer, services::ServeDir};

/// Longest a client may ask `/api/camera/frame` to wait.
const MAX_FRAME_WAIT: Duration = Duration::from_secs(10);

/// Wait used when the client gives no `timeout_ms`.
const DEFAULT_FRAME_WAIT: Duration = Duration::from_secs(2);

/// Errors that can occur during server operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding the listen socket failed.
    #[error("failed to bind to address: {0}")]
    Bind(#[from] std::io::Error),

    /// The server stopped with an error.
    #[error("server error: {0}")]
    Server(String),

    /// The metrics registry could not be built.
    #[error("metrics error: {0}")]
    Metrics(#[from] crate::metrics::MetricsError),
}

/// Configuration for the API server.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Address to bind the server to.
    pub bind_addr: SocketAddr,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], 8080).into(),
        }
    }
}

impl ApiServerConfig {
    /// Creates a config with a custom port.
    pub fn with_port(port: u16) -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], port).into(),
        }
    }
}

/// Shared state for request handlers.
pub struct ApiState {
    controller: Arc<CameraController>,
    metrics: MetricsRegistry,
}

impl ApiState {
    /// Wraps a controller with a fresh metrics registry.
    pub fn new(controller: Arc<CameraController>) -> Result<Self, ServerError> {
        Ok(Self {
            controller,
            metrics: MetricsRegistry::new()?,
        })
    }
}

/// HTTP server for the camera API.
pub struct ApiServer {
    config: ApiServerConfig,
    state: Arc<ApiState>,
}

impl ApiServer {
    /// Creates a new server around a controller.
    pub fn new(config: ApiServerConfig, controller: Arc<CameraController>) -> Result<Self, ServerError> {
        Ok(Self {
            config,
            state: Arc::new(ApiState::new(controller)?),
        })
    }

    /// Builds the router without binding a socket.
    pub fn router(&self) -> Router {
        router(Arc::clone(&self.state))
    }

    /// Serves requests until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        tracing::info!(
            addr = %self.config.bind_addr,
            "Camera API listening"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Server(e.to_string()))?;

        Ok(())
    }
}

/// Builds the API router.
pub fn router(state: Arc<ApiState>) -> Router {
    let images = state.controller.store().dir().map(ServeDir::new);

    let mut app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/camera", get(status_handler).post(action_handler))
        .route("/api/camera/frame", get(frame_handler))
        .route("/api/camera/config", get(get_config_handler).put(put_config_handler))
        .route("/api/camera/fps", axum::routing::put(put_fps_handler))
        .with_state(state);

    if let Some(images) = images {
        app = app.nest_service("/images", images);
    }
    app.layer(CorsLayer::permissive())
}

/// Runs a blocking controller call off the async executor.
async fn blocking<T, F>(state: &Arc<ApiState>, call: F) -> Result<T, ApiError>
where
    F: FnOnce(&CameraController) -> Result<T, CameraError> + Send + 'static,
    T: Send + 'static,
{
    let controller = Arc::clone(&state.controller);
    tokio::task::spawn_blocking(move || call(&controller))
        .await
        .map_err(|e| ApiError::Internal(format!("controller task failed: {e}")))?
        .map_err(ApiError::from)
}

/// Handler for the /health endpoint.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Handler for the /metrics endpoint.
async fn metrics_handler(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    state
        .metrics
        .update(&MetricsSnapshot::from_controller(&state.controller));

    match state.metrics.encode() {
        Ok(output) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            output,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {}", e),
        ),
    }
}

async fn status_handler(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let camera = state.controller.get_state();
    Json(json!({
        "status": "success",
        "available": camera.backend.is_some(),
        "camera": camera,
    }))
}

#[derive(Debug, Deserialize)]
pub(crate) struct ActionRequest {
    action: String,
}

async fn action_handler(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ActionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    tracing::info!(action = %request.action, "Camera action requested");

    let body = match request.action.as_str() {
        "init" => {
            blocking(&state, |c| c.init()).await?;
            json!({"status": "success", "message": "Camera initialized"})
        }
        "snapshot" => {
            let info = blocking(&state, |c| c.take_snapshot().map(|f| f.info())).await?;
            json!({
                "status": "success",
                "message": "Snapshot taken",
                "image_url": format!("/images/{SNAPSHOT_FILE}"),
                "frame": info,
            })
        }
        "start_stream" => {
            blocking(&state, |c| c.start_stream()).await?;
            json!({"status": "success", "message": "Stream started", "frame_url": "/api/camera/frame"})
        }
        "stop_stream" => {
            blocking(&state, |c| c.stop_stream()).await?;
            json!({"status": "success", "message": "Stream stopped"})
        }
        "cleanup" => {
            blocking(&state, |c| {
                c.cleanup();
                Ok(())
            })
            .await?;
            json!({"status": "success", "message": "Camera released"})
        }
        other => return Err(ApiError::BadRequest(format!("Invalid action: {other}"))),
    };
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub(crate) struct FrameQuery {
    timeout_ms: Option<u64>,
}

async fn frame_handler(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<FrameQuery>,
) -> Result<Response, ApiError> {
    let wait = query
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_FRAME_WAIT)
        .min(MAX_FRAME_WAIT);

    let frame = blocking(&state, move |c| c.get_frame(wait)).await?;
    let sequence = frame.sequence().to_string();
    let captured_at = frame.captured_at().to_rfc3339();

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/jpeg".to_string()),
            (header::CACHE_CONTROL, "no-store".to_string()),
            (header::HeaderName::from_static("x-frame-sequence"), sequence),
            (header::HeaderName::from_static("x-frame-captured-at"), captured_at),
        ],
        frame.into_data(),
    )
        .into_response())
}

async fn get_config_handler(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<CameraConfig>, ApiError> {
    let config = blocking(&state, |c| Ok(c.config())).await?;
    Ok(Json(config))
}

async fn put_config_handler(
    State(state): State<Arc<ApiState>>,
    Json(config): Json<CameraConfig>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let applied = blocking(&state, move |c| {
        c.set_config(config)?;
        Ok(c.config())
    })
    .await?;
    Ok(Json(json!({"status": "success", "config": applied})))
}

#[derive(Debug, Deserialize)]
pub(crate) struct FpsRequest {
    fps: u32,
}

async fn put_fps_handler(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<FpsRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    blocking(&state, move |c| c.set_fps(request.fps)).await?;
    Ok(Json(json!({"status": "success", "fps": request.fps})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendChain, SimulatedBackend};
    use crate::controller::ControllerOptions;

    fn test_state(working: bool) -> Arc<ApiState> {
        let chain = BackendChain::new().with_backend("simulated", move || {
            if working {
                Box::new(SimulatedBackend::new())
            } else {
                Box::new(SimulatedBackend::new().failing_open())
            }
        });
        let controller =
            CameraController::new(CameraConfig::default(), ControllerOptions::with_chain(chain));
        Arc::new(ApiState::new(Arc::new(controller)).unwrap())
    }

    fn action(name: &str) -> Json<ActionRequest> {
        Json(ActionRequest {
            action: name.to_string(),
        })
    }

    async fn run_action(state: &Arc<ApiState>, name: &str) -> serde_json::Value {
        let Json(body) = action_handler(State(Arc::clone(state)), action(name))
            .await
            .unwrap();
        assert_eq!(body["status"], "success", "{name} failed: {body}");
        body
    }

    #[test]
    fn test_config_default() {
        let config = ApiServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8080);
    }

    #[test]
    fn test_config_with_port() {
        let config = ApiServerConfig::with_port(9000);
        assert_eq!(config.bind_addr.port(), 9000);
    }

    #[tokio::test]
    async fn test_unknown_action_is_bad_request() {
        let state = test_state(true);
        let response = action_handler(State(state), action("selfie"))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_snapshot_without_camera_is_unavailable() {
        let state = test_state(false);
        run_action(&state, "init").await;

        let response = action_handler(State(state), action("snapshot"))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_snapshot_action_succeeds() {
        let state = test_state(true);
        run_action(&state, "init").await;

        let Json(body) = action_handler(State(state), action("snapshot"))
            .await
            .unwrap();
        assert_eq!(body["status"], "success");
        assert_eq!(body["image_url"], "/images/snapshot.jpg");
        assert_eq!(body["frame"]["sequence"], 1);
    }

    #[tokio::test]
    async fn test_invalid_fps_is_bad_request() {
        let state = test_state(true);
        let response = put_fps_handler(State(state), Json(FpsRequest { fps: 0 }))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_config_round_trip() {
        let state = test_state(true);
        run_action(&state, "init").await;

        let Json(mut config) = get_config_handler(State(Arc::clone(&state))).await.unwrap();
        assert_eq!(config, CameraConfig::default());

        config.width = 320;
        config.height = 240;
        let Json(body) = put_config_handler(State(Arc::clone(&state)), Json(config))
            .await
            .unwrap();
        assert_eq!(body["config"]["width"], 320);

        let Json(applied) = get_config_handler(State(state)).await.unwrap();
        assert_eq!((applied.width, applied.height), (320, 240));
    }

    #[tokio::test]
    async fn test_frame_before_stream_is_conflict() {
        let state = test_state(true);
        run_action(&state, "init").await;

        let response = frame_handler(State(state), Query(FrameQuery { timeout_ms: Some(10) }))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_streamed_frame_is_jpeg() {
        let state = test_state(true);
        run_action(&state, "init").await;
        run_action(&state, "start_stream").await;

        let response = frame_handler(
            State(Arc::clone(&state)),
            Query(FrameQuery {
                timeout_ms: Some(2000),
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "image/jpeg"
        );

        run_action(&state, "stop_stream").await;
    }
}
