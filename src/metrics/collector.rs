//! Metrics collection and registry.

use crate::controller::{CameraController, CameraState};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// A snapshot of camera state for metrics update.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Status gauge value (0 stopped, 1 running, 2 error).
    pub status: i64,
    /// Whether a stream is active.
    pub streaming: bool,
    /// Frames captured since init.
    pub frames_total: u64,
    /// Frames currently waiting in the buffer.
    pub buffered_frames: usize,
    /// Configured frame rate.
    pub target_fps: u32,
    /// Failed acquisitions since startup.
    pub capture_errors: u64,
}

impl MetricsSnapshot {
    /// Builds a snapshot from a state copy plus buffer and error counters.
    pub fn from_state(state: &CameraState, buffered_frames: usize, capture_errors: u64) -> Self {
        Self {
            status: state.status.as_gauge(),
            streaming: state.streaming,
            frames_total: state.frame_count,
            buffered_frames,
            target_fps: state.fps,
            capture_errors,
        }
    }

    /// Reads everything from a live controller.
    pub fn from_controller(controller: &CameraController) -> Self {
        Self::from_state(
            &controller.get_state(),
            controller.buffered_frames(),
            controller.capture_errors(),
        )
    }
}

/// Prometheus metrics registry for camera monitoring.
pub struct MetricsRegistry {
    registry: Registry,
    status: IntGauge,
    streaming: IntGauge,
    frames_total: IntGauge,
    buffered_frames: IntGauge,
    target_fps: IntGauge,
    capture_errors_total: IntCounter,
}

impl MetricsRegistry {
    /// Creates a new metrics registry with all camera metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let status = IntGauge::new(
            "camera_status",
            "Camera status (0=stopped, 1=running, 2=error)",
        )?;
        let streaming = IntGauge::new("camera_streaming", "Whether a stream is active (1=yes)")?;
        // frame_count resets on init, so this is a gauge rather than a counter
        let frames_total = IntGauge::new(
            "camera_frames_total",
            "Frames captured since the camera was initialized",
        )?;
        let buffered_frames = IntGauge::new(
            "camera_buffered_frames",
            "Frames waiting in the stream buffer",
        )?;
        let target_fps = IntGauge::new("camera_target_fps", "Configured stream frame rate")?;
        let capture_errors_total = IntCounter::new(
            "camera_capture_errors_total",
            "Failed frame acquisitions",
        )?;

        registry.register(Box::new(status.clone()))?;
        registry.register(Box::new(streaming.clone()))?;
        registry.register(Box::new(frames_total.clone()))?;
        registry.register(Box::new(buffered_frames.clone()))?;
        registry.register(Box::new(target_fps.clone()))?;
        registry.register(Box::new(capture_errors_total.clone()))?;

        Ok(Self {
            registry,
            status,
            streaming,
            frames_total,
            buffered_frames,
            target_fps,
            capture_errors_total,
        })
    }

    /// Updates all metrics from a snapshot.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        self.status.set(snapshot.status);
        self.streaming.set(i64::from(snapshot.streaming));
        self.frames_total.set(snapshot.frames_total as i64);
        self.buffered_frames.set(snapshot.buffered_frames as i64);
        self.target_fps.set(i64::from(snapshot.target_fps));

        // For counters, we need to increment by the difference
        let current_errors = self.capture_errors_total.get();
        if snapshot.capture_errors > current_errors {
            self.capture_errors_total
                .inc_by(snapshot.capture_errors - current_errors);
        }
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
