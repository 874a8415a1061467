//! Point-in-time camera state.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Coarse controller status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraStatus {
    #[default]
    Stopped,
    Running,
    Error,
}

impl CameraStatus {
    /// Numeric encoding used by the metrics gauge.
    pub fn as_gauge(&self) -> i64 {
        match self {
            Self::Stopped => 0,
            Self::Running => 1,
            Self::Error => 2,
        }
    }
}

/// Snapshot of the camera subsystem as seen by API clients.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CameraState {
    pub status: CameraStatus,
    pub streaming: bool,
    /// Frames captured since `init`, snapshots included.
    pub frame_count: u64,
    pub last_frame_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Name of the backend currently holding the device.
    pub backend: Option<String>,
    pub fps: u32,
}

impl CameraState {
    /// Fresh state for a controller configured at `fps`.
    pub fn new(fps: u32) -> Self {
        Self {
            fps,
            ..Default::default()
        }
    }

    pub(crate) fn record_frame(&mut self, captured_at: DateTime<Utc>) {
        self.frame_count += 1;
        self.last_frame_time = Some(captured_at);
    }

    pub(crate) fn record_error(&mut self, message: String) {
        self.status = CameraStatus::Error;
        self.streaming = false;
        self.last_error = Some(message);
    }
}
