//! Prometheus metrics for the camera subsystem.
//!
//! # Metrics Exposed
//!
//! - `camera_status` - 0 stopped, 1 running, 2 error
//! - `camera_streaming` - 1 while the stream worker runs
//! - `camera_frames_total` - frames captured since init
//! - `camera_buffered_frames` - frames waiting in the stream buffer
//! - `camera_target_fps` - configured stream frame rate
//! - `camera_capture_errors_total` - failed acquisitions
//!
//! # Example
//!
//! ```no_run
//! use pi_camera::metrics::{MetricsRegistry, MetricsSnapshot};
//! use pi_camera::{CameraConfig, CameraController, ControllerOptions};
//!
//! let controller = CameraController::new(CameraConfig::default(), ControllerOptions::default());
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//!
//! registry.update(&MetricsSnapshot::from_controller(&controller));
//! println!("{}", registry.encode().unwrap());
//! ```

mod collector;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot};
