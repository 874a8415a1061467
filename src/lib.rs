//! Pi Camera Service Library
//!
//! Camera capture and streaming for a Raspberry Pi peripheral service.
//! A single `CameraController` owns the camera, takes snapshots, and runs
//! a background stream that feeds a bounded buffer of recent frames.
//!
//! # Architecture
//!
//! ```text
//! backend (native | external tool | bridge) → controller → stream buffer
//!                                                 ↓
//!                                   state, metrics, HTTP API
//! ```
//!
//! # Design Principles
//!
//! - **One owner per device**: only the controller touches the backend
//! - **Bounded memory**: the stream buffer drops the oldest frame when full
//! - **Explicit failure**: device loss moves the controller to `Error`
//!   instead of silently retrying forever
//!
//! # Example
//!
//! ```no_run
//! use pi_camera::{CameraConfig, CameraController, ControllerOptions};
//! use std::time::Duration;
//!
//! let controller = CameraController::new(CameraConfig::default(), ControllerOptions::default());
//! controller.init().unwrap();
//!
//! let snapshot = controller.take_snapshot().unwrap();
//! println!("snapshot: {} bytes", snapshot.len());
//!
//! controller.start_stream().unwrap();
//! let frame = controller.get_frame(Duration::from_secs(2)).unwrap();
//! println!("frame #{}", frame.sequence());
//! controller.stop_stream().unwrap();
//! controller.cleanup();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

#[cfg(feature = "http")]
pub mod api;
pub mod backend;
pub mod capture;
pub mod controller;
pub mod metrics;
pub mod stream;

// Re-export commonly used types at crate root
pub use backend::{BackendChain, BackendKind, CameraError, CaptureBackend, SimulatedBackend};
pub use capture::{CameraConfig, ConfigError, FileConfig, Frame, FrameInfo};
pub use controller::{CameraController, CameraState, CameraStatus, ControllerOptions};
pub use stream::FrameBuffer;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
