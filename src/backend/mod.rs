//! Capture backends.
//!
//! A backend owns exactly one device or helper-process handle and turns
//! it into `Frame`s. The controller never talks to hardware directly; it
//! picks one backend at init time through a [`BackendChain`] and drives it
//! through the [`CaptureBackend`] trait.
//!
//! # Variants
//!
//! - [`NativeBackend`] - in-process capture through nokhwa (feature `camera`)
//! - [`ExternalToolBackend`] - one still-capture tool launch per frame
//! - [`BridgeBackend`] - long-lived helper speaking a line protocol
//! - [`SimulatedBackend`] - synthetic frames, for tests and demos

mod bridge;
mod chain;
mod external;
#[cfg(feature = "camera")]
mod native;
mod simulated;

pub use bridge::{BridgeBackend, BridgeResponse, BridgeStatus};
pub use chain::{BackendChain, BackendFactory};
pub use external::{CaptureTool, ExternalToolBackend};
#[cfg(feature = "camera")]
pub use native::NativeBackend;
pub use simulated::{SimulatedBackend, SimulatedStats};

use crate::capture::{CameraConfig, ConfigError, Frame};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during camera operations.
#[derive(Debug, Clone, Error)]
pub enum CameraError {
    #[error("camera device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("configuration rejected: {0}")]
    ConfigRejected(String),
    #[error("failed to capture frame: {0}")]
    CaptureFailed(String),
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("camera not initialized")]
    NotInitialized,
    #[error("camera is not streaming")]
    NotStreaming,
}

impl CameraError {
    /// Returns true if the error means the device is gone and the stream
    /// cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceUnavailable(_))
    }

    /// Error for `acquire_frame` on a backend that has not been opened.
    pub(crate) fn not_open() -> Self {
        Self::CaptureFailed("backend not open".to_string())
    }
}

impl From<ConfigError> for CameraError {
    fn from(err: ConfigError) -> Self {
        Self::ConfigRejected(err.to_string())
    }
}

/// Trait for capture backend implementations.
///
/// Every call is bounded: `acquire_frame` must return `Timeout` rather
/// than block past the configured capture timeout. `close` must be safe to
/// call at any time, including on a backend that was never opened.
pub trait CaptureBackend: Send {
    /// Short backend name used in logs and state reports.
    fn name(&self) -> &'static str;

    /// Opens the device with the given configuration.
    fn open(&mut self, config: &CameraConfig) -> Result<(), CameraError>;

    /// Captures a single frame.
    fn acquire_frame(&mut self) -> Result<Frame, CameraError>;

    /// Checks if the backend currently holds an open device.
    fn is_open(&self) -> bool;

    /// Releases the device. Idempotent.
    fn close(&mut self);

    /// Called when the controller starts streaming from this backend.
    fn stream_started(&mut self) -> Result<(), CameraError> {
        Ok(())
    }

    /// Called when the controller stops streaming from this backend.
    fn stream_stopped(&mut self) {}
}

/// Backend variants known to the probe chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Native,
    External,
    Bridge,
    Simulated,
}

impl BackendKind {
    /// Returns the name a backend of this kind reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::External => "external",
            Self::Bridge => "bridge",
            Self::Simulated => "simulated",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_device_unavailable_is_fatal() {
        assert!(CameraError::DeviceUnavailable("gone".into()).is_fatal());
        assert!(!CameraError::CaptureFailed("blurry".into()).is_fatal());
        assert!(!CameraError::Timeout(Duration::from_secs(1)).is_fatal());
        assert!(!CameraError::NotInitialized.is_fatal());
        assert!(!CameraError::not_open().is_fatal());
    }

    #[test]
    fn test_config_error_maps_to_rejected() {
        let err: CameraError = ConfigError::InvalidFrameRate(0).into();
        assert!(matches!(err, CameraError::ConfigRejected(_)));
    }

    #[test]
    fn test_backend_kind_serde_names() {
        let kinds: Vec<BackendKind> =
            serde_json::from_str(r#"["native","external","bridge","simulated"]"#).unwrap();
        assert_eq!(
            kinds,
            vec![
                BackendKind::Native,
                BackendKind::External,
                BackendKind::Bridge,
                BackendKind::Simulated
            ]
        );
        assert_eq!(BackendKind::Bridge.to_string(), "bridge");
    }
}
