//! Probe-and-fallback selection of a capture backend.

use super::{
    BackendKind, BridgeBackend, CameraError, CaptureBackend, ExternalToolBackend,
    SimulatedBackend,
};
use crate::capture::{BackendSettings, CameraConfig};

/// Builds a fresh, unopened backend instance.
pub type BackendFactory = Box<dyn Fn() -> Box<dyn CaptureBackend> + Send + Sync>;

/// Ordered list of backend candidates.
///
/// `open_first` walks the list once, opening each candidate in turn; the
/// first one that opens is returned and the rest are never constructed.
pub struct BackendChain {
    candidates: Vec<(String, BackendFactory)>,
}

impl BackendChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self {
            candidates: Vec::new(),
        }
    }

    /// Builds the chain described by the backend settings.
    pub fn from_settings(settings: &BackendSettings) -> Self {
        settings
            .probe_order
            .iter()
            .fold(Self::new(), |chain, kind| chain.with_kind(*kind, settings))
    }

    /// Appends a built-in backend kind.
    pub fn with_kind(self, kind: BackendKind, settings: &BackendSettings) -> Self {
        let timeout = settings.capture_timeout();
        match kind {
            #[cfg(feature = "camera")]
            BackendKind::Native => {
                self.with_backend(kind.as_str(), move || {
                    Box::new(super::NativeBackend::new(timeout))
                })
            }
            #[cfg(not(feature = "camera"))]
            BackendKind::Native => {
                tracing::debug!("native backend skipped: built without the `camera` feature");
                self
            }
            BackendKind::External => {
                let dirs = settings.tool_dirs.clone();
                let path = settings.capture_path.clone();
                self.with_backend(kind.as_str(), move || {
                    Box::new(ExternalToolBackend::new(dirs.clone(), path.clone(), timeout))
                })
            }
            BackendKind::Bridge => {
                let command = settings.helper_command.clone();
                self.with_backend(kind.as_str(), move || {
                    Box::new(BridgeBackend::new(command.clone(), timeout))
                })
            }
            BackendKind::Simulated => {
                self.with_backend(kind.as_str(), || Box::new(SimulatedBackend::new()))
            }
        }
    }

    /// Appends a custom backend factory.
    pub fn with_backend<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn CaptureBackend> + Send + Sync + 'static,
    {
        self.candidates.push((name.into(), Box::new(factory)));
        self
    }

    /// Returns the candidate names in probe order.
    pub fn names(&self) -> Vec<&str> {
        self.candidates.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Returns true if the chain has no candidates.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Opens the first candidate that accepts the configuration.
    ///
    /// A `ConfigRejected` from any candidate is returned immediately since
    /// every backend would see the same configuration. Otherwise all
    /// failures are collected into one `DeviceUnavailable`.
    pub fn open_first(
        &self,
        config: &CameraConfig,
    ) -> Result<Box<dyn CaptureBackend>, CameraError> {
        let mut failures = Vec::with_capacity(self.candidates.len());

        for (name, factory) in &self.candidates {
            let mut backend = factory();
            match backend.open(config) {
                Ok(()) => {
                    tracing::info!(backend = %name, "Capture backend opened");
                    return Ok(backend);
                }
                Err(CameraError::ConfigRejected(reason)) => {
                    backend.close();
                    return Err(CameraError::ConfigRejected(reason));
                }
                Err(e) => {
                    tracing::warn!(backend = %name, error = %e, "Capture backend unavailable");
                    backend.close();
                    failures.push(format!("{name}: {e}"));
                }
            }
        }

        if failures.is_empty() {
            return Err(CameraError::DeviceUnavailable(
                "no capture backends configured".to_string(),
            ));
        }
        Err(CameraError::DeviceUnavailable(failures.join("; ")))
    }
}

impl Default for BackendChain {
    fn default() -> Self {
        Self::from_settings(&BackendSettings::default())
    }
}
