//! Camera and service configuration.
//!
//! `CameraConfig` is the immutable snapshot handed to a backend when it is
//! opened. The surrounding `FileConfig` is what the service reads from
//! TOML at startup.

use crate::backend::BackendKind;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Highest frame rate the streaming loop accepts.
pub const MAX_FPS: u32 = 30;

/// Largest accepted frame edge in pixels.
pub const MAX_DIMENSION: u32 = 4096;

/// Optional sensor tuning. `None` leaves the device default in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorTuning {
    /// Fixed exposure time in microseconds; `None` means auto exposure.
    pub exposure_us: Option<u32>,
    /// Brightness, 0-100.
    pub brightness: Option<u8>,
    /// Contrast, 0-100.
    pub contrast: Option<u8>,
}

/// Configuration for camera capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Target frames per second while streaming (1-30).
    pub fps: u32,
    /// JPEG quality (0-100).
    pub quality: u8,
    /// Device path or index, e.g. `/dev/video0`.
    pub device: String,
    /// Optional exposure/brightness/contrast overrides.
    pub tuning: SensorTuning,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 10,
            quality: 85,
            device: "/dev/video0".to_string(),
            tuning: SensorTuning::default(),
        }
    }
}

impl CameraConfig {
    /// Creates a new configuration with the specified dimensions.
    pub fn with_dimensions(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    /// Returns a copy of this configuration with a different frame rate.
    pub fn with_fps(&self, fps: u32) -> Self {
        Self {
            fps,
            ..self.clone()
        }
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0
            || self.height == 0
            || self.width > MAX_DIMENSION
            || self.height > MAX_DIMENSION
        {
            return Err(ConfigError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        if self.fps == 0 || self.fps > MAX_FPS {
            return Err(ConfigError::InvalidFrameRate(self.fps));
        }
        if self.quality > 100 {
            return Err(ConfigError::InvalidQuality(self.quality));
        }
        if self.device.trim().is_empty() {
            return Err(ConfigError::EmptyDevice);
        }
        if let Some(exposure) = self.tuning.exposure_us {
            if exposure == 0 {
                return Err(ConfigError::InvalidTuning {
                    name: "exposure_us",
                    value: 0,
                });
            }
        }
        for (name, value) in [
            ("brightness", self.tuning.brightness),
            ("contrast", self.tuning.contrast),
        ] {
            if let Some(v) = value.filter(|v| *v > 100) {
                return Err(ConfigError::InvalidTuning {
                    name,
                    value: u32::from(v),
                });
            }
        }
        Ok(())
    }

    /// Returns the capture period derived from the target fps.
    pub fn frame_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / f64::from(self.fps.max(1)))
    }

    /// Returns the numeric device index, e.g. `2` for `/dev/video2` or `"2"`.
    pub fn device_index(&self) -> Option<u32> {
        let digits: String = self
            .device
            .chars()
            .rev()
            .take_while(char::is_ascii_digit)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        digits.parse().ok()
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid frame dimensions {width}x{height} (must be 1-4096)")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("invalid frame rate {0} (must be 1-30 fps)")]
    InvalidFrameRate(u32),
    #[error("invalid jpeg quality {0} (must be 0-100)")]
    InvalidQuality(u8),
    #[error("device identifier must not be empty")]
    EmptyDevice,
    #[error("invalid sensor tuning {name}={value}")]
    InvalidTuning { name: &'static str, value: u32 },
    #[error("frame buffer capacity must be at least 1")]
    InvalidBufferCapacity,
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub backend: BackendSettings,
    #[serde(default)]
    pub stream: StreamSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub server: ServerSettings,
}

/// Backend probing and per-backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Probe order; the first backend that opens wins.
    pub probe_order: Vec<BackendKind>,
    /// Upper bound for a single frame acquisition, in milliseconds.
    pub capture_timeout_ms: u64,
    /// Directories searched for external still-capture tools.
    pub tool_dirs: Vec<PathBuf>,
    /// Fixed path the external tool writes each frame to.
    pub capture_path: PathBuf,
    /// Helper program and arguments for the subprocess bridge.
    pub helper_command: Vec<String>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            probe_order: vec![BackendKind::Native, BackendKind::External, BackendKind::Bridge],
            capture_timeout_ms: 2000,
            tool_dirs: vec![PathBuf::from("/usr/bin"), PathBuf::from("/usr/local/bin")],
            capture_path: std::env::temp_dir().join("pi-camera-capture.jpg"),
            helper_command: vec![
                "python3".to_string(),
                "components/camera_helper.py".to_string(),
            ],
        }
    }
}

impl BackendSettings {
    /// Returns the acquisition timeout as a `Duration`.
    pub fn capture_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.capture_timeout_ms.max(1))
    }
}

/// Stream worker and buffer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Frame buffer capacity.
    pub buffer_capacity: usize,
    /// Extra capture attempts within one tick after a transient failure.
    pub retries_per_tick: u32,
    /// Consecutive failed ticks after which the stream gives up.
    pub max_consecutive_failures: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: 5,
            retries_per_tick: 1,
            max_consecutive_failures: 10,
        }
    }
}

/// On-disk artifact settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory holding `snapshot.jpg` and `stream.jpg`; `None` disables it.
    pub output_dir: Option<PathBuf>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            output_dir: Some(PathBuf::from("web/static/images")),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address the API binds to.
    pub bind_addr: SocketAddr,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], 8080).into(),
        }
    }
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.camera.validate()?;
        if config.stream.buffer_capacity == 0 {
            return Err(ConfigError::InvalidBufferCapacity);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = CameraConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_dimensions_invalid() {
        let mut config = CameraConfig::default();
        config.width = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn test_fps_bounds() {
        let config = CameraConfig::default();
        assert!(matches!(
            config.with_fps(0).validate(),
            Err(ConfigError::InvalidFrameRate(0))
        ));
        assert!(matches!(
            config.with_fps(31).validate(),
            Err(ConfigError::InvalidFrameRate(31))
        ));
        assert!(config.with_fps(1).validate().is_ok());
        assert!(config.with_fps(30).validate().is_ok());
    }

    #[test]
    fn test_quality_and_tuning_bounds() {
        let mut config = CameraConfig {
            quality: 101,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidQuality(101))));

        config.quality = 100;
        config.tuning.brightness = Some(150);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTuning { name: "brightness", .. })
        ));
    }

    #[test]
    fn test_device_index() {
        let mut config = CameraConfig::default();
        assert_eq!(config.device_index(), Some(0));
        config.device = "/dev/video12".to_string();
        assert_eq!(config.device_index(), Some(12));
        config.device = "3".to_string();
        assert_eq!(config.device_index(), Some(3));
        config.device = "/dev/camera".to_string();
        assert_eq!(config.device_index(), None);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = FileConfig::from_toml(
            r#"
            [camera]
            width = 1280
            height = 720
            fps = 15

            [backend]
            probe_order = ["external", "simulated"]

            [stream]
            buffer_capacity = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.camera.width, 1280);
        assert_eq!(config.camera.quality, 85);
        assert_eq!(
            config.backend.probe_order,
            vec![BackendKind::External, BackendKind::Simulated]
        );
        assert_eq!(config.stream.buffer_capacity, 8);
        assert_eq!(config.stream.retries_per_tick, 1);
    }

    #[test]
    fn test_parse_rejects_invalid_camera() {
        let result = FileConfig::from_toml("[camera]\nfps = 60\n");
        assert!(matches!(result, Err(ConfigError::InvalidFrameRate(60))));
    }

    #[test]
    fn test_parse_rejects_zero_capacity() {
        let result = FileConfig::from_toml("[stream]\nbuffer_capacity = 0\n");
        assert!(matches!(result, Err(ConfigError::InvalidBufferCapacity)));
    }
}
