//! Frame and configuration types.
//!
//! These are the values that travel between the backends, the stream
//! worker and the controller. Nothing in here touches a device.

mod config;
mod frame;

pub use config::{
    BackendSettings, CameraConfig, ConfigError, FileConfig, SensorTuning, ServerSettings,
    StorageSettings, StreamSettings, MAX_DIMENSION, MAX_FPS,
};
pub use frame::{Frame, FrameInfo};
