//! The camera controller: public entry point of the capture subsystem.

use super::shared::{DeviceSlot, Shared};
use super::{ArtifactStore, CameraState, CameraStatus};
use crate::backend::{BackendChain, CameraError};
use crate::capture::{CameraConfig, FileConfig, Frame, StreamSettings};
use crate::stream::{FrameBuffer, StreamWorker};
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Construction-time options that are not part of `CameraConfig`.
pub struct ControllerOptions {
    /// Backends to probe, in order.
    pub chain: BackendChain,
    /// Buffer and worker settings.
    pub stream: StreamSettings,
    /// Directory for `snapshot.jpg`/`stream.jpg`; `None` disables persistence.
    pub output_dir: Option<PathBuf>,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            chain: BackendChain::default(),
            stream: StreamSettings::default(),
            output_dir: None,
        }
    }
}

impl ControllerOptions {
    /// Options with a custom backend chain and defaults for the rest.
    pub fn with_chain(chain: BackendChain) -> Self {
        Self {
            chain,
            ..Default::default()
        }
    }
}

/// Owns the camera configuration, the active backend and the stream worker.
///
/// Every method takes `&self`; the controller is meant to be shared behind
/// an `Arc` between request handlers. Lifecycle operations (`init`,
/// `start_stream`, `stop_stream`, `set_config`, `cleanup`) are serialized by
/// one lifecycle lock so there is never more than one worker thread. Device
/// access and state updates use short-lived locks underneath it, which is
/// what lets `take_snapshot` and `get_state` run during a stream.
pub struct CameraController {
    shared: Arc<Shared>,
    worker: Mutex<Option<StreamWorker>>,
    stream_settings: StreamSettings,
}

impl CameraController {
    /// Creates a controller. Nothing is opened until `init`.
    pub fn new(config: CameraConfig, options: ControllerOptions) -> Self {
        let shared = Shared {
            device: Mutex::new(DeviceSlot {
                config: config.clone(),
                backend: None,
                initialized: false,
            }),
            state: Mutex::new(CameraState::new(config.fps)),
            buffer: FrameBuffer::new(options.stream.buffer_capacity),
            store: ArtifactStore::new(options.output_dir),
            chain: options.chain,
            capture_errors: AtomicU64::new(0),
        };
        Self {
            shared: Arc::new(shared),
            worker: Mutex::new(None),
            stream_settings: options.stream,
        }
    }

    /// Creates a controller from a loaded configuration file.
    pub fn from_file_config(config: &FileConfig) -> Self {
        Self::new(
            config.camera.clone(),
            ControllerOptions {
                chain: BackendChain::from_settings(&config.backend),
                stream: config.stream.clone(),
                output_dir: config.storage.output_dir.clone(),
            },
        )
    }

    fn lifecycle(&self) -> MutexGuard<'_, Option<StreamWorker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Initializes the controller and probes for a backend.
    ///
    /// No-op when already initialized with an open backend. When no
    /// backend opens, the controller is still initialized but reports
    /// `Error`; later `take_snapshot`/`start_stream` calls retry the probe.
    pub fn init(&self) -> Result<(), CameraError> {
        let _lifecycle = self.lifecycle();
        let mut slot = self.shared.device();

        if slot.initialized && slot.backend.is_some() {
            return Ok(());
        }
        if !slot.initialized {
            slot.config.validate()?;
            *self.shared.state() = CameraState::new(slot.config.fps);
            slot.initialized = true;
            tracing::info!(device = %slot.config.device, "Initializing camera");
        }

        match self.shared.ensure_backend(&mut slot) {
            Ok(_) => Ok(()),
            Err(CameraError::ConfigRejected(reason)) => Err(CameraError::ConfigRejected(reason)),
            Err(e) => {
                tracing::warn!(error = %e, "Camera initialized without a working backend");
                Ok(())
            }
        }
    }

    /// Stops streaming, closes the backend and resets state. Idempotent.
    pub fn cleanup(&self) {
        let mut worker = self.lifecycle();
        self.stop_locked(&mut worker);

        let mut slot = self.shared.device();
        let was_initialized = slot.initialized;
        slot.release();
        slot.initialized = false;
        *self.shared.state() = CameraState::new(slot.config.fps);
        drop(slot);
        self.shared.buffer.clear();

        if was_initialized {
            tracing::info!("Camera resources released");
        }
    }

    /// Captures one frame outside the streaming loop.
    ///
    /// Opens the backend lazily if needed. The frame is persisted as the
    /// latest snapshot and returned; the frame buffer is not touched.
    pub fn take_snapshot(&self) -> Result<Frame, CameraError> {
        {
            let mut slot = self.shared.device();
            self.shared.ensure_backend(&mut slot)?;
        }

        let frame = self.shared.capture().map_err(|e| {
            if e.is_fatal() {
                self.shared.state().record_error(e.to_string());
            }
            tracing::warn!(error = %e, "Snapshot failed");
            e
        })?;

        self.shared.state().record_frame(frame.captured_at());
        self.shared.store.save_snapshot(&frame);
        tracing::info!(sequence = frame.sequence(), bytes = frame.len(), "Snapshot taken");
        Ok(frame)
    }

    /// Starts the background stream. Idempotent while a stream is running.
    pub fn start_stream(&self) -> Result<(), CameraError> {
        let mut worker = self.lifecycle();
        self.start_locked(&mut worker)
    }

    /// Stops the background stream and waits for the worker to exit.
    /// Idempotent when no stream is running.
    pub fn stop_stream(&self) -> Result<(), CameraError> {
        let mut worker = self.lifecycle();
        self.stop_locked(&mut worker);
        Ok(())
    }

    /// Returns a copy of the current state.
    pub fn get_state(&self) -> CameraState {
        self.shared.state().clone()
    }

    /// Takes the oldest buffered frame, waiting up to `timeout`.
    pub fn get_frame(&self, timeout: Duration) -> Result<Frame, CameraError> {
        let (status, streaming, last_error) = {
            let state = self.shared.state();
            (state.status, state.streaming, state.last_error.clone())
        };
        if status == CameraStatus::Error {
            return Err(CameraError::DeviceUnavailable(
                last_error.unwrap_or_else(|| "camera in error state".to_string()),
            ));
        }
        if !streaming && self.shared.buffer.is_empty() {
            if !self.shared.device().initialized {
                return Err(CameraError::NotInitialized);
            }
            return Err(CameraError::NotStreaming);
        }
        self.shared.buffer.try_pop(timeout)
    }

    /// Replaces the configuration.
    ///
    /// An invalid configuration is rejected without touching anything. If a
    /// backend is open it is reopened with the new settings, and a running
    /// stream is stopped and restarted around that. If the reopen fails the
    /// controller is left in `Error` and the stream is not resumed.
    pub fn set_config(&self, config: CameraConfig) -> Result<(), CameraError> {
        config.validate()?;

        let mut worker = self.lifecycle();
        let was_streaming = self.worker_alive(&worker);
        if was_streaming {
            self.stop_locked(&mut worker);
        }

        {
            let mut slot = self.shared.device();
            let reopen = slot.backend.is_some();
            slot.release();
            slot.config = config;
            self.shared.state().fps = slot.config.fps;
            tracing::info!(
                width = slot.config.width,
                height = slot.config.height,
                fps = slot.config.fps,
                quality = slot.config.quality,
                "Camera configuration updated"
            );

            if reopen {
                if let Err(e) = self.shared.ensure_backend(&mut slot) {
                    tracing::error!(error = %e, "Backend did not reopen with new configuration");
                    return Err(e);
                }
            }
        }

        if was_streaming {
            self.start_locked(&mut worker)?;
        }
        Ok(())
    }

    /// Changes only the target frame rate.
    pub fn set_fps(&self, fps: u32) -> Result<(), CameraError> {
        let config = self.config().with_fps(fps);
        self.set_config(config)
    }

    /// Returns the active configuration.
    pub fn config(&self) -> CameraConfig {
        self.shared.device().config.clone()
    }

    /// Returns the number of frames waiting in the buffer.
    pub fn buffered_frames(&self) -> usize {
        self.shared.buffer.len()
    }

    /// Returns the buffer capacity.
    pub fn buffer_capacity(&self) -> usize {
        self.shared.buffer.capacity()
    }

    /// Returns true while a worker thread is alive.
    pub fn is_streaming(&self) -> bool {
        let worker = self.lifecycle();
        self.worker_alive(&worker)
    }

    /// Total failed acquisitions since construction.
    pub fn capture_errors(&self) -> u64 {
        self.shared.capture_errors()
    }

    /// Returns the on-disk artifact store.
    pub fn store(&self) -> &ArtifactStore {
        &self.shared.store
    }

    /// A worker counts as alive until it has cleared `streaming`; one that
    /// hit a device error may still be unwinding but will not capture again.
    fn worker_alive(&self, worker: &Option<StreamWorker>) -> bool {
        worker.as_ref().is_some_and(|w| !w.is_finished()) && self.shared.state().streaming
    }

    fn start_locked(&self, worker: &mut Option<StreamWorker>) -> Result<(), CameraError> {
        if self.worker_alive(worker) {
            tracing::debug!("Stream already running");
            return Ok(());
        }
        if let Some(failed) = worker.take() {
            failed.stop();
        }

        let period = {
            let mut slot = self.shared.device();
            let backend = self.shared.ensure_backend(&mut slot)?;
            backend.stream_started()?;
            slot.config.frame_period()
        };

        self.shared.buffer.clear();
        {
            let mut state = self.shared.state();
            state.status = CameraStatus::Running;
            state.streaming = true;
            state.last_error = None;
        }

        match StreamWorker::spawn(
            Arc::clone(&self.shared),
            period,
            self.stream_settings.clone(),
        ) {
            Ok(spawned) => {
                *worker = Some(spawned);
                Ok(())
            }
            Err(e) => {
                let mut state = self.shared.state();
                state.status = CameraStatus::Stopped;
                state.streaming = false;
                Err(e)
            }
        }
    }

    fn stop_locked(&self, worker: &mut Option<StreamWorker>) {
        let Some(running) = worker.take() else {
            return;
        };
        running.stop();

        if let Some(backend) = self.shared.device().backend.as_mut() {
            backend.stream_stopped();
        }
        self.shared.buffer.clear();

        let mut state = self.shared.state();
        state.streaming = false;
        if state.status == CameraStatus::Running {
            state.status = CameraStatus::Stopped;
        }
        tracing::info!(frames = state.frame_count, "Stream stopped");
    }
}

impl Drop for CameraController {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SimulatedBackend, SimulatedStats};
    use std::time::Instant;

    fn simulated_controller(config: CameraConfig) -> (CameraController, SimulatedStats) {
        let stats = SimulatedBackend::new().stats();
        let shared_stats = stats.clone();
        let chain = BackendChain::new().with_backend("simulated", move || {
            Box::new(SimulatedBackend::new().with_stats(shared_stats.clone()))
        });
        (
            CameraController::new(config, ControllerOptions::with_chain(chain)),
            stats,
        )
    }

    fn unavailable_controller() -> CameraController {
        let chain = BackendChain::new()
            .with_backend("simulated", || Box::new(SimulatedBackend::new().failing_open()));
        CameraController::new(CameraConfig::default(), ControllerOptions::with_chain(chain))
    }

    #[test]
    fn test_operations_before_init() {
        let (controller, _) = simulated_controller(CameraConfig::default());

        assert!(matches!(
            controller.take_snapshot(),
            Err(CameraError::NotInitialized)
        ));
        assert!(matches!(
            controller.start_stream(),
            Err(CameraError::NotInitialized)
        ));
        assert!(matches!(
            controller.get_frame(Duration::from_millis(1)),
            Err(CameraError::NotInitialized)
        ));
        assert!(controller.stop_stream().is_ok());
        assert_eq!(controller.get_state().status, CameraStatus::Stopped);
    }

    #[test]
    fn test_init_is_idempotent() {
        let (controller, stats) = simulated_controller(CameraConfig::default());

        controller.init().unwrap();
        controller.init().unwrap();

        assert_eq!(stats.opens(), 1);
        let state = controller.get_state();
        assert_eq!(state.status, CameraStatus::Stopped);
        assert_eq!(state.backend.as_deref(), Some("simulated"));
    }

    #[test]
    fn test_init_without_camera_reports_error() {
        let controller = unavailable_controller();

        controller.init().unwrap();
        let state = controller.get_state();
        assert_eq!(state.status, CameraStatus::Error);
        assert!(state.last_error.is_some());

        assert!(matches!(
            controller.take_snapshot(),
            Err(CameraError::DeviceUnavailable(_))
        ));
        assert!(matches!(
            controller.start_stream(),
            Err(CameraError::DeviceUnavailable(_))
        ));
        assert_eq!(controller.get_state().status, CameraStatus::Error);
    }

    #[test]
    fn test_snapshot_counts_and_leaves_buffer_alone() {
        let (controller, _) = simulated_controller(CameraConfig::default());
        controller.init().unwrap();

        let frame = controller.take_snapshot().unwrap();
        assert_eq!(frame.width(), 640);
        assert_eq!(controller.get_state().frame_count, 1);
        assert!(controller.get_state().last_frame_time.is_some());
        assert_eq!(controller.buffered_frames(), 0);
        assert!(!controller.get_state().streaming);
    }

    #[test]
    fn test_start_twice_spawns_one_worker() {
        let (controller, stats) = simulated_controller(CameraConfig::default());
        controller.init().unwrap();

        controller.start_stream().unwrap();
        controller.start_stream().unwrap();

        assert!(controller.is_streaming());
        assert_eq!(stats.stream_starts(), 1);
        assert_eq!(controller.get_state().status, CameraStatus::Running);

        controller.stop_stream().unwrap();
        controller.stop_stream().unwrap();
        assert_eq!(stats.stream_stops(), 1);
        assert!(!controller.is_streaming());
        assert_eq!(controller.get_state().status, CameraStatus::Stopped);
    }

    #[test]
    fn test_stream_fills_buffer_and_get_frame_drains_it() {
        let config = CameraConfig {
            fps: 30,
            ..Default::default()
        };
        let (controller, _) = simulated_controller(config);
        controller.init().unwrap();
        controller.start_stream().unwrap();

        let first = controller.get_frame(Duration::from_secs(1)).unwrap();
        let second = controller.get_frame(Duration::from_secs(1)).unwrap();
        assert!(second.sequence() > first.sequence());

        controller.stop_stream().unwrap();
        assert_eq!(controller.buffered_frames(), 0);
        assert!(matches!(
            controller.get_frame(Duration::from_millis(1)),
            Err(CameraError::NotStreaming)
        ));
    }

    #[test]
    fn test_invalid_fps_leaves_everything_unchanged() {
        let (controller, stats) = simulated_controller(CameraConfig::default());
        controller.init().unwrap();
        controller.start_stream().unwrap();

        for fps in [0, 31] {
            assert!(matches!(
                controller.set_fps(fps),
                Err(CameraError::ConfigRejected(_))
            ));
        }

        assert_eq!(controller.config().fps, CameraConfig::default().fps);
        assert!(controller.is_streaming());
        assert_eq!(stats.stream_starts(), 1);
        controller.stop_stream().unwrap();
    }

    #[test]
    fn test_set_config_while_streaming_restarts_worker() {
        let (controller, stats) = simulated_controller(CameraConfig::default());
        controller.init().unwrap();
        controller.start_stream().unwrap();

        controller
            .set_config(CameraConfig::with_dimensions(320, 240))
            .unwrap();

        assert!(controller.is_streaming());
        assert_eq!(stats.opens(), 2);
        assert_eq!(stats.stream_starts(), 2);
        let frame = controller.get_frame(Duration::from_secs(1)).unwrap();
        assert_eq!((frame.width(), frame.height()), (320, 240));
        controller.stop_stream().unwrap();
    }

    #[test]
    fn test_set_config_reopen_failure_moves_to_error() {
        let opens = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&opens);
        // First probe succeeds, every later one fails.
        let chain = BackendChain::new().with_backend("flaky", move || {
            if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                Box::new(SimulatedBackend::new())
            } else {
                Box::new(SimulatedBackend::new().failing_open())
            }
        });
        let controller =
            CameraController::new(CameraConfig::default(), ControllerOptions::with_chain(chain));
        controller.init().unwrap();
        controller.start_stream().unwrap();

        let result = controller.set_fps(5);
        assert!(matches!(result, Err(CameraError::DeviceUnavailable(_))));
        assert!(!controller.is_streaming());
        assert_eq!(controller.get_state().status, CameraStatus::Error);
        assert_eq!(controller.config().fps, 5);
    }

    #[test]
    fn test_device_loss_moves_stream_to_error() {
        let chain = BackendChain::new().with_backend("unplugged", || {
            Box::new(SimulatedBackend::new().disconnect_after(3))
        });
        let config = CameraConfig {
            fps: 30,
            ..Default::default()
        };
        let controller = CameraController::new(config, ControllerOptions::with_chain(chain));
        controller.init().unwrap();
        controller.start_stream().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while controller.get_state().status != CameraStatus::Error && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        let state = controller.get_state();
        assert_eq!(state.status, CameraStatus::Error);
        assert!(!state.streaming);
        assert_eq!(controller.buffered_frames(), 0);
        assert!(matches!(
            controller.get_frame(Duration::from_millis(1)),
            Err(CameraError::DeviceUnavailable(_))
        ));

        // The next start reopens the device.
        controller.start_stream().unwrap();
        assert_eq!(controller.get_state().status, CameraStatus::Running);
        controller.stop_stream().unwrap();
    }

    #[test]
    fn test_transient_failures_are_skipped() {
        let chain = BackendChain::new().with_backend("glitchy", || {
            Box::new(SimulatedBackend::new().failing_every(3))
        });
        let config = CameraConfig {
            fps: 30,
            ..Default::default()
        };
        let controller = CameraController::new(config, ControllerOptions::with_chain(chain));
        controller.init().unwrap();
        controller.start_stream().unwrap();

        for _ in 0..6 {
            controller.get_frame(Duration::from_secs(1)).unwrap();
        }
        assert_eq!(controller.get_state().status, CameraStatus::Running);
        assert!(controller.capture_errors() > 0);
        controller.stop_stream().unwrap();
    }

    #[test]
    fn test_cleanup_resets_and_is_idempotent() {
        let (controller, stats) = simulated_controller(CameraConfig::default());
        controller.init().unwrap();
        controller.take_snapshot().unwrap();
        controller.start_stream().unwrap();

        controller.cleanup();
        controller.cleanup();

        assert_eq!(stats.closes(), 1);
        assert!(!controller.is_streaming());
        let state = controller.get_state();
        assert_eq!(state.status, CameraStatus::Stopped);
        assert_eq!(state.frame_count, 0);
        assert!(matches!(
            controller.take_snapshot(),
            Err(CameraError::NotInitialized)
        ));
    }
}
