//! Native capture through nokhwa.
//!
//! nokhwa camera handles are not `Send`, so the handle lives on its own
//! device thread for its whole life. The backend talks to that thread over
//! channels, which is also what bounds every request by a timeout.

use super::{CameraError, CaptureBackend};
use crate::capture::{CameraConfig, Frame};
use nokhwa::{
    pixel_format::RgbFormat,
    utils::{
        CameraFormat, CameraIndex, ControlValueSetter, FrameFormat, KnownCameraControl,
        RequestedFormat, RequestedFormatType, Resolution,
    },
    Camera,
};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

/// Opening a V4L2 device and negotiating a format can take a while.
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `close` waits for the device thread before detaching it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

enum DeviceRequest {
    Capture,
}

struct DeviceThread {
    requests: Sender<DeviceRequest>,
    frames: Receiver<Result<Frame, CameraError>>,
    exited: Receiver<()>,
    handle: JoinHandle<()>,
}

/// Backend owning a camera through the platform's native capture API.
pub struct NativeBackend {
    timeout: Duration,
    device: Option<DeviceThread>,
}

impl NativeBackend {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            device: None,
        }
    }
}

fn camera_index(config: &CameraConfig) -> CameraIndex {
    match config.device_index() {
        Some(index) => CameraIndex::Index(index),
        None => CameraIndex::String(config.device.clone()),
    }
}

fn open_camera(config: &CameraConfig) -> Result<Camera, CameraError> {
    let requested = CameraFormat::new(
        Resolution::new(config.width, config.height),
        FrameFormat::MJPEG,
        config.fps,
    );
    let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(requested));

    let mut camera = Camera::new(camera_index(config), format)
        .map_err(|e| CameraError::DeviceUnavailable(format!("failed to open {}: {e}", config.device)))?;

    let controls = [
        (KnownCameraControl::Brightness, config.tuning.brightness.map(i64::from)),
        (KnownCameraControl::Contrast, config.tuning.contrast.map(i64::from)),
        (KnownCameraControl::Exposure, config.tuning.exposure_us.map(i64::from)),
    ];
    for (control, value) in controls {
        if let Some(value) = value {
            if let Err(e) = camera.set_camera_control(control, ControlValueSetter::Integer(value)) {
                tracing::warn!(?control, value, error = %e, "Camera control not applied");
            }
        }
    }

    camera
        .open_stream()
        .map_err(|e| CameraError::DeviceUnavailable(format!("failed to start stream: {e}")))?;

    tracing::info!(
        device = %config.device,
        format = ?camera.camera_format(),
        "Native camera negotiated format"
    );
    Ok(camera)
}

fn grab(camera: &mut Camera, quality: u8, sequence: u64) -> Result<Frame, CameraError> {
    let buffer = camera
        .frame()
        .map_err(|e| CameraError::CaptureFailed(format!("frame read failed: {e}")))?;
    let resolution = buffer.resolution();
    let (width, height) = (resolution.width(), resolution.height());

    if buffer.source_frame_format() == FrameFormat::MJPEG {
        return Ok(Frame::new(buffer.buffer().to_vec(), width, height, sequence));
    }

    let rgb = buffer
        .decode_image::<RgbFormat>()
        .map_err(|e| CameraError::CaptureFailed(format!("frame decode failed: {e}")))?
        .into_raw();

    let mut jpeg = Vec::with_capacity(rgb.len() / 8);
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
        .encode(&rgb, width, height, image::ColorType::Rgb8)
        .map_err(|e| CameraError::CaptureFailed(format!("jpeg encode failed: {e}")))?;

    Ok(Frame::new(jpeg, width, height, sequence))
}

fn device_loop(
    config: CameraConfig,
    ready: Sender<Result<(), CameraError>>,
    requests: Receiver<DeviceRequest>,
    frames: Sender<Result<Frame, CameraError>>,
    exited: Sender<()>,
) {
    let mut camera = match open_camera(&config) {
        Ok(camera) => camera,
        Err(e) => {
            let _ = ready.send(Err(e));
            let _ = exited.send(());
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        // The opener gave up waiting.
        let _ = camera.stop_stream();
        let _ = exited.send(());
        return;
    }

    let mut sequence = 0;
    while let Ok(DeviceRequest::Capture) = requests.recv() {
        let result = grab(&mut camera, config.quality, sequence + 1);
        if result.is_ok() {
            sequence += 1;
        }
        if frames.send(result).is_err() {
            break;
        }
    }

    if let Err(e) = camera.stop_stream() {
        tracing::warn!(error = %e, "Failed to stop native camera stream");
    }
    let _ = exited.send(());
}

impl CaptureBackend for NativeBackend {
    fn name(&self) -> &'static str {
        "native"
    }

    fn open(&mut self, config: &CameraConfig) -> Result<(), CameraError> {
        config.validate()?;
        self.close();

        let (ready_tx, ready_rx) = mpsc::channel();
        let (request_tx, request_rx) = mpsc::channel();
        let (frame_tx, frame_rx) = mpsc::channel();
        let (exit_tx, exit_rx) = mpsc::channel();
        let thread_config = config.clone();

        let handle = std::thread::Builder::new()
            .name("camera-device".to_string())
            .spawn(move || device_loop(thread_config, ready_tx, request_rx, frame_tx, exit_tx))
            .map_err(|e| CameraError::DeviceUnavailable(format!("failed to start device thread: {e}")))?;

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => {
                self.device = Some(DeviceThread {
                    requests: request_tx,
                    frames: frame_rx,
                    exited: exit_rx,
                    handle,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => Err(CameraError::DeviceUnavailable(format!(
                "camera {} did not open within {OPEN_TIMEOUT:?}",
                config.device
            ))),
        }
    }

    fn acquire_frame(&mut self) -> Result<Frame, CameraError> {
        let device = self.device.as_ref().ok_or_else(CameraError::not_open)?;

        while device.frames.try_recv().is_ok() {
            tracing::debug!("Discarding late frame from timed out request");
        }

        device
            .requests
            .send(DeviceRequest::Capture)
            .map_err(|_| CameraError::DeviceUnavailable("device thread exited".to_string()))?;

        match device.frames.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(CameraError::Timeout(self.timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(CameraError::DeviceUnavailable(
                "device thread exited".to_string(),
            )),
        }
    }

    fn is_open(&self) -> bool {
        self.device.is_some()
    }

    fn close(&mut self) {
        let Some(device) = self.device.take() else {
            return;
        };
        drop(device.requests);
        match device.exited.recv_timeout(SHUTDOWN_GRACE) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = device.handle.join();
                tracing::info!("Native camera closed");
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!("Native camera thread still busy, detaching it");
            }
        }
    }
}

impl Drop for NativeBackend {
    fn drop(&mut self) {
        self.close();
    }
}
