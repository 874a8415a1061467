//! State shared between the controller and its stream worker.

use super::{ArtifactStore, CameraState, CameraStatus};
use crate::backend::{BackendChain, CameraError, CaptureBackend};
use crate::capture::{CameraConfig, Frame};
use crate::stream::FrameBuffer;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Everything guarded by the device lock.
pub(crate) struct DeviceSlot {
    pub(crate) config: CameraConfig,
    pub(crate) backend: Option<Box<dyn CaptureBackend>>,
    pub(crate) initialized: bool,
}

impl DeviceSlot {
    /// Closes and drops the backend, if any.
    pub(crate) fn release(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.close();
        }
    }
}

/// Controller internals reachable from the worker thread.
///
/// Lock order is `device` before `state`; neither is held across more
/// than one backend call or one state update.
pub(crate) struct Shared {
    pub(crate) device: Mutex<DeviceSlot>,
    pub(crate) state: Mutex<CameraState>,
    pub(crate) buffer: FrameBuffer,
    pub(crate) store: ArtifactStore,
    pub(crate) chain: BackendChain,
    pub(crate) capture_errors: AtomicU64,
}

impl Shared {
    pub(crate) fn device(&self) -> MutexGuard<'_, DeviceSlot> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, CameraState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes sure the slot holds an open backend, probing the chain if not.
    ///
    /// Probe failures are recorded as `Error` status.
    pub(crate) fn ensure_backend<'a>(
        &self,
        slot: &'a mut DeviceSlot,
    ) -> Result<&'a mut Box<dyn CaptureBackend>, CameraError> {
        if !slot.initialized {
            return Err(CameraError::NotInitialized);
        }
        if slot.backend.is_none() {
            match self.chain.open_first(&slot.config) {
                Ok(backend) => {
                    let mut state = self.state();
                    state.backend = Some(backend.name().to_string());
                    if state.status == CameraStatus::Error {
                        state.status = CameraStatus::Stopped;
                    }
                    state.last_error = None;
                    slot.backend = Some(backend);
                }
                Err(e) => {
                    let mut state = self.state();
                    state.backend = None;
                    state.record_error(e.to_string());
                    return Err(e);
                }
            }
        }
        slot.backend
            .as_mut()
            .ok_or_else(|| CameraError::DeviceUnavailable("backend closed".to_string()))
    }

    /// Acquires one frame from the open backend.
    ///
    /// A fatal error closes the backend so the next user has to reopen it.
    pub(crate) fn capture(&self) -> Result<Frame, CameraError> {
        let mut slot = self.device();
        let backend = slot
            .backend
            .as_mut()
            .ok_or_else(|| CameraError::DeviceUnavailable("backend closed".to_string()))?;

        let result = backend.acquire_frame();
        if let Err(ref e) = result {
            self.capture_errors.fetch_add(1, Ordering::Relaxed);
            if e.is_fatal() {
                tracing::error!(error = %e, "Camera device lost");
                slot.release();
                self.state().backend = None;
            }
        }
        result
    }

    /// Counts, persists and buffers a streamed frame.
    pub(crate) fn publish(&self, frame: Frame) {
        {
            let mut state = self.state();
            state.record_frame(frame.captured_at());
        }
        self.store.save_stream_frame(&frame);
        self.buffer.push(frame);
    }

    /// Moves the controller to `Error` after the stream hit an unrecoverable error.
    pub(crate) fn fail_stream(&self, error: &CameraError) {
        {
            let mut slot = self.device();
            slot.release();
            let mut state = self.state();
            state.backend = None;
            state.record_error(error.to_string());
        }
        self.buffer.clear();
    }

    pub(crate) fn capture_errors(&self) -> u64 {
        self.capture_errors.load(Ordering::Relaxed)
    }
}
