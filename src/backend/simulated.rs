//! Virtual camera producing synthetic frames.
//!
//! Used by the test suite and by `--simulate` on machines without a
//! camera. Failure modes can be scripted so the stream worker's retry and
//! fatal-error paths can be exercised deterministically.

use super::{CameraError, CaptureBackend};
use crate::capture::{CameraConfig, Frame};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counters shared between a simulated backend and the test observing it.
#[derive(Debug, Clone, Default)]
pub struct SimulatedStats {
    inner: Arc<StatsInner>,
}

#[derive(Debug, Default)]
struct StatsInner {
    opens: AtomicU64,
    closes: AtomicU64,
    captures: AtomicU64,
    stream_starts: AtomicU64,
    stream_stops: AtomicU64,
}

impl SimulatedStats {
    /// Successful opens.
    pub fn opens(&self) -> u64 {
        self.inner.opens.load(Ordering::SeqCst)
    }

    /// Closes of an open backend.
    pub fn closes(&self) -> u64 {
        self.inner.closes.load(Ordering::SeqCst)
    }

    /// Frames successfully produced.
    pub fn captures(&self) -> u64 {
        self.inner.captures.load(Ordering::SeqCst)
    }

    /// `stream_started` notifications.
    pub fn stream_starts(&self) -> u64 {
        self.inner.stream_starts.load(Ordering::SeqCst)
    }

    /// `stream_stopped` notifications.
    pub fn stream_stops(&self) -> u64 {
        self.inner.stream_stops.load(Ordering::SeqCst)
    }
}

/// Synthetic camera backend.
#[derive(Debug, Default)]
pub struct SimulatedBackend {
    config: Option<CameraConfig>,
    sequence: u64,
    attempts: u64,
    capture_delay: Duration,
    fail_open: bool,
    fail_every: Option<u64>,
    disconnect_after: Option<u64>,
    stats: SimulatedStats,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `open` fail with `DeviceUnavailable`.
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Sleeps this long inside every `acquire_frame`.
    pub fn with_capture_delay(mut self, delay: Duration) -> Self {
        self.capture_delay = delay;
        self
    }

    /// Every `n`-th acquisition attempt fails with `CaptureFailed`.
    pub fn failing_every(mut self, n: u64) -> Self {
        self.fail_every = Some(n.max(1));
        self
    }

    /// After `frames` successful captures the device reports a disconnect.
    pub fn disconnect_after(mut self, frames: u64) -> Self {
        self.disconnect_after = Some(frames);
        self
    }

    /// Shares an existing set of counters.
    pub fn with_stats(mut self, stats: SimulatedStats) -> Self {
        self.stats = stats;
        self
    }

    /// Returns a handle to this backend's counters.
    pub fn stats(&self) -> SimulatedStats {
        self.stats.clone()
    }

    fn synthesize(&self, config: &CameraConfig) -> Vec<u8> {
        // JPEG framing around a small deterministic pattern; not decodable,
        // only recognisable as a frame payload.
        let body_len = ((config.width / 8) * (config.height / 8)) as usize;
        let mut data = Vec::with_capacity(body_len + 4);
        data.extend_from_slice(&[0xFF, 0xD8]);
        data.extend((0..body_len).map(|i| ((i as u64 ^ self.sequence) % 251) as u8));
        data.extend_from_slice(&[0xFF, 0xD9]);
        data
    }
}

impl CaptureBackend for SimulatedBackend {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn open(&mut self, config: &CameraConfig) -> Result<(), CameraError> {
        config.validate()?;
        if self.fail_open {
            return Err(CameraError::DeviceUnavailable(format!(
                "no simulated device at {}",
                config.device
            )));
        }
        self.config = Some(config.clone());
        self.sequence = 0;
        self.attempts = 0;
        self.stats.inner.opens.fetch_add(1, Ordering::SeqCst);
        tracing::info!(width = config.width, height = config.height, fps = config.fps, "Simulated camera opened");
        Ok(())
    }

    fn acquire_frame(&mut self) -> Result<Frame, CameraError> {
        let config = self.config.clone().ok_or_else(CameraError::not_open)?;

        if !self.capture_delay.is_zero() {
            std::thread::sleep(self.capture_delay);
        }

        if let Some(limit) = self.disconnect_after {
            if self.sequence >= limit {
                return Err(CameraError::DeviceUnavailable(
                    "simulated device disconnected".to_string(),
                ));
            }
        }

        self.attempts += 1;
        if let Some(n) = self.fail_every {
            if self.attempts % n == 0 {
                return Err(CameraError::CaptureFailed(format!(
                    "simulated glitch on attempt {}",
                    self.attempts
                )));
            }
        }

        let data = self.synthesize(&config);
        self.sequence += 1;
        self.stats.inner.captures.fetch_add(1, Ordering::SeqCst);
        Ok(Frame::new(data, config.width, config.height, self.sequence))
    }

    fn is_open(&self) -> bool {
        self.config.is_some()
    }

    fn close(&mut self) {
        if self.config.take().is_some() {
            self.stats.inner.closes.fetch_add(1, Ordering::SeqCst);
            tracing::info!("Simulated camera closed");
        }
    }

    fn stream_started(&mut self) -> Result<(), CameraError> {
        self.stats.inner.stream_starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stream_stopped(&mut self) {
        self.stats.inner.stream_stops.fetch_add(1, Ordering::SeqCst);
    }
}
