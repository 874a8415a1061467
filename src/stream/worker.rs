//! Background capture loop.
//!
//! One worker thread exists per active stream. It pulls frames from the
//! controller's backend, hands them to the frame buffer and sleeps out the
//! rest of each frame period. Stopping is cooperative: the stop flag is
//! checked at the top of every iteration and the pacing sleep is a channel
//! wait, so a stop request cuts it short.

use crate::backend::CameraError;
use crate::capture::StreamSettings;
use crate::controller::Shared;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Handle to a running capture thread.
pub(crate) struct StreamWorker {
    stop: Arc<AtomicBool>,
    wake: Sender<()>,
    handle: JoinHandle<()>,
}

impl StreamWorker {
    /// Spawns the capture loop at the given frame period.
    pub(crate) fn spawn(
        shared: Arc<Shared>,
        period: Duration,
        settings: StreamSettings,
    ) -> Result<Self, CameraError> {
        let stop = Arc::new(AtomicBool::new(false));
        let (wake, wake_rx) = mpsc::channel();
        let thread_stop = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("camera-stream".to_string())
            .spawn(move || run(&shared, period, &settings, &thread_stop, &wake_rx))
            .map_err(|e| {
                CameraError::CaptureFailed(format!("failed to spawn stream worker: {e}"))
            })?;

        tracing::info!(period_ms = period.as_millis() as u64, "Stream worker started");
        Ok(Self { stop, wake, handle })
    }

    /// Returns true once the thread has left its loop.
    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signals the loop to stop and waits for the thread to exit.
    pub(crate) fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.wake.send(());
        if self.handle.join().is_err() {
            tracing::error!("Stream worker panicked");
        }
    }
}

fn run(
    shared: &Shared,
    period: Duration,
    settings: &StreamSettings,
    stop: &AtomicBool,
    wake: &Receiver<()>,
) {
    let mut consecutive_failures = 0u32;

    while !stop.load(Ordering::SeqCst) {
        let tick = Instant::now();

        match capture_with_retry(shared, settings.retries_per_tick, stop) {
            Ok(Some(frame)) => {
                consecutive_failures = 0;
                tracing::trace!(sequence = frame.sequence(), "Streamed frame");
                shared.publish(frame);
            }
            Ok(None) => break,
            Err(e) if e.is_fatal() => {
                tracing::error!(error = %e, "Stream stopped by device error");
                shared.fail_stream(&e);
                break;
            }
            Err(e) => {
                consecutive_failures += 1;
                tracing::warn!(
                    error = %e,
                    consecutive = consecutive_failures,
                    "Frame capture failed, skipping tick"
                );
                if consecutive_failures >= settings.max_consecutive_failures.max(1) {
                    let fatal = CameraError::DeviceUnavailable(format!(
                        "{consecutive_failures} consecutive capture failures, last: {e}"
                    ));
                    tracing::error!(error = %fatal, "Stream giving up");
                    shared.fail_stream(&fatal);
                    break;
                }
            }
        }

        match wake.recv_timeout(pacing_delay(period, tick.elapsed())) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    tracing::info!("Stream worker exited");
}

/// Tries one tick's capture, retrying transient failures.
///
/// Returns `Ok(None)` when a stop was requested between attempts.
/// Timeouts are not retried; they already consumed the tick.
fn capture_with_retry(
    shared: &Shared,
    retries: u32,
    stop: &AtomicBool,
) -> Result<Option<crate::capture::Frame>, CameraError> {
    let mut attempt = 0;
    loop {
        match shared.capture() {
            Ok(frame) => return Ok(Some(frame)),
            Err(CameraError::CaptureFailed(reason)) if attempt < retries => {
                attempt += 1;
                tracing::debug!(%reason, attempt, "Retrying capture");
                if stop.load(Ordering::SeqCst) {
                    return Ok(None);
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Time left in the frame period after an iteration that took `elapsed`.
pub(crate) fn pacing_delay(period: Duration, elapsed: Duration) -> Duration {
    period.saturating_sub(elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pacing_delay_subtracts_elapsed() {
        let period = Duration::from_millis(100);
        assert_eq!(
            pacing_delay(period, Duration::from_millis(30)),
            Duration::from_millis(70)
        );
    }

    #[test]
    fn test_pacing_delay_never_negative() {
        let period = Duration::from_millis(100);
        assert_eq!(pacing_delay(period, Duration::from_millis(250)), Duration::ZERO);
    }
}
