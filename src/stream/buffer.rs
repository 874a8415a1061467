//! Bounded drop-oldest frame queue.

use crate::backend::CameraError;
use crate::capture::Frame;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Default number of frames held while streaming.
pub const DEFAULT_CAPACITY: usize = 5;

/// Fixed-capacity FIFO of frames shared by one producer and any consumers.
///
/// `push` never blocks: when the buffer is full the oldest frame is
/// evicted first, so the buffer always holds the most recent frames in
/// production order. Consumers wait on `try_pop` for at most the timeout
/// they pass in.
#[derive(Debug)]
pub struct FrameBuffer {
    frames: Mutex<VecDeque<Frame>>,
    available: Condvar,
    capacity: usize,
}

impl FrameBuffer {
    /// Creates a buffer holding at most `capacity` frames (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Frame>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a frame, evicting the oldest one if the buffer is full.
    ///
    /// Returns the evicted frame, if any.
    pub fn push(&self, frame: Frame) -> Option<Frame> {
        let evicted = {
            let mut frames = self.lock();
            let evicted = if frames.len() >= self.capacity {
                frames.pop_front()
            } else {
                None
            };
            frames.push_back(frame);
            evicted
        };
        self.available.notify_one();

        if let Some(ref old) = evicted {
            tracing::trace!(sequence = old.sequence(), "Evicted oldest buffered frame");
        }
        evicted
    }

    /// Removes the oldest frame, waiting up to `timeout` for one to arrive.
    pub fn try_pop(&self, timeout: Duration) -> Result<Frame, CameraError> {
        let frames = self.lock();
        let (mut frames, _) = self
            .available
            .wait_timeout_while(frames, timeout, |frames| frames.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        frames.pop_front().ok_or(CameraError::Timeout(timeout))
    }

    /// Drains and drops every buffered frame. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let drained = {
            let mut frames = self.lock();
            let count = frames.len();
            frames.clear();
            count
        };
        self.available.notify_all();
        if drained > 0 {
            tracing::debug!(frames = drained, "Frame buffer cleared");
        }
        drained
    }

    /// Returns the number of buffered frames.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no frames are buffered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns the maximum number of frames held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the buffered sequence numbers, oldest first.
    pub fn sequences(&self) -> Vec<u64> {
        self.lock().iter().map(Frame::sequence).collect()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::Instant;

    fn frame(sequence: u64) -> Frame {
        Frame::new(vec![0u8; 8], 4, 2, sequence)
    }

    #[test]
    fn test_overflow_keeps_most_recent() {
        let buffer = FrameBuffer::new(5);
        for seq in 1..=8 {
            buffer.push(frame(seq));
        }

        assert_eq!(buffer.len(), 5);
        let popped: Vec<u64> = (0..5)
            .map(|_| buffer.try_pop(Duration::ZERO).unwrap().sequence())
            .collect();
        assert_eq!(popped, vec![4, 5, 6, 7, 8]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_push_returns_evicted_frame() {
        let buffer = FrameBuffer::new(1);
        assert!(buffer.push(frame(1)).is_none());
        assert_eq!(buffer.push(frame(2)).map(|f| f.sequence()), Some(1));
    }

    #[test]
    fn test_try_pop_times_out_when_empty() {
        let buffer = FrameBuffer::new(3);
        let started = Instant::now();
        let result = buffer.try_pop(Duration::from_millis(50));

        assert!(matches!(result, Err(CameraError::Timeout(_))));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_try_pop_wakes_on_push() {
        let buffer = Arc::new(FrameBuffer::new(3));
        let producer = Arc::clone(&buffer);

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            producer.push(frame(42));
        });

        let started = Instant::now();
        let popped = buffer.try_pop(Duration::from_secs(5)).unwrap();
        assert_eq!(popped.sequence(), 42);
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_clear_drains_everything() {
        let buffer = FrameBuffer::new(4);
        for seq in 1..=3 {
            buffer.push(frame(seq));
        }
        assert_eq!(buffer.clear(), 3);
        assert!(buffer.is_empty());
        assert_eq!(buffer.clear(), 0);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let buffer = FrameBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
    }

    proptest! {
        #[test]
        fn prop_buffer_holds_last_n_in_order(capacity in 1usize..16, pushes in 0u64..64) {
            let buffer = FrameBuffer::new(capacity);
            for seq in 1..=pushes {
                buffer.push(frame(seq));
                prop_assert!(buffer.len() <= capacity);
            }

            let kept = pushes.min(capacity as u64);
            let expected: Vec<u64> = (pushes - kept + 1..=pushes).collect();
            prop_assert_eq!(buffer.sequences(), expected);
        }
    }
}
