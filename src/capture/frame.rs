//! Frame type representing one encoded image with metadata.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

/// A single captured frame.
///
/// Frames are moved, never shared: the backend hands one to the
/// controller, the controller moves it into the buffer or back to the
/// caller, and whoever pops it owns it from then on.
pub struct Frame {
    /// Encoded image bytes (JPEG for every real backend).
    data: Vec<u8>,
    /// Frame width in pixels.
    width: u32,
    /// Frame height in pixels.
    height: u32,
    /// Monotonic capture instant, used for pacing and latency.
    timestamp: Instant,
    /// Wall-clock capture time reported to clients.
    captured_at: DateTime<Utc>,
    /// Sequence number assigned by the producing backend.
    sequence: u64,
}

impl Frame {
    /// Creates a new frame stamped with the current time.
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            timestamp: Instant::now(),
            captured_at: Utc::now(),
            sequence,
        }
    }

    /// Returns the encoded image bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the frame and returns its payload.
    #[inline]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Returns the frame width.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Returns the frame height.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns the monotonic capture instant.
    #[inline]
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// Returns the wall-clock capture time.
    #[inline]
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Returns the sequence number.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the payload size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the payload is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns true if the payload starts with a JPEG SOI marker.
    pub fn is_jpeg(&self) -> bool {
        self.data.starts_with(&[0xFF, 0xD8])
    }

    /// Returns the serializable metadata of this frame.
    pub fn info(&self) -> FrameInfo {
        FrameInfo {
            width: self.width,
            height: self.height,
            sequence: self.sequence,
            captured_at: self.captured_at,
            bytes: self.data.len(),
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Frame metadata as exposed to API clients.
#[derive(Debug, Clone, Serialize)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    pub bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_creation() {
        let frame = Frame::new(vec![0xFF, 0xD8, 0x00, 0xFF, 0xD9], 640, 480, 1);

        assert_eq!(frame.width(), 640);
        assert_eq!(frame.height(), 480);
        assert_eq!(frame.sequence(), 1);
        assert_eq!(frame.len(), 5);
        assert!(frame.is_jpeg());
    }

    #[test]
    fn test_frame_info_matches_frame() {
        let frame = Frame::new(vec![1, 2, 3], 320, 240, 7);
        let info = frame.info();

        assert_eq!(info.sequence, 7);
        assert_eq!(info.bytes, 3);
        assert_eq!(info.captured_at, frame.captured_at());
        assert!(!frame.is_jpeg());
    }

    #[test]
    fn test_into_data_moves_payload() {
        let frame = Frame::new(vec![9; 16], 4, 4, 1);
        let data = frame.into_data();
        assert_eq!(data.len(), 16);
    }
}
