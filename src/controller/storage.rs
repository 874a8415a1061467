//! On-disk copies of the latest snapshot and live frame.
//!
//! Both files are overwritten in place; there is no history.

use crate::capture::Frame;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// File name of the most recent snapshot.
pub const SNAPSHOT_FILE: &str = "snapshot.jpg";

/// File name of the most recent streamed frame.
pub const STREAM_FILE: &str = "stream.jpg";

/// Writes frames to a fixed output directory.
#[derive(Debug, Default)]
pub struct ArtifactStore {
    dir: Option<PathBuf>,
    warned: AtomicBool,
}

impl ArtifactStore {
    /// Creates a store writing into `dir`; `None` disables persistence.
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            warned: AtomicBool::new(false),
        }
    }

    /// Returns the output directory, if persistence is enabled.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Path of the snapshot file.
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.join(SNAPSHOT_FILE))
    }

    /// Path of the live stream file.
    pub fn stream_path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.join(STREAM_FILE))
    }

    /// Persists a snapshot. Failures are logged, never returned.
    pub fn save_snapshot(&self, frame: &Frame) {
        self.save(SNAPSHOT_FILE, frame);
    }

    /// Persists the latest streamed frame. Failures are logged, never returned.
    pub fn save_stream_frame(&self, frame: &Frame) {
        self.save(STREAM_FILE, frame);
    }

    fn save(&self, name: &str, frame: &Frame) {
        let Some(dir) = self.dir.as_ref() else {
            return;
        };

        match write_replacing(dir, name, frame.data()) {
            Ok(()) => {
                self.warned.store(false, Ordering::Relaxed);
                tracing::trace!(file = name, sequence = frame.sequence(), "Frame persisted");
            }
            // The stream writes at fps; only the first failure in a row is a warning.
            Err(e) if !self.warned.swap(true, Ordering::Relaxed) => {
                tracing::warn!(file = name, dir = %dir.display(), error = %e, "Failed to persist frame");
            }
            Err(e) => {
                tracing::debug!(file = name, error = %e, "Failed to persist frame");
            }
        }
    }
}

/// Writes `data` to `dir/name` through a temporary file and a rename so
/// readers never observe a half-written image.
fn write_replacing(dir: &Path, name: &str, data: &[u8]) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let tmp = dir.join(format!(".{name}.tmp"));
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, dir.join(name))
}
