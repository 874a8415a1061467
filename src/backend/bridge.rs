//! Subprocess bridge backend.
//!
//! Talks to a long-lived helper program over its standard streams. Each
//! request is one line on the helper's stdin:
//!
//! ```text
//! init {"width":640,"height":480,...}
//! status
//! snapshot
//! start_stream
//! stop_stream
//! cleanup
//! ```
//!
//! and each response is one JSON object on one line of its stdout:
//!
//! ```text
//! {"success": true, "message": "...", "image_path": "/tmp/snap.jpg",
//!  "data": {"available": true, "frame_count": 12, "streaming": false}}
//! ```
//!
//! Anything that does not parse into [`BridgeResponse`] is a capture
//! failure; a helper that exits or closes its stdout is a lost device.

use super::external::wait_with_timeout;
use super::{CameraError, CaptureBackend};
use crate::capture::{CameraConfig, Frame};
use serde::Deserialize;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

/// Upper bound for the helper to acknowledge `cleanup` and exit.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// One response line from the helper.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub image_path: Option<PathBuf>,
    #[serde(default)]
    pub data: Option<BridgeStatus>,
}

/// Status block carried by `status` responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BridgeStatus {
    pub available: bool,
    pub frame_count: u64,
    pub streaming: bool,
}

impl BridgeResponse {
    /// Parses one response line.
    pub fn parse(line: &str) -> Result<Self, CameraError> {
        serde_json::from_str(line.trim()).map_err(|e| {
            CameraError::CaptureFailed(format!("malformed helper response {line:?}: {e}"))
        })
    }

    fn reason(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| "helper reported failure".to_string())
    }
}

/// A running helper process.
struct HelperSession {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: Receiver<std::io::Result<Vec<u8>>>,
}

impl HelperSession {
    fn spawn(command: &[String]) -> Result<Self, CameraError> {
        let (program, args) = command.split_first().ok_or_else(|| {
            CameraError::DeviceUnavailable("no helper command configured".to_string())
        })?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                CameraError::DeviceUnavailable(format!("failed to start helper {program}: {e}"))
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().ok_or_else(|| {
            CameraError::DeviceUnavailable("helper stdout not captured".to_string())
        })?;

        // The reader ends on its own once the helper closes stdout.
        let (tx, lines) = mpsc::channel();
        std::thread::Builder::new()
            .name("camera-bridge-reader".to_string())
            .spawn(move || {
                for line in BufReader::new(stdout).split(b'\n') {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| {
                CameraError::DeviceUnavailable(format!("failed to start reader thread: {e}"))
            })?;

        Ok(Self {
            child,
            stdin,
            lines,
        })
    }

    fn request(&mut self, command: &str, timeout: Duration) -> Result<BridgeResponse, CameraError> {
        // Late answers to a timed-out request must not be taken for this one.
        while let Ok(stale) = self.lines.try_recv() {
            let stale = stale.map(|raw| String::from_utf8_lossy(&raw).into_owned());
            tracing::debug!(line = ?stale, "Discarding stale helper output");
        }

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| CameraError::DeviceUnavailable("helper stdin closed".to_string()))?;
        writeln!(stdin, "{command}")
            .and_then(|()| stdin.flush())
            .map_err(|e| CameraError::DeviceUnavailable(format!("helper not accepting commands: {e}")))?;

        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match self.lines.recv_timeout(remaining) {
                Ok(Ok(raw)) => {
                    // Undecodable output is a bad reply, not a lost helper.
                    let line = String::from_utf8(raw).map_err(|e| {
                        CameraError::CaptureFailed(format!("helper reply is not UTF-8: {e}"))
                    })?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    return BridgeResponse::parse(&line);
                }
                Ok(Err(e)) => {
                    return Err(CameraError::DeviceUnavailable(format!(
                        "failed to read helper output: {e}"
                    )))
                }
                Err(RecvTimeoutError::Timeout) => return Err(CameraError::Timeout(timeout)),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CameraError::DeviceUnavailable("helper exited".to_string()))
                }
            }
        }
    }

    fn shutdown(mut self, timeout: Duration) {
        if let Err(e) = self.request("cleanup", timeout.min(SHUTDOWN_GRACE)) {
            tracing::debug!(error = %e, "Helper did not acknowledge cleanup");
        }
        drop(self.stdin.take());
        match wait_with_timeout(&mut self.child, SHUTDOWN_GRACE) {
            Ok(status) => tracing::debug!(%status, "Helper exited"),
            Err(e) => tracing::warn!(error = %e, "Helper had to be killed"),
        }
    }
}

/// Backend delegating capture to a helper process.
pub struct BridgeBackend {
    command: Vec<String>,
    timeout: Duration,
    session: Option<HelperSession>,
    config: Option<CameraConfig>,
    sequence: u64,
}

impl BridgeBackend {
    /// Creates a backend that will run `command` (program followed by args).
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self {
            command,
            timeout,
            session: None,
            config: None,
            sequence: 0,
        }
    }

    /// Queries the helper's status block.
    pub fn status(&mut self) -> Result<BridgeStatus, CameraError> {
        let response = self.request("status")?;
        if !response.success {
            return Err(CameraError::CaptureFailed(response.reason()));
        }
        response.data.ok_or_else(|| {
            CameraError::CaptureFailed("status response without data".to_string())
        })
    }

    fn request(&mut self, command: &str) -> Result<BridgeResponse, CameraError> {
        let timeout = self.timeout;
        let session = self.session.as_mut().ok_or_else(CameraError::not_open)?;
        session.request(command, timeout)
    }

    fn handshake(&mut self, config: &CameraConfig) -> Result<(), CameraError> {
        let payload = serde_json::to_string(config)
            .map_err(|e| CameraError::ConfigRejected(e.to_string()))?;

        let response = self.request(&format!("init {payload}"))?;
        if !response.success {
            return Err(CameraError::DeviceUnavailable(response.reason()));
        }

        let status = self.status()?;
        if !status.available {
            return Err(CameraError::DeviceUnavailable(
                "helper reports camera unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

impl CaptureBackend for BridgeBackend {
    fn name(&self) -> &'static str {
        "bridge"
    }

    fn open(&mut self, config: &CameraConfig) -> Result<(), CameraError> {
        config.validate()?;
        self.close();

        self.session = Some(HelperSession::spawn(&self.command)?);
        if let Err(e) = self.handshake(config) {
            self.close();
            return Err(e);
        }

        self.config = Some(config.clone());
        self.sequence = 0;
        tracing::info!(helper = ?self.command, "Camera helper ready");
        Ok(())
    }

    fn acquire_frame(&mut self) -> Result<Frame, CameraError> {
        let (width, height) = self
            .config
            .as_ref()
            .map(|c| (c.width, c.height))
            .ok_or_else(CameraError::not_open)?;

        let response = self.request("snapshot")?;
        if !response.success {
            return Err(CameraError::CaptureFailed(response.reason()));
        }
        let path = response.image_path.ok_or_else(|| {
            CameraError::CaptureFailed("snapshot response without image_path".to_string())
        })?;

        let data = std::fs::read(&path).map_err(|e| {
            CameraError::CaptureFailed(format!("cannot read {}: {e}", path.display()))
        })?;
        if data.is_empty() {
            return Err(CameraError::CaptureFailed(format!(
                "helper wrote an empty image to {}",
                path.display()
            )));
        }

        self.sequence += 1;
        Ok(Frame::new(data, width, height, self.sequence))
    }

    fn is_open(&self) -> bool {
        self.session.is_some() && self.config.is_some()
    }

    fn close(&mut self) {
        self.config = None;
        if let Some(session) = self.session.take() {
            session.shutdown(self.timeout);
            tracing::info!("Camera helper stopped");
        }
    }

    fn stream_started(&mut self) -> Result<(), CameraError> {
        let response = self.request("start_stream")?;
        if response.success {
            Ok(())
        } else {
            Err(CameraError::CaptureFailed(response.reason()))
        }
    }

    fn stream_stopped(&mut self) {
        if let Err(e) = self.request("stop_stream") {
            tracing::debug!(error = %e, "Helper did not acknowledge stop_stream");
        }
    }
}

impl Drop for BridgeBackend {
    fn drop(&mut self) {
        self.close();
    }
}
