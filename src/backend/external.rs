//! Still-capture tool backend.
//!
//! Launches a command-line capture utility once per frame, lets it write
//! a JPEG to a fixed path and reads that file back. No device handle is
//! kept between frames, so the only state is which tool was found.

use super::{CameraError, CaptureBackend};
use crate::capture::{CameraConfig, Frame};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

/// Interval between exit checks while a tool is running.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Supported still-capture utilities, in probe order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureTool {
    /// Legacy Raspberry Pi camera stack.
    Raspistill,
    /// libcamera-based Raspberry Pi camera stack.
    LibcameraStill,
    /// Generic V4L2 webcam grabber.
    Fswebcam,
    /// ffmpeg reading one frame from V4L2.
    Ffmpeg,
}

impl CaptureTool {
    /// All tools in the order they are probed.
    pub const PROBE_ORDER: [Self; 4] = [
        Self::Raspistill,
        Self::LibcameraStill,
        Self::Fswebcam,
        Self::Ffmpeg,
    ];

    /// Executable name.
    pub fn binary(&self) -> &'static str {
        match self {
            Self::Raspistill => "raspistill",
            Self::LibcameraStill => "libcamera-still",
            Self::Fswebcam => "fswebcam",
            Self::Ffmpeg => "ffmpeg",
        }
    }

    /// Whether the tool reads from the configured device node.
    pub fn needs_device(&self) -> bool {
        matches!(self, Self::Fswebcam | Self::Ffmpeg)
    }

    /// Builds the argument list for one capture into `output`.
    pub fn args(&self, config: &CameraConfig, output: &Path) -> Vec<String> {
        let out = output.display().to_string();
        let tuning = &config.tuning;
        let mut args = Vec::new();

        match self {
            Self::Raspistill => {
                args.extend([
                    "-o".into(), out,
                    "-w".into(), config.width.to_string(),
                    "-h".into(), config.height.to_string(),
                    "-q".into(), config.quality.to_string(),
                    "-t".into(), "1".into(),
                    "-n".into(),
                ]);
                if let Some(b) = tuning.brightness {
                    args.extend(["-br".into(), b.to_string()]);
                }
                if let Some(c) = tuning.contrast {
                    // raspistill takes -100..100
                    args.extend(["-co".into(), (i32::from(c) * 2 - 100).to_string()]);
                }
                if let Some(us) = tuning.exposure_us {
                    args.extend(["-ss".into(), us.to_string()]);
                }
            }
            Self::LibcameraStill => {
                args.extend([
                    "-o".into(), out,
                    "--width".into(), config.width.to_string(),
                    "--height".into(), config.height.to_string(),
                    "-q".into(), config.quality.to_string(),
                    "-t".into(), "1".into(),
                    "-n".into(),
                ]);
                if let Some(b) = tuning.brightness {
                    let value = (f64::from(b) - 50.0) / 50.0;
                    args.extend(["--brightness".into(), format!("{value:.2}")]);
                }
                if let Some(c) = tuning.contrast {
                    let value = f64::from(c) / 50.0;
                    args.extend(["--contrast".into(), format!("{value:.2}")]);
                }
                if let Some(us) = tuning.exposure_us {
                    args.extend(["--shutter".into(), us.to_string()]);
                }
            }
            Self::Fswebcam => {
                args.extend([
                    "-d".into(), config.device.clone(),
                    "-r".into(), format!("{}x{}", config.width, config.height),
                    "--jpeg".into(), config.quality.to_string(),
                    "--no-banner".into(),
                ]);
                if let Some(b) = tuning.brightness {
                    args.extend(["-s".into(), format!("brightness={b}%")]);
                }
                if let Some(c) = tuning.contrast {
                    args.extend(["-s".into(), format!("contrast={c}%")]);
                }
                args.push(out);
            }
            Self::Ffmpeg => {
                // ffmpeg's mjpeg qscale runs 2 (best) to 31 (worst)
                let qscale = 2 + (100 - u32::from(config.quality.min(100))) * 29 / 100;
                args.extend([
                    "-loglevel".into(), "error".into(),
                    "-f".into(), "v4l2".into(),
                    "-i".into(), config.device.clone(),
                    "-frames:v".into(), "1".into(),
                    "-s".into(), format!("{}x{}", config.width, config.height),
                    "-q:v".into(), qscale.to_string(),
                    "-y".into(), out,
                ]);
            }
        }
        args
    }

    /// Looks for the first available tool in the given directories.
    pub fn locate(dirs: &[PathBuf]) -> Option<(Self, PathBuf)> {
        Self::PROBE_ORDER.iter().find_map(|tool| {
            dirs.iter()
                .map(|dir| dir.join(tool.binary()))
                .find(|candidate| candidate.is_file())
                .map(|path| (*tool, path))
        })
    }
}

/// Waits for a child process, killing it once `timeout` has elapsed.
pub(crate) fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
) -> Result<ExitStatus, CameraError> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) if Instant::now() >= deadline => {
                if let Err(e) = child.kill() {
                    tracing::warn!(error = %e, "Failed to kill timed out capture process");
                }
                let _ = child.wait();
                return Err(CameraError::Timeout(timeout));
            }
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(e) => {
                return Err(CameraError::CaptureFailed(format!(
                    "failed to wait for capture process: {e}"
                )))
            }
        }
    }
}

/// Backend that shells out to a still-capture tool for every frame.
#[derive(Debug)]
pub struct ExternalToolBackend {
    tool_dirs: Vec<PathBuf>,
    output_path: PathBuf,
    timeout: Duration,
    tool: Option<(CaptureTool, PathBuf)>,
    config: Option<CameraConfig>,
    sequence: u64,
}

impl ExternalToolBackend {
    /// Creates a backend searching `tool_dirs` and capturing into `output_path`.
    pub fn new(tool_dirs: Vec<PathBuf>, output_path: PathBuf, timeout: Duration) -> Self {
        Self {
            tool_dirs,
            output_path,
            timeout,
            tool: None,
            config: None,
            sequence: 0,
        }
    }

    /// Returns the tool selected at open time.
    pub fn tool(&self) -> Option<CaptureTool> {
        self.tool.as_ref().map(|(tool, _)| *tool)
    }
}

impl CaptureBackend for ExternalToolBackend {
    fn name(&self) -> &'static str {
        "external"
    }

    fn open(&mut self, config: &CameraConfig) -> Result<(), CameraError> {
        config.validate()?;

        let (tool, path) = CaptureTool::locate(&self.tool_dirs).ok_or_else(|| {
            CameraError::DeviceUnavailable(
                "no capture tool found (raspistill, libcamera-still, fswebcam, ffmpeg)"
                    .to_string(),
            )
        })?;

        if tool.needs_device() && !Path::new(&config.device).exists() {
            return Err(CameraError::DeviceUnavailable(format!(
                "device {} does not exist",
                config.device
            )));
        }

        if let Some(parent) = self.output_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CameraError::DeviceUnavailable(format!(
                    "cannot create capture directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        tracing::info!(tool = tool.binary(), path = %path.display(), "External capture tool selected");
        self.tool = Some((tool, path));
        self.config = Some(config.clone());
        self.sequence = 0;
        Ok(())
    }

    fn acquire_frame(&mut self) -> Result<Frame, CameraError> {
        let config = self.config.as_ref().ok_or_else(CameraError::not_open)?;
        let (tool, path) = self.tool.as_ref().ok_or_else(CameraError::not_open)?;

        // A stale file from an earlier capture must never be returned.
        let _ = std::fs::remove_file(&self.output_path);

        let mut child = Command::new(path)
            .args(tool.args(config, &self.output_path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => CameraError::DeviceUnavailable(format!(
                    "{} disappeared: {e}",
                    tool.binary()
                )),
                _ => CameraError::CaptureFailed(format!("failed to launch {}: {e}", tool.binary())),
            })?;

        let status = wait_with_timeout(&mut child, self.timeout)?;
        if !status.success() {
            return Err(CameraError::CaptureFailed(format!(
                "{} exited with {status}",
                tool.binary()
            )));
        }

        let data = std::fs::read(&self.output_path).map_err(|e| {
            CameraError::CaptureFailed(format!(
                "cannot read {}: {e}",
                self.output_path.display()
            ))
        })?;
        if data.is_empty() {
            return Err(CameraError::CaptureFailed(format!(
                "{} produced an empty image",
                tool.binary()
            )));
        }

        self.sequence += 1;
        tracing::trace!(tool = tool.binary(), bytes = data.len(), "Captured still");
        Ok(Frame::new(data, config.width, config.height, self.sequence))
    }

    fn is_open(&self) -> bool {
        self.tool.is_some()
    }

    fn close(&mut self) {
        if self.tool.take().is_some() {
            self.config = None;
            tracing::info!("External capture tool released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "pi-camera-external-{}-{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_raspistill_args() {
        let config = CameraConfig::default();
        let args = CaptureTool::Raspistill.args(&config, Path::new("/tmp/out.jpg"));
        assert_eq!(
            args,
            vec!["-o", "/tmp/out.jpg", "-w", "640", "-h", "480", "-q", "85", "-t", "1", "-n"]
        );
    }

    #[test]
    fn test_fswebcam_args_include_device_and_tuning() {
        let mut config = CameraConfig::default();
        config.tuning.brightness = Some(60);
        let args = CaptureTool::Fswebcam.args(&config, Path::new("out.jpg"));

        assert_eq!(args.first().map(String::as_str), Some("-d"));
        assert!(args.contains(&"/dev/video0".to_string()));
        assert!(args.contains(&"brightness=60%".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("out.jpg"));
    }

    #[test]
    fn test_ffmpeg_quality_mapping() {
        let config = CameraConfig {
            quality: 100,
            ..Default::default()
        };
        let args = CaptureTool::Ffmpeg.args(&config, Path::new("out.jpg"));
        let pos = args.iter().position(|a| a == "-q:v").unwrap();
        assert_eq!(args[pos + 1], "2");
    }

    #[test]
    fn test_capture_before_open_is_capture_failure() {
        let mut backend = ExternalToolBackend::new(
            Vec::new(),
            std::env::temp_dir().join("pi-camera-never-opened.jpg"),
            Duration::from_secs(1),
        );
        assert!(matches!(
            backend.acquire_frame(),
            Err(CameraError::CaptureFailed(_))
        ));
    }

    #[test]
    fn test_open_without_tools_is_unavailable() {
        let dir = scratch_dir("empty");
        let mut backend =
            ExternalToolBackend::new(vec![dir.clone()], dir.join("frame.jpg"), Duration::from_secs(1));

        assert!(matches!(
            backend.open(&CameraConfig::default()),
            Err(CameraError::DeviceUnavailable(_))
        ));
        assert!(!backend.is_open());
        backend.close();
    }

    #[cfg(unix)]
    fn install_fake_tool(dir: &Path, name: &str, script: &str) {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_capture_with_fake_raspistill() {
        let dir = scratch_dir("fake");
        // Writes a tiny JPEG-framed payload to the path following -o.
        install_fake_tool(
            &dir,
            "raspistill",
            "#!/bin/sh\nprintf '\\377\\330data\\377\\331' > \"$2\"\n",
        );
        let mut backend =
            ExternalToolBackend::new(vec![dir.clone()], dir.join("frame.jpg"), Duration::from_secs(2));

        backend.open(&CameraConfig::default()).unwrap();
        assert_eq!(backend.tool(), Some(CaptureTool::Raspistill));

        let frame = backend.acquire_frame().unwrap();
        assert!(frame.is_jpeg());
        assert_eq!(frame.sequence(), 1);
        assert_eq!(frame.width(), 640);

        backend.close();
        assert!(!backend.is_open());
    }

    #[cfg(unix)]
    #[test]
    fn test_slow_tool_times_out() {
        let dir = scratch_dir("slow");
        install_fake_tool(&dir, "raspistill", "#!/bin/sh\nsleep 5\n");
        let mut backend = ExternalToolBackend::new(
            vec![dir.clone()],
            dir.join("frame.jpg"),
            Duration::from_millis(200),
        );
        backend.open(&CameraConfig::default()).unwrap();

        let started = Instant::now();
        assert!(matches!(
            backend.acquire_frame(),
            Err(CameraError::Timeout(_))
        ));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_tool_is_capture_failure() {
        let dir = scratch_dir("failing");
        install_fake_tool(&dir, "raspistill", "#!/bin/sh\nexit 3\n");
        let mut backend =
            ExternalToolBackend::new(vec![dir.clone()], dir.join("frame.jpg"), Duration::from_secs(2));
        backend.open(&CameraConfig::default()).unwrap();

        assert!(matches!(
            backend.acquire_frame(),
            Err(CameraError::CaptureFailed(_))
        ));
    }
}
