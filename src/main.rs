//! Pi Camera Service CLI
//!
//! Runs the camera controller standalone: serve the HTTP API, take a
//! single snapshot, stream for a while, or print the camera state.

use clap::{Parser, Subcommand};
use pi_camera::{
    capture::FileConfig, BackendKind, CameraController, CameraError, CameraStatus,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "pi-camera", version, about = "Raspberry Pi camera capture service")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use the synthetic backend instead of real hardware.
    #[arg(long)]
    simulate: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP API until interrupted.
    #[cfg(feature = "http")]
    Serve {
        /// Override the configured bind address.
        #[arg(long)]
        bind: Option<std::net::SocketAddr>,
    },
    /// Capture one still image.
    Snapshot {
        /// Also write the image to this path.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Stream frames for a fixed duration, logging each one.
    Stream {
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
    /// Initialize the camera and print its state as JSON.
    Status,
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Pi Camera Service v{}", pi_camera::VERSION);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<FileConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            FileConfig::from_file(path)?
        }
        None => FileConfig::default(),
    };
    if cli.simulate {
        info!("Using simulated camera input");
        config.backend.probe_order = vec![BackendKind::Simulated];
    }
    Ok(config)
}

fn run(cli: Cli) -> CliResult {
    let config = load_config(&cli)?;
    let controller = Arc::new(CameraController::from_file_config(&config));

    controller.init()?;
    let state = controller.get_state();
    match state.backend.as_deref() {
        Some(backend) => info!(backend, "Camera ready"),
        None => warn!(
            error = state.last_error.as_deref().unwrap_or("unknown"),
            "No camera available"
        ),
    }

    let result = match cli.command {
        #[cfg(feature = "http")]
        Command::Serve { bind } => serve(&controller, bind.unwrap_or(config.server.bind_addr)),
        Command::Snapshot { output } => snapshot(&controller, output),
        Command::Stream { seconds } => stream(&controller, Duration::from_secs(seconds)),
        Command::Status => status(&controller),
    };

    controller.cleanup();
    result
}

#[cfg(feature = "http")]
fn serve(controller: &Arc<CameraController>, bind_addr: std::net::SocketAddr) -> CliResult {
    use pi_camera::api::{ApiServer, ApiServerConfig};

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let server = ApiServer::new(ApiServerConfig { bind_addr }, Arc::clone(controller))?;
    runtime.block_on(server.run(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
        }
        info!("Shutting down");
    }))?;
    Ok(())
}

fn snapshot(controller: &CameraController, output: Option<PathBuf>) -> CliResult {
    let frame = controller.take_snapshot()?;
    info!(
        width = frame.width(),
        height = frame.height(),
        bytes = frame.len(),
        "Snapshot taken"
    );
    if let Some(path) = controller.store().snapshot_path() {
        info!(path = %path.display(), "Snapshot saved");
    }
    if let Some(output) = output {
        std::fs::write(&output, frame.data())?;
        info!(path = %output.display(), "Snapshot written");
    }
    Ok(())
}

fn stream(controller: &CameraController, duration: Duration) -> CliResult {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))?;

    controller.start_stream()?;
    info!(seconds = duration.as_secs(), "Streaming");

    let deadline = Instant::now() + duration;
    let mut received = 0u64;
    while running.load(Ordering::SeqCst) && Instant::now() < deadline {
        match controller.get_frame(Duration::from_secs(1)) {
            Ok(frame) => {
                received += 1;
                info!(sequence = frame.sequence(), bytes = frame.len(), "Frame");
            }
            Err(CameraError::Timeout(_)) => continue,
            Err(e) => {
                warn!("Stream ended: {}", e);
                break;
            }
        }
    }

    controller.stop_stream()?;
    let state = controller.get_state();
    info!(
        received,
        captured = state.frame_count,
        status = ?state.status,
        "Stream finished"
    );
    if state.status == CameraStatus::Error {
        return Err(state
            .last_error
            .unwrap_or_else(|| "camera error".to_string())
            .into());
    }
    Ok(())
}

fn status(controller: &CameraController) -> CliResult {
    let state = controller.get_state();
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}
