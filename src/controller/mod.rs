//! Camera lifecycle and state machine.
//!
//! ```text
//!            init ok            start_stream
//!   Stopped ─────────► Stopped ─────────────► Running
//!      │                  ▲                     │
//!      │ init fails       │ stop_stream         │ device lost
//!      ▼                  └─────────────────────┤
//!    Error ◄────────────────────────────────────┘
//!      │ start_stream / take_snapshot (reopen)
//!      └──────────────────────────────► Running / Stopped
//! ```
//!
//! `cleanup` returns to `Stopped` from anywhere.

mod camera;
mod shared;
mod state;
mod storage;

pub use camera::{CameraController, ControllerOptions};
pub(crate) use shared::Shared;
pub use state::{CameraState, CameraStatus};
pub use storage::{ArtifactStore, SNAPSHOT_FILE, STREAM_FILE};
