//! Streaming path: the bounded frame buffer and the worker that fills it.

mod buffer;
mod worker;

pub use buffer::{FrameBuffer, DEFAULT_CAPACITY};
pub(crate) use worker::StreamWorker;
