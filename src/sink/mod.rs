//! Video sinks.
//!
//! A flush opens one sink per clip, writes the snapshot frames in order and
//! finishes it. `finish` is the only point at which a clip becomes visible at its
//! final path; a sink dropped without `finish` leaves nothing behind.

mod memory;
mod mjpeg;

use anyhow::Result;
use std::path::Path;

use crate::frame::Frame;

pub use memory::{MemorySinkFactory, RecordedClip};
pub use mjpeg::{MjpegFileSink, MjpegSinkFactory};

/// An open clip being written.
pub trait VideoSink: Send {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and publish the clip.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Opens sinks for new clips. Shared by every flush task.
pub trait SinkFactory: Send + Sync {
    fn open(
        &self,
        path: &Path,
        frame_rate: f64,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn VideoSink>>;
}
