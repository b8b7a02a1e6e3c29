//! Frame sources.
//!
//! - Synthetic source (`stub://`), for tests and dry runs
//! - USB/V4L2 devices (feature: ingest-v4l2)
//!
//! Every source fills a caller-owned `Frame` in place, so the frame handed back by
//! one read is overwritten by the next. Callers that keep a frame must copy it;
//! `FrameRing::push` does.

#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;

use crate::frame::Frame;

pub use synthetic::{SyntheticConfig, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Config, V4l2Source};

/// Outcome of a single read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadStatus {
    /// The frame handle now holds a new image.
    Frame,
    /// Nothing usable this time; try again.
    Empty,
    /// The device is gone. No further reads will succeed.
    Closed,
}

/// A device that yields frames on demand.
///
/// `read_frame` errors are device errors and end the capture session.
pub trait FrameSource: Send {
    /// Device reference, for logs.
    fn describe(&self) -> String;

    fn open(&mut self) -> Result<()>;

    /// Read the next frame into `frame`, overwriting its contents.
    fn read_frame(&mut self, frame: &mut Frame) -> Result<ReadStatus>;

    fn close(&mut self) {}

    /// Frames delivered so far.
    fn frames_captured(&self) -> u64;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn read_frame(&mut self, frame: &mut Frame) -> Result<ReadStatus> {
        (**self).read_frame(frame)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn frames_captured(&self) -> u64 {
        (**self).frames_captured()
    }
}

/// Dimensions and pacing shared by device-backed sources.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// Device reference: `stub://name[?frames=N]` or a device path such as `/dev/video0`.
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// Open the source named by `config.device`.
pub fn open_source(config: &SourceConfig) -> Result<Box<dyn FrameSource>> {
    if config.device.starts_with("stub://") {
        let synthetic = SyntheticConfig::from_device(
            &config.device,
            config.width,
            config.height,
            config.fps,
        )?;
        return Ok(Box::new(SyntheticSource::new(synthetic)));
    }

    #[cfg(feature = "ingest-v4l2")]
    {
        Ok(Box::new(V4l2Source::new(V4l2Config {
            device: config.device.clone(),
            target_fps: config.fps.round().max(1.0) as u32,
            width: config.width,
            height: config.height,
        })))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        anyhow::bail!(
            "device {} requires the ingest-v4l2 feature",
            config.device
        )
    }
}
