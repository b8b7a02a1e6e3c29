//! V4L2 frame source.
//!
//! `V4l2Source` captures from a local device node (e.g. `/dev/video0`) through
//! memory-mapped buffers and normalises YUYV or RGB3 captures to RGB24.

use anyhow::{Context, Result};
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, Conversion, PixelFormat};
use super::{FrameSource, ReadStatus};
use crate::frame::Frame;

/// Configuration for a V4L2 source.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 15,
            width: 640,
            height: 480,
        }
    }
}

pub struct V4l2Source {
    config: V4l2Config,
    state: Option<DeviceState>,
    format: PixelFormat,
    frame_count: u64,
    active_width: u32,
    active_height: u32,
    rgb: Vec<u8>,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(config: V4l2Config) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            format: PixelFormat::Yuyv,
            frame_count: 0,
            rgb: Vec::new(),
        }
    }
}

impl FrameSource for V4l2Source {
    fn describe(&self) -> String {
        self.config.device.clone()
    }

    fn open(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"YUYV");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        self.format = PixelFormat::from_fourcc(&format.fourcc.repr)?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: opened {} ({}x{} {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }

    fn read_frame(&mut self, frame: &mut Frame) -> Result<ReadStatus> {
        use v4l::io::traits::CaptureStream;

        let Some(state) = self.state.as_mut() else {
            return Ok(ReadStatus::Closed);
        };
        let (buf, meta) = state
            .with_mut(|fields| fields.stream.next())
            .with_context(|| format!("capture v4l2 frame from {}", self.config.device))?;

        let used = (meta.bytesused as usize).min(buf.len());
        if used == 0 {
            frame.clear();
            return Ok(ReadStatus::Empty);
        }

        let conversion = normalize_to_rgb(
            &buf[..used],
            self.active_width,
            self.active_height,
            self.format,
            &mut self.rgb,
        )?;
        if let Conversion::Truncated { expected, received } = conversion {
            log::warn!(
                "V4l2Source: partial frame from {} ({} of {} bytes); skipping",
                self.config.device,
                received,
                expected
            );
            frame.clear();
            return Ok(ReadStatus::Empty);
        }
        frame.fill_from(&self.rgb, self.active_width, self.active_height)?;
        self.frame_count += 1;
        Ok(ReadStatus::Frame)
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            log::info!("V4l2Source: closed {}", self.config.device);
        }
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}
