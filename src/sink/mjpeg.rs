use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{SinkFactory, VideoSink};
use crate::frame::Frame;

pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Writes clips as MJPEG streams: one baseline JPEG per frame, back to back.
///
/// Streams carry no timing; players need the rate passed explicitly
/// (e.g. `ffplay -framerate 15 clip.mjpeg`).
#[derive(Clone, Debug)]
pub struct MjpegSinkFactory {
    quality: u8,
}

impl MjpegSinkFactory {
    pub fn new(quality: u8) -> Result<Self> {
        if !(1..=100).contains(&quality) {
            return Err(anyhow!("jpeg quality must be within 1..=100, got {}", quality));
        }
        Ok(Self { quality })
    }
}

impl Default for MjpegSinkFactory {
    fn default() -> Self {
        Self {
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl SinkFactory for MjpegSinkFactory {
    fn open(
        &self,
        path: &Path,
        frame_rate: f64,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn VideoSink>> {
        let sink = MjpegFileSink::create(path, self.quality, width, height)?;
        log::debug!(
            "opened mjpeg sink {} ({}x{} @ {} fps)",
            path.display(),
            width,
            height,
            frame_rate
        );
        Ok(Box::new(sink))
    }
}

/// MJPEG clip in progress. Data goes to `<path>.tmp` until `finish`, which
/// renames it over any clip already at `path`.
pub struct MjpegFileSink {
    path: PathBuf,
    tmp_path: PathBuf,
    writer: Option<BufWriter<File>>,
    quality: u8,
    width: u32,
    height: u32,
    frames_written: u64,
}

impl MjpegFileSink {
    pub fn create(path: &Path, quality: u8, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("cannot open a {}x{} clip", width, height));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create clip directory {}", parent.display()))?;
        }
        if path.exists() {
            log::warn!("clip {} exists and will be replaced on finish", path.display());
        }
        let tmp_path = path.with_extension("tmp");
        let file = File::create(&tmp_path)
            .with_context(|| format!("failed to create {}", tmp_path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            tmp_path,
            writer: Some(BufWriter::new(file)),
            quality,
            width,
            height,
            frames_written: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl VideoSink for MjpegFileSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(anyhow!(
                "frame size {}x{} does not match clip {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            ));
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow!("clip {} already finished", self.path.display()))?;
        JpegEncoder::new_with_quality(writer, self.quality)
            .encode(frame.pixels(), self.width, self.height, ExtendedColorType::Rgb8)
            .with_context(|| format!("failed to encode frame into {}", self.tmp_path.display()))?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| anyhow!("clip {} already finished", self.path.display()))?;
        let file = writer
            .into_inner()
            .map_err(|e| anyhow!("failed to flush {}: {}", self.tmp_path.display(), e.error()))?;
        file.sync_all()
            .with_context(|| format!("failed to sync {}", self.tmp_path.display()))?;
        drop(file);
        fs::rename(&self.tmp_path, &self.path).with_context(|| {
            format!(
                "failed to move {} to {}",
                self.tmp_path.display(),
                self.path.display()
            )
        })?;
        Ok(())
    }
}

impl Drop for MjpegFileSink {
    fn drop(&mut self) {
        // Unfinished clips are discarded.
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
            drop(writer);
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}
