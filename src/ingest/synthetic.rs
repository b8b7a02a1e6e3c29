//! Synthetic frame source.
//!
//! `SyntheticSource` generates patterned RGB frames for tests and dry runs of the
//! daemon. The device reference is `stub://<name>` with optional query settings:
//!
//! - `frames=N`: report the device closed after N frames
//! - `empty_every=N`: every Nth read comes back empty
//! - `pace=0`: return frames as fast as they are asked for instead of at `fps`

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};

use super::{FrameSource, ReadStatus};
use crate::frame::{rgb_len, Frame};

/// Configuration for a synthetic source.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Close the device after this many frames.
    pub max_frames: Option<u64>,
    /// Every Nth read returns `ReadStatus::Empty`.
    pub empty_every: Option<u64>,
    /// Sleep between reads to hold `fps`.
    pub pace: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "camera".to_string(),
            width: 64,
            height: 48,
            fps: 15.0,
            max_frames: None,
            empty_every: None,
            pace: false,
        }
    }
}

impl SyntheticConfig {
    /// Parse a `stub://` device reference.
    pub fn from_device(device: &str, width: u32, height: u32, fps: f64) -> Result<Self> {
        let rest = device
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("synthetic device must start with stub://"))?;
        let (name, query) = match rest.split_once('?') {
            Some((name, query)) => (name, Some(query)),
            None => (rest, None),
        };

        let mut config = Self {
            name: name.to_string(),
            width,
            height,
            fps,
            pace: true,
            ..Self::default()
        };

        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed stub setting '{}'", pair))?;
            match key {
                "frames" => config.max_frames = Some(parse_count(key, value)?),
                "empty_every" => config.empty_every = Some(parse_count(key, value)?),
                "pace" => config.pace = value != "0" && value != "false",
                other => return Err(anyhow!("unknown stub setting '{}'", other)),
            }
        }
        Ok(config)
    }
}

fn parse_count(key: &str, value: &str) -> Result<u64> {
    let count: u64 = value
        .parse()
        .map_err(|_| anyhow!("stub setting {} must be an integer, got '{}'", key, value))?;
    if count == 0 {
        return Err(anyhow!("stub setting {} must be at least 1", key));
    }
    Ok(count)
}

/// Frame source that synthesises a slowly changing scene.
pub struct SyntheticSource {
    config: SyntheticConfig,
    open: bool,
    reads: u64,
    frame_count: u64,
    /// Simulated scene state; changes every 50 frames.
    scene_state: u8,
    pixels: Vec<u8>,
    last_read_at: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            open: false,
            reads: 0,
            frame_count: 0,
            scene_state: 0,
            pixels: Vec::new(),
            last_read_at: None,
        }
    }

    fn generate_synthetic_pixels(&mut self) -> Result<()> {
        let pixel_count = rgb_len(self.config.width, self.config.height)?;

        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        self.pixels.resize(pixel_count, 0);
        for (i, pixel) in self.pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        Ok(())
    }

    fn pace(&mut self) {
        if !self.config.pace {
            return;
        }
        let Ok(interval) = Duration::try_from_secs_f64(1.0 / self.config.fps) else {
            return;
        };
        if let Some(last) = self.last_read_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_read_at = Some(Instant::now());
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!("stub://{}", self.config.name)
    }

    fn open(&mut self) -> Result<()> {
        rgb_len(self.config.width, self.config.height)?;
        self.open = true;
        log::info!(
            "SyntheticSource: opened stub://{} ({}x{} @ {} fps)",
            self.config.name,
            self.config.width,
            self.config.height,
            self.config.fps
        );
        Ok(())
    }

    fn read_frame(&mut self, frame: &mut Frame) -> Result<ReadStatus> {
        if !self.open {
            return Err(anyhow!("synthetic source stub://{} is not open", self.config.name));
        }
        if self
            .config
            .max_frames
            .is_some_and(|max| self.frame_count >= max)
        {
            return Ok(ReadStatus::Closed);
        }

        self.pace();
        self.reads += 1;
        if self
            .config
            .empty_every
            .is_some_and(|every| self.reads % every == 0)
        {
            frame.clear();
            return Ok(ReadStatus::Empty);
        }

        self.frame_count += 1;
        self.generate_synthetic_pixels()?;
        frame.fill_from(&self.pixels, self.config.width, self.config.height)?;
        Ok(ReadStatus::Frame)
    }

    fn close(&mut self) {
        if self.open {
            log::info!("SyntheticSource: closed stub://{}", self.config.name);
        }
        self.open = false;
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
