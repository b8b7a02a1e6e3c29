use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::{SinkFactory, VideoSink};
use crate::frame::Frame;

/// A clip captured by `MemorySinkFactory`.
#[derive(Clone, Debug)]
pub struct RecordedClip {
    pub path: PathBuf,
    pub frame_rate: f64,
    pub width: u32,
    pub height: u32,
    pub frames: Vec<Frame>,
}

#[derive(Default)]
struct MemoryState {
    clips: Vec<RecordedClip>,
    open_failures: usize,
    opened: usize,
}

/// Sink factory that keeps finished clips in memory. Used by tests and dry runs.
#[derive(Clone, Default)]
pub struct MemorySinkFactory {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls to `open` fail.
    pub fn with_open_failures(self, count: usize) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.open_failures = count;
        }
        self
    }

    /// Finished clips, in finish order.
    pub fn clips(&self) -> Vec<RecordedClip> {
        self.state
            .lock()
            .map(|state| state.clips.clone())
            .unwrap_or_default()
    }

    /// Successful `open` calls so far.
    pub fn opened(&self) -> usize {
        self.state.lock().map(|state| state.opened).unwrap_or(0)
    }
}

impl SinkFactory for MemorySinkFactory {
    fn open(
        &self,
        path: &Path,
        frame_rate: f64,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn VideoSink>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("memory sink lock poisoned"))?;
        if state.open_failures > 0 {
            state.open_failures -= 1;
            return Err(anyhow!("memory sink refused to open {}", path.display()));
        }
        state.opened += 1;
        Ok(Box::new(MemorySink {
            clip: RecordedClip {
                path: path.to_path_buf(),
                frame_rate,
                width,
                height,
                frames: Vec::new(),
            },
            state: self.state.clone(),
        }))
    }
}

struct MemorySink {
    clip: RecordedClip,
    state: Arc<Mutex<MemoryState>>,
}

impl VideoSink for MemorySink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.clip.frames.push(frame.clone());
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let MemorySink { clip, state } = *self;
        state
            .lock()
            .map_err(|_| anyhow!("memory sink lock poisoned"))?
            .clips
            .push(clip);
        Ok(())
    }
}
