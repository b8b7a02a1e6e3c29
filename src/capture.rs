//! Capture loop.
//!
//! Reads frames, buffers them, and drives the trigger controller until the device
//! closes or shutdown is requested. Whatever ends the session, the loop drains the
//! controller before returning so no classification or flush outlives `run`.

use anyhow::{Context, Result};
use std::time::{Duration, Instant};

use crate::frame::Frame;
use crate::ingest::{FrameSource, ReadStatus};
use crate::shutdown::Shutdown;
use crate::trigger::{Step, TriggerController, TriggerSummary};

const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(5);

/// Why a session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Shutdown was requested.
    Shutdown,
    /// The source reported the device closed.
    DeviceClosed,
    /// Reading from the device failed.
    DeviceError(String),
}

#[derive(Clone, Debug)]
pub struct SessionSummary {
    pub reason: StopReason,
    pub frames_captured: u64,
    /// Empty reads skipped.
    pub frames_skipped: u64,
    pub elapsed: Duration,
    pub trigger: TriggerSummary,
}

pub struct CaptureLoop<S: FrameSource> {
    source: S,
    controller: TriggerController,
    shutdown: Shutdown,
    health_interval: Duration,
}

impl<S: FrameSource> CaptureLoop<S> {
    pub fn new(source: S, controller: TriggerController, shutdown: Shutdown) -> Self {
        Self {
            source,
            controller,
            shutdown,
            health_interval: DEFAULT_HEALTH_INTERVAL,
        }
    }

    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    /// Run until the device closes or shutdown is requested.
    ///
    /// Only a failure to open the source is returned as an error; device failures
    /// after that end the session and are reported in the summary.
    pub fn run(mut self) -> Result<SessionSummary> {
        let device = self.source.describe();
        self.source
            .open()
            .with_context(|| format!("failed to open video capture device {}", device))?;
        log::info!("start reading device: {}", device);

        let started = Instant::now();
        let mut last_health_log = Instant::now();
        let mut frame = Frame::empty();
        let mut frames_captured = 0u64;
        let mut frames_skipped = 0u64;

        let reason = loop {
            if self.shutdown.is_triggered() {
                log::info!("shutdown requested; stopping capture");
                break StopReason::Shutdown;
            }

            match self.source.read_frame(&mut frame) {
                Ok(ReadStatus::Frame) if !frame.is_empty() => {}
                Ok(ReadStatus::Frame) | Ok(ReadStatus::Empty) => {
                    frames_skipped += 1;
                    continue;
                }
                Ok(ReadStatus::Closed) => {
                    log::warn!("device closed: {}", device);
                    break StopReason::DeviceClosed;
                }
                Err(err) => {
                    log::error!("cannot read device {}: {:#}", device, err);
                    break StopReason::DeviceError(format!("{:#}", err));
                }
            }

            frames_captured += 1;
            self.controller.ring().push(&frame);
            if let Step::Triggered(path) = self.controller.step(&frame) {
                log::debug!("frame {} triggered {}", frames_captured, path.display());
            }

            if last_health_log.elapsed() >= self.health_interval {
                let ring = self.controller.ring();
                log::info!(
                    "capture health: device={} frames={} skipped={} buffered={}/{} (~{} KB) writable={}",
                    device,
                    frames_captured,
                    frames_skipped,
                    ring.len(),
                    ring.capacity(),
                    ring.memory_bytes() / 1024,
                    ring.is_writable()
                );
                last_health_log = Instant::now();
            }
        };

        self.source.close();
        let trigger = self.controller.drain();
        let summary = SessionSummary {
            reason,
            frames_captured,
            frames_skipped,
            elapsed: started.elapsed(),
            trigger,
        };
        log::info!(
            "session ended ({:?}) after {:.1}s: {} frames, {} clips saved",
            summary.reason,
            summary.elapsed.as_secs_f64(),
            summary.frames_captured,
            summary.trigger.stats.flushes_completed
        );
        Ok(summary)
    }
}
