//! Trigger controller.
//!
//! Runs once per captured frame, after the frame is in the ring:
//!
//! 1. If a classification is outstanding and unfinished, do nothing more.
//! 2. If it has finished, collect the label. A target label while the ring is
//!    writable claims the ring and schedules a delayed flush.
//! 3. Dispatch a classification of the current frame.
//!
//! At most one classification is outstanding at any time. Frames captured while
//! one is in flight are buffered (and eventually evicted) without being
//! classified.
//!
//! A flush sleeps for half the recording window so the ring keeps collecting
//! post-trigger frames, snapshots the ring, releases its claim in the same
//! critical section, then encodes the snapshot without holding any lock.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::classify::SharedClassifier;
use crate::frame::{Frame, FrameRing, Snapshot};
use crate::sink::SinkFactory;

/// Placeholder replaced by the clip number in output templates.
pub const CLIP_NUMBER_PLACEHOLDER: &str = "{number}";

#[derive(Clone, Debug)]
pub struct TriggerConfig {
    /// Label index that starts a recording.
    pub target_label: usize,
    /// Total clip duration; half before the trigger, half after.
    pub record_window: Duration,
    pub frame_rate: f64,
    /// Clip path with exactly one `{number}` placeholder.
    pub output_template: String,
}

impl TriggerConfig {
    /// Delay between a trigger and its snapshot.
    pub fn flush_delay(&self) -> Duration {
        self.record_window / 2
    }
}

// ----------------------------------------------------------------------------
// ClipNamer
// ----------------------------------------------------------------------------

/// Hands out clip paths numbered 1, 2, 3, ... for the life of the process.
#[derive(Clone, Debug)]
pub struct ClipNamer {
    template: String,
    next: u64,
}

impl ClipNamer {
    pub fn new(template: &str) -> Result<Self> {
        validate_template(template)?;
        Ok(Self {
            template: template.to_string(),
            next: 1,
        })
    }

    /// Number the next path will carry.
    pub fn peek(&self) -> u64 {
        self.next
    }

    pub fn next_path(&mut self) -> PathBuf {
        let path = self
            .template
            .replace(CLIP_NUMBER_PLACEHOLDER, &self.next.to_string());
        self.next += 1;
        PathBuf::from(path)
    }
}

/// Templates must contain the placeholder exactly once.
pub fn validate_template(template: &str) -> Result<()> {
    match template.matches(CLIP_NUMBER_PLACEHOLDER).count() {
        1 => Ok(()),
        0 => Err(anyhow!(
            "output template '{}' has no {} placeholder",
            template,
            CLIP_NUMBER_PLACEHOLDER
        )),
        n => Err(anyhow!(
            "output template '{}' has {} {} placeholders; expected one",
            template,
            n,
            CLIP_NUMBER_PLACEHOLDER
        )),
    }
}

// ----------------------------------------------------------------------------
// Reports and counters
// ----------------------------------------------------------------------------

/// A flush that reached its sink and finished.
#[derive(Clone, Debug)]
pub struct FlushReport {
    pub path: PathBuf,
    /// Sequence numbers of the frames written, in write order.
    pub frame_seqs: Vec<u64>,
    /// When the ring was claimed.
    pub triggered_at: Instant,
    /// Read just before the snapshot released the claim, so no later claim
    /// can carry an earlier `triggered_at`.
    pub released_at: Instant,
    pub finished_at: Instant,
}

impl FlushReport {
    pub fn frames_written(&self) -> usize {
        self.frame_seqs.len()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TriggerStats {
    pub classifications_dispatched: u64,
    pub classifications_completed: u64,
    pub classification_failures: u64,
    /// Results equal to the target label.
    pub matches: u64,
    /// Matches that arrived while a flush held the ring.
    pub matches_suppressed: u64,
    pub flushes_scheduled: u64,
    pub flushes_completed: u64,
    pub flushes_failed: u64,
}

/// Everything the controller produced, returned once it has drained.
#[derive(Clone, Debug, Default)]
pub struct TriggerSummary {
    pub stats: TriggerStats,
    pub flushes: Vec<FlushReport>,
}

/// What a single `step` did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// A classification is still running; nothing was dispatched.
    Waiting,
    /// A new classification was dispatched.
    Dispatched,
    /// A flush to this path was scheduled and a new classification dispatched.
    Triggered(PathBuf),
}

// ----------------------------------------------------------------------------
// TriggerController
// ----------------------------------------------------------------------------

enum Classification {
    Idle,
    Pending(JoinHandle<Result<usize>>),
}

pub struct TriggerController {
    config: TriggerConfig,
    ring: Arc<FrameRing>,
    classifier: SharedClassifier,
    sinks: Arc<dyn SinkFactory>,
    namer: ClipNamer,
    classification: Classification,
    flushes: Vec<JoinHandle<Result<FlushReport>>>,
    reports: Vec<FlushReport>,
    stats: TriggerStats,
}

impl TriggerController {
    pub fn new(
        config: TriggerConfig,
        ring: Arc<FrameRing>,
        classifier: SharedClassifier,
        sinks: Arc<dyn SinkFactory>,
    ) -> Result<Self> {
        let namer = ClipNamer::new(&config.output_template)?;
        if config.record_window.is_zero() {
            return Err(anyhow!("recording window must be greater than zero"));
        }
        if !config.frame_rate.is_finite() || config.frame_rate <= 0.0 {
            return Err(anyhow!("frame rate must be positive"));
        }
        Ok(Self {
            config,
            ring,
            classifier,
            sinks,
            namer,
            classification: Classification::Idle,
            flushes: Vec::new(),
            reports: Vec::new(),
            stats: TriggerStats::default(),
        })
    }

    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    pub fn ring(&self) -> &Arc<FrameRing> {
        &self.ring
    }

    pub fn stats(&self) -> &TriggerStats {
        &self.stats
    }

    /// True while a classification is outstanding.
    pub fn is_classifying(&self) -> bool {
        matches!(self.classification, Classification::Pending(_))
    }

    /// Flush tasks not yet joined.
    pub fn flushes_in_flight(&self) -> usize {
        self.flushes.len()
    }

    /// Reports of flushes joined so far.
    pub fn reports(&self) -> &[FlushReport] {
        &self.reports
    }

    /// Run one iteration for `frame`, which must already be in the ring.
    pub fn step(&mut self, frame: &Frame) -> Step {
        self.reap_flushes(false);

        if let Classification::Pending(handle) = &self.classification {
            if !handle.is_finished() {
                return Step::Waiting;
            }
        }

        let mut triggered = None;
        if let Classification::Pending(handle) =
            std::mem::replace(&mut self.classification, Classification::Idle)
        {
            if let Some(label) = self.collect(handle) {
                if label == self.config.target_label {
                    triggered = self.on_match(label);
                }
            }
        }

        self.dispatch(frame);
        match triggered {
            Some(path) => Step::Triggered(path),
            None => Step::Dispatched,
        }
    }

    /// Wait for the outstanding classification and every flush, then report.
    ///
    /// A match collected here does not schedule a flush.
    pub fn drain(mut self) -> TriggerSummary {
        if let Classification::Pending(handle) =
            std::mem::replace(&mut self.classification, Classification::Idle)
        {
            log::info!("waiting for outstanding classification");
            if let Some(label) = self.collect(handle) {
                if label == self.config.target_label {
                    log::info!("match on label {} ignored during shutdown", label);
                }
            }
        }
        if !self.flushes.is_empty() {
            log::info!("waiting for {} flush(es) to finish", self.flushes.len());
        }
        self.reap_flushes(true);

        TriggerSummary {
            stats: self.stats,
            flushes: self.reports,
        }
    }

    fn collect(&mut self, handle: JoinHandle<Result<usize>>) -> Option<usize> {
        match handle.join() {
            Ok(Ok(label)) => {
                self.stats.classifications_completed += 1;
                Some(label)
            }
            Ok(Err(err)) => {
                self.stats.classifications_completed += 1;
                self.stats.classification_failures += 1;
                log::warn!("classification failed: {:#}", err);
                None
            }
            Err(_) => {
                self.stats.classifications_completed += 1;
                self.stats.classification_failures += 1;
                log::error!("classifier {} panicked", self.classifier.name());
                None
            }
        }
    }

    fn on_match(&mut self, label: usize) -> Option<PathBuf> {
        self.stats.matches += 1;
        if !self.ring.try_begin_flush() {
            self.stats.matches_suppressed += 1;
            log::debug!("label {} matched while a flush is pending; ignoring", label);
            return None;
        }

        let path = self.namer.next_path();
        let job = FlushJob {
            ring: self.ring.clone(),
            sinks: self.sinks.clone(),
            path: path.clone(),
            delay: self.config.flush_delay(),
            frame_rate: self.config.frame_rate,
            triggered_at: Instant::now(),
        };
        let spawned = std::thread::Builder::new()
            .name("clip-flush".to_string())
            .spawn(move || job.run());
        match spawned {
            Ok(handle) => {
                self.flushes.push(handle);
                self.stats.flushes_scheduled += 1;
                log::info!(
                    "label {} matched; saving {} in {:.1}s",
                    label,
                    path.display(),
                    self.config.flush_delay().as_secs_f64()
                );
                Some(path)
            }
            Err(err) => {
                self.ring.end_flush();
                self.stats.flushes_failed += 1;
                log::error!("failed to start flush for {}: {}", path.display(), err);
                None
            }
        }
    }

    fn dispatch(&mut self, frame: &Frame) {
        let copy = frame.clone();
        let classifier = self.classifier.clone();
        let spawned = std::thread::Builder::new()
            .name("classify".to_string())
            .spawn(move || classifier.classify(&copy));
        match spawned {
            Ok(handle) => {
                self.classification = Classification::Pending(handle);
                self.stats.classifications_dispatched += 1;
            }
            Err(err) => {
                // Stay idle; the next frame retries the dispatch.
                log::error!("failed to start classification: {}", err);
            }
        }
    }

    fn reap_flushes(&mut self, wait: bool) {
        let mut pending = Vec::with_capacity(self.flushes.len());
        for handle in self.flushes.drain(..) {
            if !wait && !handle.is_finished() {
                pending.push(handle);
                continue;
            }
            match handle.join() {
                Ok(Ok(report)) => {
                    self.stats.flushes_completed += 1;
                    self.reports.push(report);
                }
                Ok(Err(err)) => {
                    self.stats.flushes_failed += 1;
                    log::error!("flush abandoned: {:#}", err);
                }
                Err(_) => {
                    self.stats.flushes_failed += 1;
                    log::error!("flush task panicked");
                }
            }
        }
        self.flushes = pending;
    }
}

// ----------------------------------------------------------------------------
// Flush task
// ----------------------------------------------------------------------------

struct FlushJob {
    ring: Arc<FrameRing>,
    sinks: Arc<dyn SinkFactory>,
    path: PathBuf,
    delay: Duration,
    frame_rate: f64,
    triggered_at: Instant,
}

impl FlushJob {
    fn run(self) -> Result<FlushReport> {
        let mut claim = FlushClaim {
            ring: self.ring.clone(),
            released: false,
        };
        std::thread::sleep(self.delay);

        let released_at = Instant::now();
        let snapshot = claim.snapshot_and_release();
        log::debug!(
            "snapshot of {} frames for {}",
            snapshot.len(),
            self.path.display()
        );

        if snapshot.is_empty() {
            return Err(anyhow!(
                "no frames buffered; nothing written to {}",
                self.path.display()
            ));
        }

        let frame_seqs = write_clip(&snapshot, self.sinks.as_ref(), &self.path, self.frame_rate)?;
        log::info!(
            "saved {} frames to {}",
            frame_seqs.len(),
            self.path.display()
        );
        Ok(FlushReport {
            path: self.path,
            frame_seqs,
            triggered_at: self.triggered_at,
            released_at,
            finished_at: Instant::now(),
        })
    }
}

/// Holds the ring's flush claim; releases it on drop if the snapshot never ran.
struct FlushClaim {
    ring: Arc<FrameRing>,
    released: bool,
}

impl FlushClaim {
    fn snapshot_and_release(&mut self) -> Snapshot {
        self.released = true;
        self.ring.snapshot_and_release()
    }
}

impl Drop for FlushClaim {
    fn drop(&mut self) {
        if !self.released {
            self.ring.end_flush();
        }
    }
}

/// Encode `snapshot` to `path` in order. Returns the sequence numbers written.
///
/// The sink is sized from the snapshot's first frame.
pub fn write_clip(
    snapshot: &Snapshot,
    sinks: &dyn SinkFactory,
    path: &Path,
    frame_rate: f64,
) -> Result<Vec<u64>> {
    let (width, height) = snapshot
        .dimensions()
        .ok_or_else(|| anyhow!("no frames buffered for {}", path.display()))?;

    let mut sink = sinks
        .open(path, frame_rate, width, height)
        .with_context(|| format!("failed to open video sink {}", path.display()))?;

    let mut written = Vec::with_capacity(snapshot.len());
    for node in snapshot.iter() {
        sink.write_frame(node.frame())
            .with_context(|| format!("failed to write frame {} to {}", node.seq(), path.display()))?;
        written.push(node.seq());
    }
    sink.finish()
        .with_context(|| format!("failed to finish {}", path.display()))?;
    Ok(written)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
