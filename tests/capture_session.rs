use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use trigger_recorder::ingest::SyntheticConfig;
use trigger_recorder::{
    CaptureLoop, Classifier, Frame, FrameRing, FrameSource, MemorySinkFactory, MjpegSinkFactory,
    ReadStatus, SessionSummary, SharedClassifier, Shutdown, SinkFactory, StopReason,
    StubClassifier, SyntheticSource, TriggerConfig, TriggerController,
};

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

enum Read {
    Frame(u8),
    Blank,
    Fail,
}

/// Plays back a fixed script of reads, then reports the device closed.
struct ScriptedSource {
    script: VecDeque<Read>,
    fail_open: bool,
    frames: u64,
}

impl ScriptedSource {
    fn new(script: Vec<Read>) -> Self {
        Self {
            script: script.into(),
            fail_open: false,
            frames: 0,
        }
    }
}

impl FrameSource for ScriptedSource {
    fn describe(&self) -> String {
        "scripted".to_string()
    }

    fn open(&mut self) -> Result<()> {
        if self.fail_open {
            return Err(anyhow!("no such device"));
        }
        Ok(())
    }

    fn read_frame(&mut self, frame: &mut Frame) -> Result<ReadStatus> {
        match self.script.pop_front() {
            Some(Read::Frame(tag)) => {
                frame.fill_from(&[tag; 12], 2, 2)?;
                self.frames += 1;
                Ok(ReadStatus::Frame)
            }
            Some(Read::Blank) => {
                frame.clear();
                Ok(ReadStatus::Frame)
            }
            Some(Read::Fail) => Err(anyhow!("usb disconnect")),
            None => Ok(ReadStatus::Closed),
        }
    }

    fn frames_captured(&self) -> u64 {
        self.frames
    }
}

/// Reports `first` on its first call, then `rest` after sleeping `delay`.
struct SequenceClassifier {
    first: usize,
    rest: usize,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl Classifier for SequenceClassifier {
    fn name(&self) -> &'static str {
        "sequence"
    }

    fn classify(&mut self, _frame: &Frame) -> Result<usize> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == 0 {
            return Ok(self.first);
        }
        std::thread::sleep(self.delay);
        Ok(self.rest)
    }
}

/// Always reports the same label.
struct ConstantClassifier(usize);

impl Classifier for ConstantClassifier {
    fn name(&self) -> &'static str {
        "constant"
    }

    fn classify(&mut self, _frame: &Frame) -> Result<usize> {
        Ok(self.0)
    }
}

fn synthetic(max_frames: Option<u64>, fps: f64) -> SyntheticSource {
    SyntheticSource::new(SyntheticConfig {
        name: "test".to_string(),
        width: 8,
        height: 4,
        fps,
        max_frames,
        empty_every: None,
        pace: true,
    })
}

fn trigger_config(template: &str, window: Duration, fps: f64) -> TriggerConfig {
    TriggerConfig {
        target_label: 3,
        record_window: window,
        frame_rate: fps,
        output_template: template.to_string(),
    }
}

fn run_session<S: FrameSource>(
    source: S,
    classifier: SharedClassifier,
    sinks: Arc<dyn SinkFactory>,
    config: TriggerConfig,
    shutdown: Shutdown,
) -> Result<(SessionSummary, Arc<FrameRing>)> {
    let ring = Arc::new(FrameRing::for_window(config.frame_rate, config.record_window)?);
    let controller = TriggerController::new(config, ring.clone(), classifier, sinks)?;
    let summary = CaptureLoop::new(source, controller, shutdown).run()?;
    Ok((summary, ring))
}

// ----------------------------------------------------------------------------
// Sessions
// ----------------------------------------------------------------------------

#[test]
fn device_close_ends_session_after_saving_clips() -> Result<()> {
    let sinks = MemorySinkFactory::new();
    let classifier = SharedClassifier::new(StubClassifier::new(3, 5, 10)?);
    let config = trigger_config("clips/recording_{number}.mjpeg", Duration::from_millis(100), 200.0);

    let (summary, ring) = run_session(
        synthetic(Some(200), 200.0),
        classifier,
        Arc::new(sinks.clone()),
        config,
        Shutdown::new(),
    )?;

    assert_eq!(summary.reason, StopReason::DeviceClosed);
    assert_eq!(summary.frames_captured, 200);
    assert_eq!(ring.frames_pushed(), 200);
    assert!(ring.len() <= ring.capacity());

    let stats = &summary.trigger.stats;
    assert!(stats.flushes_completed >= 1, "stub classifier should trigger");
    assert_eq!(stats.flushes_failed, 0);
    assert_eq!(stats.classifications_completed, stats.classifications_dispatched);

    let clips = sinks.clips();
    assert_eq!(clips.len() as u64, stats.flushes_completed);
    for clip in &clips {
        assert!(!clip.frames.is_empty());
        assert!(clip.frames.len() <= ring.capacity());
        assert_eq!((clip.width, clip.height), (8, 4));
        assert_eq!(clip.frame_rate, 200.0);
    }
    Ok(())
}

#[test]
fn blank_and_empty_reads_are_skipped() -> Result<()> {
    let source = SyntheticSource::new(SyntheticConfig {
        width: 4,
        height: 2,
        max_frames: Some(30),
        empty_every: Some(3),
        pace: false,
        ..SyntheticConfig::default()
    });
    let sinks = MemorySinkFactory::new();
    let classifier = SharedClassifier::new(ConstantClassifier(0));
    let config = trigger_config("clip_{number}.mjpeg", Duration::from_millis(50), 100.0);

    let (summary, ring) = run_session(source, classifier, Arc::new(sinks.clone()), config, Shutdown::new())?;

    assert_eq!(summary.frames_captured, 30);
    assert_eq!(summary.frames_skipped, 14);
    assert_eq!(ring.frames_pushed(), 30);
    assert!(sinks.clips().is_empty());

    let script = vec![Read::Frame(1), Read::Blank, Read::Frame(2), Read::Blank];
    let classifier = SharedClassifier::new(ConstantClassifier(0));
    let config = trigger_config("clip_{number}.mjpeg", Duration::from_millis(50), 100.0);
    let (summary, ring) = run_session(
        ScriptedSource::new(script),
        classifier,
        Arc::new(MemorySinkFactory::new()),
        config,
        Shutdown::new(),
    )?;

    assert_eq!(summary.frames_captured, 2);
    assert_eq!(summary.frames_skipped, 2);
    assert_eq!(ring.snapshot().seqs(), vec![0, 1]);
    Ok(())
}

#[test]
fn device_error_ends_session_without_failing_run() -> Result<()> {
    let script = vec![Read::Frame(1), Read::Frame(2), Read::Fail, Read::Frame(3)];
    let classifier = SharedClassifier::new(ConstantClassifier(0));
    let config = trigger_config("clip_{number}.mjpeg", Duration::from_millis(50), 100.0);

    let (summary, ring) = run_session(
        ScriptedSource::new(script),
        classifier,
        Arc::new(MemorySinkFactory::new()),
        config,
        Shutdown::new(),
    )?;

    assert!(matches!(summary.reason, StopReason::DeviceError(ref msg) if msg.contains("usb disconnect")));
    assert_eq!(summary.frames_captured, 2);
    assert_eq!(ring.len(), 2);
    Ok(())
}

#[test]
fn open_failure_is_returned_as_error() -> Result<()> {
    let mut source = ScriptedSource::new(vec![Read::Frame(1)]);
    source.fail_open = true;
    let classifier = SharedClassifier::new(ConstantClassifier(0));
    let config = trigger_config("clip_{number}.mjpeg", Duration::from_millis(50), 100.0);

    let result = run_session(
        source,
        classifier,
        Arc::new(MemorySinkFactory::new()),
        config,
        Shutdown::new(),
    );
    assert!(result.is_err());
    Ok(())
}

#[test]
fn shutdown_waits_for_outstanding_classification_and_flush() -> Result<()> {
    let calls = Arc::new(AtomicUsize::new(0));
    let classifier = SharedClassifier::new(SequenceClassifier {
        first: 3,
        rest: 3,
        delay: Duration::from_millis(300),
        calls: calls.clone(),
    });
    let sinks = MemorySinkFactory::new();
    let shutdown = Shutdown::new();

    let watcher = {
        let calls = calls.clone();
        let shutdown = shutdown.clone();
        std::thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(5);
            while calls.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(1));
            }
            shutdown.trigger();
            Instant::now()
        })
    };

    let config = trigger_config("clips/recording_{number}.mjpeg", Duration::from_millis(400), 100.0);
    let (summary, ring) = run_session(
        synthetic(None, 100.0),
        classifier,
        Arc::new(sinks.clone()),
        config,
        shutdown,
    )?;
    let returned_at = Instant::now();
    let signalled_at = watcher.join().map_err(|_| anyhow!("watcher panicked"))?;

    assert_eq!(summary.reason, StopReason::Shutdown);
    let stats = &summary.trigger.stats;
    // The second classification was in flight at the signal and nothing followed it.
    assert_eq!(stats.classifications_dispatched, 2);
    assert_eq!(stats.classifications_completed, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    // Its match arrived during shutdown and scheduled nothing.
    assert_eq!(stats.flushes_scheduled, 1);
    assert_eq!(stats.flushes_completed, 1);

    let clips = sinks.clips();
    assert_eq!(clips.len(), 1);
    assert_eq!(clips[0].path, PathBuf::from("clips/recording_1.mjpeg"));
    assert!(summary.trigger.flushes[0].finished_at <= returned_at);
    assert!(returned_at >= signalled_at);
    assert!(ring.is_writable());
    Ok(())
}

#[test]
fn flush_claims_never_overlap_and_names_increase() -> Result<()> {
    let sinks = MemorySinkFactory::new();
    let classifier = SharedClassifier::new(ConstantClassifier(3));
    let window = Duration::from_millis(30);
    let config = trigger_config("clips/recording_{number}.mjpeg", window, 500.0);

    let (summary, ring) = run_session(
        synthetic(Some(500), 500.0),
        classifier,
        Arc::new(sinks.clone()),
        config,
        Shutdown::new(),
    )?;

    let stats = &summary.trigger.stats;
    assert!(stats.flushes_completed >= 2, "expected repeated flushes, got {:?}", stats);
    assert_eq!(stats.flushes_failed, 0);
    assert!(stats.matches_suppressed >= 1);

    let mut reports = summary.trigger.flushes.clone();
    reports.sort_by_key(|r| r.triggered_at);
    for (i, report) in reports.iter().enumerate() {
        let expected = PathBuf::from(format!("clips/recording_{}.mjpeg", i + 1));
        assert_eq!(report.path, expected);
        assert!(report.released_at.duration_since(report.triggered_at) >= window / 2);
        assert!(!report.frame_seqs.is_empty());
        assert!(report.frame_seqs.len() <= ring.capacity());
    }
    for pair in reports.windows(2) {
        assert!(
            pair[1].triggered_at >= pair[0].released_at,
            "{} claimed the ring before {} released it",
            pair[1].path.display(),
            pair[0].path.display()
        );
    }
    assert!(ring.is_writable());
    Ok(())
}

#[test]
fn flushed_frames_arrive_in_insertion_order_without_gaps() -> Result<()> {
    let sinks = MemorySinkFactory::new();
    let classifier = SharedClassifier::new(StubClassifier::new(3, 4, 10)?);
    let config = trigger_config("clip_{number}.mjpeg", Duration::from_millis(60), 200.0);

    let (summary, _ring) = run_session(
        synthetic(Some(150), 200.0),
        classifier,
        Arc::new(sinks.clone()),
        config,
        Shutdown::new(),
    )?;

    assert!(!summary.trigger.flushes.is_empty());
    for report in &summary.trigger.flushes {
        for pair in report.frame_seqs.windows(2) {
            assert_eq!(pair[1], pair[0] + 1, "frames skipped or reordered in {:?}", report.path);
        }
    }

    // The sink received the same frames the report lists, in the same order.
    let clips = sinks.clips();
    for report in &summary.trigger.flushes {
        let clip = clips
            .iter()
            .find(|clip| clip.path == report.path)
            .ok_or_else(|| anyhow!("no clip for {}", report.path.display()))?;
        assert_eq!(clip.frames.len(), report.frames_written());
        for pair in clip.frames.windows(2) {
            assert_ne!(pair[0], pair[1], "duplicated frame in {}", clip.path.display());
        }
    }
    Ok(())
}

#[test]
fn mjpeg_clips_are_written_to_disk() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let template = dir
        .path()
        .join("recordings")
        .join("recording_{number}.mjpeg")
        .to_string_lossy()
        .into_owned();
    let classifier = SharedClassifier::new(StubClassifier::new(3, 3, 10)?);
    let config = trigger_config(&template, Duration::from_millis(60), 200.0);

    let (summary, _ring) = run_session(
        synthetic(Some(60), 200.0),
        classifier,
        Arc::new(MjpegSinkFactory::new(80)?),
        config,
        Shutdown::new(),
    )?;

    assert!(summary.trigger.stats.flushes_completed >= 1);
    for report in &summary.trigger.flushes {
        let bytes = std::fs::read(&report.path)?;
        assert_eq!(&bytes[..2], &[0xFF, 0xD8], "clip should start with a JPEG SOI");
        assert_eq!(&bytes[bytes.len() - 2..], &[0xFF, 0xD9], "clip should end with a JPEG EOI");
    }
    let first = dir.path().join("recordings").join("recording_1.mjpeg");
    assert!(first.exists());

    let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("recordings"))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "tmp"))
        .collect();
    assert!(leftovers.is_empty(), "temporary files left behind");
    Ok(())
}

#[test]
fn restarted_session_overwrites_clips_from_previous_run() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let template = dir
        .path()
        .join("recording_{number}.mjpeg")
        .to_string_lossy()
        .into_owned();

    let mut completed = Vec::new();
    for run in 0..2 {
        let classifier = SharedClassifier::new(StubClassifier::new(3, 3, 10)?);
        let config = trigger_config(&template, Duration::from_millis(40), 200.0);
        let (summary, _ring) = run_session(
            synthetic(Some(60), 200.0),
            classifier,
            Arc::new(MjpegSinkFactory::default()),
            config,
            Shutdown::new(),
        )?;
        let stats = &summary.trigger.stats;
        assert!(stats.flushes_scheduled >= 1);
        assert_eq!(stats.flushes_failed, 0, "clips lost on run {}: {:?}", run, stats);
        assert_eq!(stats.flushes_completed, stats.flushes_scheduled);
        completed.push(summary.trigger.flushes);
    }

    // Numbering restarts, so the second run reuses the first run's names.
    assert_eq!(completed[1][0].path, completed[0][0].path);
    assert!(dir.path().join("recording_1.mjpeg").exists());
    Ok(())
}
