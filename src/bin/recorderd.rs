//! recorderd - trigger recorder daemon
//!
//! This daemon:
//! 1. Captures frames from the configured device into a bounded ring
//! 2. Classifies one frame at a time on a worker thread
//! 3. Saves a clip around every frame classified as the target label
//! 4. Drains outstanding work on Ctrl-C / SIGTERM before exiting

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use trigger_recorder::config::window_from_secs;
use trigger_recorder::{
    open_source, CaptureLoop, Classifier, ClassifierBackend, FrameRing, Labels, MjpegSinkFactory,
    RecorderConfig, SharedClassifier, Shutdown, SinkFactory, StopReason, StubClassifier,
    TriggerController,
};

#[derive(Parser, Debug)]
#[command(
    name = "recorderd",
    about = "Record clips around frames that match a target label"
)]
struct Args {
    /// Capture device (`/dev/video0`, or `stub://name[?frames=N]`)
    #[arg(long, value_name = "DEVICE")]
    device: Option<String>,

    /// Label index that triggers a recording
    #[arg(long, value_name = "INDEX")]
    target_label: Option<usize>,

    /// Clip length in seconds, centred on the trigger
    #[arg(long, value_name = "SECS")]
    window_secs: Option<f64>,

    /// Capture and playback frame rate
    #[arg(long)]
    fps: Option<f64>,

    /// Clip path with one {number} placeholder
    #[arg(long, value_name = "TEMPLATE")]
    output_template: Option<String>,

    /// Classifier backend (stub|tract)
    #[arg(long, value_name = "NAME")]
    backend: Option<String>,

    /// ONNX model for the tract backend
    #[arg(long, value_name = "PATH")]
    model: Option<PathBuf>,

    /// Label descriptions, one per line
    #[arg(long, value_name = "PATH")]
    labels: Option<PathBuf>,

    /// Seconds between health log lines
    #[arg(long, default_value_t = 5, value_name = "SECS")]
    health_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = RecorderConfig::load()?;
    apply_args(&mut cfg, &args)?;
    cfg.validate()?;

    let shutdown = Shutdown::new();
    shutdown.install_ctrlc()?;

    let labels = match &cfg.classifier.labels {
        Some(path) => Some(Labels::from_file(path)?),
        None => None,
    };
    let target = labels
        .as_ref()
        .map(|labels| labels.describe(cfg.target_label))
        .unwrap_or_else(|| cfg.target_label.to_string());

    let classifier = SharedClassifier::from_boxed(build_classifier(&cfg)?);
    classifier.warm_up()?;
    let classifier_name = classifier.name();

    let ring = Arc::new(FrameRing::new(cfg.buffer_capacity()?)?);
    let sinks: Arc<dyn SinkFactory> = Arc::new(MjpegSinkFactory::new(cfg.jpeg_quality)?);
    let controller = TriggerController::new(cfg.trigger_config(), ring.clone(), classifier, sinks)?;
    let source = open_source(&cfg.source_config())?;

    log::info!("recorderd running. device={}", cfg.device);
    log::info!(
        "target={} window={:.1}s fps={} classifier={}",
        target,
        cfg.record_window.as_secs_f64(),
        cfg.fps,
        classifier_name
    );
    log::info!(
        "frame ring capacity: {} frames; clips written to {}",
        ring.capacity(),
        cfg.output_template
    );

    let summary = CaptureLoop::new(source, controller, shutdown)
        .with_health_interval(Duration::from_secs(args.health_secs.max(1)))
        .run()?;

    let stats = &summary.trigger.stats;
    log::info!(
        "classifications={} failures={} matches={} suppressed={} clips saved={} failed={}",
        stats.classifications_completed,
        stats.classification_failures,
        stats.matches,
        stats.matches_suppressed,
        stats.flushes_completed,
        stats.flushes_failed
    );
    for report in &summary.trigger.flushes {
        log::info!(
            "clip {} ({} frames)",
            report.path.display(),
            report.frames_written()
        );
    }

    match summary.reason {
        StopReason::DeviceError(err) => Err(anyhow!("capture stopped on device error: {}", err)),
        StopReason::Shutdown | StopReason::DeviceClosed => Ok(()),
    }
}

fn apply_args(cfg: &mut RecorderConfig, args: &Args) -> Result<()> {
    if let Some(device) = &args.device {
        cfg.device = device.clone();
    }
    if let Some(label) = args.target_label {
        cfg.target_label = label;
    }
    if let Some(secs) = args.window_secs {
        cfg.record_window = window_from_secs(secs, "--window-secs")?;
    }
    if let Some(fps) = args.fps {
        cfg.fps = fps;
    }
    if let Some(template) = &args.output_template {
        cfg.output_template = template.clone();
    }
    if let Some(backend) = &args.backend {
        cfg.classifier.backend = ClassifierBackend::parse(backend)?;
    }
    if let Some(model) = &args.model {
        cfg.classifier.model = Some(model.clone());
    }
    if let Some(labels) = &args.labels {
        cfg.classifier.labels = Some(labels.clone());
    }
    Ok(())
}

fn build_classifier(cfg: &RecorderConfig) -> Result<Box<dyn Classifier>> {
    match cfg.classifier.backend {
        ClassifierBackend::Stub => Ok(Box::new(StubClassifier::new(
            cfg.target_label,
            cfg.classifier.stub_period,
            cfg.classifier.stub_labels,
        )?)),
        ClassifierBackend::Tract => build_tract(cfg),
    }
}

#[cfg(feature = "backend-tract")]
fn build_tract(cfg: &RecorderConfig) -> Result<Box<dyn Classifier>> {
    let model = cfg
        .classifier
        .model
        .as_ref()
        .ok_or_else(|| anyhow!("the tract backend requires a model path"))?;
    Ok(Box::new(trigger_recorder::TractClassifier::new(
        model,
        cfg.classifier.input_size,
    )?))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract(_cfg: &RecorderConfig) -> Result<Box<dyn Classifier>> {
    Err(anyhow!(
        "tract backend requested but recorderd was built without the backend-tract feature"
    ))
}
