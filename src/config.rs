use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::frame::window_capacity;
use crate::ingest::SourceConfig;
use crate::trigger::{validate_template, TriggerConfig};

const DEFAULT_DEVICE: &str = "stub://camera";
const DEFAULT_FRAME_WIDTH: u32 = 640;
const DEFAULT_FRAME_HEIGHT: u32 = 480;
const DEFAULT_TARGET_LABEL: usize = 535;
const DEFAULT_WINDOW_SECS: f64 = 15.0;
const DEFAULT_FPS: f64 = 15.0;
const DEFAULT_OUTPUT_TEMPLATE: &str = "recordings/recording_{number}.mjpeg";
const DEFAULT_JPEG_QUALITY: u8 = 85;
const DEFAULT_INPUT_SIZE: u32 = 224;
const DEFAULT_STUB_PERIOD: u64 = 100;
const DEFAULT_STUB_LABELS: usize = 1000;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RecorderConfigFile {
    device: Option<String>,
    frame_width: Option<u32>,
    frame_height: Option<u32>,
    target_label: Option<usize>,
    window_secs: Option<f64>,
    fps: Option<f64>,
    output_template: Option<String>,
    jpeg_quality: Option<u8>,
    classifier: Option<ClassifierConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ClassifierConfigFile {
    backend: Option<ClassifierBackend>,
    model: Option<PathBuf>,
    labels: Option<PathBuf>,
    input_size: Option<u32>,
    stub_period: Option<u64>,
    stub_labels: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierBackend {
    Stub,
    Tract,
}

impl ClassifierBackend {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(Self::Stub),
            "tract" => Ok(Self::Tract),
            other => Err(anyhow!(
                "unknown classifier backend '{}' (expected stub or tract)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub backend: ClassifierBackend,
    pub model: Option<PathBuf>,
    pub labels: Option<PathBuf>,
    /// Side of the square model input.
    pub input_size: u32,
    /// Stub backend: report the target every Nth classification.
    pub stub_period: u64,
    /// Stub backend: size of the label space.
    pub stub_labels: usize,
}

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub device: String,
    pub frame_width: u32,
    pub frame_height: u32,
    pub target_label: usize,
    pub record_window: Duration,
    pub fps: f64,
    pub output_template: String,
    pub jpeg_quality: u8,
    pub classifier: ClassifierSettings,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            frame_width: DEFAULT_FRAME_WIDTH,
            frame_height: DEFAULT_FRAME_HEIGHT,
            target_label: DEFAULT_TARGET_LABEL,
            record_window: Duration::from_secs_f64(DEFAULT_WINDOW_SECS),
            fps: DEFAULT_FPS,
            output_template: DEFAULT_OUTPUT_TEMPLATE.to_string(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            classifier: ClassifierSettings {
                backend: ClassifierBackend::Stub,
                model: None,
                labels: None,
                input_size: DEFAULT_INPUT_SIZE,
                stub_period: DEFAULT_STUB_PERIOD,
                stub_labels: DEFAULT_STUB_LABELS,
            },
        }
    }
}

impl RecorderConfig {
    /// Defaults, then the file named by `RECORDER_CONFIG`, then environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("RECORDER_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RecorderConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let classifier_file = file.classifier.unwrap_or_default();
        let classifier = ClassifierSettings {
            backend: classifier_file.backend.unwrap_or(defaults.classifier.backend),
            model: classifier_file.model,
            labels: classifier_file.labels,
            input_size: classifier_file
                .input_size
                .unwrap_or(defaults.classifier.input_size),
            stub_period: classifier_file
                .stub_period
                .unwrap_or(defaults.classifier.stub_period),
            stub_labels: classifier_file
                .stub_labels
                .unwrap_or(defaults.classifier.stub_labels),
        };
        let record_window = match file.window_secs {
            Some(secs) => window_from_secs(secs, "window_secs")?,
            None => defaults.record_window,
        };

        Ok(Self {
            device: file.device.unwrap_or(defaults.device),
            frame_width: file.frame_width.unwrap_or(defaults.frame_width),
            frame_height: file.frame_height.unwrap_or(defaults.frame_height),
            target_label: file.target_label.unwrap_or(defaults.target_label),
            record_window,
            fps: file.fps.unwrap_or(defaults.fps),
            output_template: file.output_template.unwrap_or(defaults.output_template),
            jpeg_quality: file.jpeg_quality.unwrap_or(defaults.jpeg_quality),
            classifier,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(device) = env_nonempty("RECORDER_DEVICE") {
            self.device = device;
        }
        if let Some(label) = env_nonempty("RECORDER_TARGET_LABEL") {
            self.target_label = label
                .parse()
                .map_err(|_| anyhow!("RECORDER_TARGET_LABEL must be a non-negative integer"))?;
        }
        if let Some(window) = env_nonempty("RECORDER_WINDOW_SECS") {
            let secs: f64 = window
                .parse()
                .map_err(|_| anyhow!("RECORDER_WINDOW_SECS must be a number of seconds"))?;
            self.record_window = window_from_secs(secs, "RECORDER_WINDOW_SECS")?;
        }
        if let Some(fps) = env_nonempty("RECORDER_FPS") {
            self.fps = fps
                .parse()
                .map_err(|_| anyhow!("RECORDER_FPS must be a number"))?;
        }
        if let Some(template) = env_nonempty("RECORDER_OUTPUT_TEMPLATE") {
            self.output_template = template;
        }
        if let Some(backend) = env_nonempty("RECORDER_BACKEND") {
            self.classifier.backend = ClassifierBackend::parse(&backend)?;
        }
        if let Some(model) = env_nonempty("RECORDER_MODEL") {
            self.classifier.model = Some(PathBuf::from(model));
        }
        if let Some(labels) = env_nonempty("RECORDER_LABELS") {
            self.classifier.labels = Some(PathBuf::from(labels));
        }
        Ok(())
    }

    /// Check invariants. Call again after applying command-line overrides.
    pub fn validate(&self) -> Result<()> {
        if self.device.trim().is_empty() {
            return Err(anyhow!("device must not be empty"));
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(anyhow!(
                "frame size must be non-zero, got {}x{}",
                self.frame_width,
                self.frame_height
            ));
        }
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(anyhow!("fps must be greater than zero"));
        }
        if self.record_window.is_zero() {
            return Err(anyhow!("recording window must be greater than zero"));
        }
        self.buffer_capacity()?;
        validate_template(&self.output_template)?;
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be within 1..=100"));
        }
        if self.classifier.backend == ClassifierBackend::Tract && self.classifier.model.is_none() {
            return Err(anyhow!("the tract backend requires a model path"));
        }
        if self.classifier.input_size == 0 {
            return Err(anyhow!("classifier input_size must be greater than zero"));
        }
        if self.classifier.stub_period == 0 {
            return Err(anyhow!("classifier stub_period must be greater than zero"));
        }
        if self.classifier.backend == ClassifierBackend::Stub
            && self.target_label >= self.classifier.stub_labels
        {
            return Err(anyhow!(
                "target label {} is outside the stub label space of {}",
                self.target_label,
                self.classifier.stub_labels
            ));
        }
        Ok(())
    }

    /// Frames needed to cover the recording window.
    pub fn buffer_capacity(&self) -> Result<usize> {
        window_capacity(self.fps, self.record_window)
    }

    pub fn trigger_config(&self) -> TriggerConfig {
        TriggerConfig {
            target_label: self.target_label,
            record_window: self.record_window,
            frame_rate: self.fps,
            output_template: self.output_template.clone(),
        }
    }

    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            device: self.device.clone(),
            width: self.frame_width,
            height: self.frame_height,
            fps: self.fps,
        }
    }
}

fn read_config_file(path: &Path) -> Result<RecorderConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let cfg = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// Recording window from a seconds value; `source` names the setting in errors.
pub fn window_from_secs(secs: f64, source: &str) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(anyhow!("{} must be greater than zero, got {}", source, secs));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| anyhow!("{} is out of range ({}): {}", source, secs, e))
}
