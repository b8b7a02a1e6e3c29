//! Trigger Recorder
//!
//! Continuously captures frames into a bounded ring, classifies them one at a time
//! on a worker thread, and saves a clip around every frame that matches the
//! target label.
//!
//! # Architecture
//!
//! A clip covers one recording window: half of it is already in the ring when the
//! trigger fires, the other half is captured while the flush task sleeps.
//!
//! 1. **Bounded memory**: the ring never holds more than `fps * window` frames.
//! 2. **One flush at a time**: a trigger claims the ring; later matches are ignored
//!    until the claiming flush has taken its snapshot.
//! 3. **Non-blocking capture**: the capture loop polls classification and never
//!    waits on it or on encoding.
//! 4. **Graceful shutdown**: outstanding classification and flushes finish before
//!    the session returns.
//!
//! # Module Structure
//!
//! - `frame`: Frame, BufferedFrame, FrameRing, Snapshot
//! - `ingest`: Frame sources (synthetic, V4L2)
//! - `classify`: Classifier trait and backends (stub, tract)
//! - `sink`: Video sinks (MJPEG file, in-memory)
//! - `trigger`: TriggerController and clip naming
//! - `capture`: CaptureLoop
//! - `upload`: Directory sync to remote storage

pub mod capture;
pub mod classify;
pub mod config;
pub mod frame;
pub mod ingest;
pub mod shutdown;
pub mod sink;
pub mod trigger;
pub mod upload;

pub use capture::{CaptureLoop, SessionSummary, StopReason};
pub use classify::{Classifier, Labels, SharedClassifier, StubClassifier};
#[cfg(feature = "backend-tract")]
pub use classify::TractClassifier;
pub use config::{ClassifierBackend, RecorderConfig};
pub use frame::{BufferedFrame, Frame, FrameRing, Snapshot};
pub use ingest::{open_source, FrameSource, ReadStatus, SourceConfig, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use ingest::{V4l2Config, V4l2Source};
pub use shutdown::Shutdown;
pub use sink::{MemorySinkFactory, MjpegSinkFactory, SinkFactory, VideoSink};
pub use trigger::{FlushReport, Step, TriggerConfig, TriggerController, TriggerStats, TriggerSummary};
pub use upload::{sync_dir, SyncReport, UploadOutcome, Uploader};
