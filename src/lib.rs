//! watchpost
//!
//! Video surveillance pipeline: continuous frame acquisition, per-frame object
//! detection, and deduplicated, rate-limited alerts with frame evidence.
//!
//! # Architecture
//!
//! ```text
//! FrameSource ──▶ RingBuffer ──▶ DetectionPipeline ──▶ AlertCoordinator ──▶ Notifier
//!  (capture thread)  (latest frame)  (threshold + classes)   (cooldown gate)
//! ```
//!
//! Two properties hold by construction:
//!
//! 1. **Decoupled acquisition**: the capture thread never waits on a consumer.
//!    The ring buffer overwrites its oldest frame, and frames are immutable
//!    (`Arc<[u8]>` pixels), so a slow consumer can only miss frames.
//! 2. **Rate-limited alerting**: at most one alert per cooldown window, keyed on
//!    wall-clock time. Suppressed detections are still logged.
//!
//! # Module Structure
//!
//! - `frame`: `Frame`, `RingBuffer`
//! - `ingest`: `FrameSource` and capture backends (synthetic, V4L2, GStreamer)
//! - `detect`: detector backends and the `Detector` selection
//! - `pipeline`: confidence threshold and class filtering
//! - `alert`: cooldown gating, alert composition, history
//! - `notify`, `evidence`: alert delivery and frame persistence
//! - `surveillance`: the orchestrator tying the above together
//! - `config`: runtime and daemon configuration

pub mod alert;
pub mod config;
pub mod detect;
pub mod error;
pub mod evidence;
pub mod frame;
pub mod ingest;
pub mod notify;
pub mod pipeline;
pub mod surveillance;

pub use alert::{AlertCoordinator, AlertHistory, AlertRecord, DeliveryOutcome, DetectionLogEntry};
pub use config::{PipelineConfig, PipelineConfigUpdate, SharedConfig, WatchpostConfig};
pub use detect::{BoundingBox, Detection, Detector, DetectorBackend, DetectorKind};
pub use error::SourceError;
pub use evidence::{FrameStore, JpegFrameStore};
pub use frame::{CapturedImage, Frame, RingBuffer};
pub use ingest::{
    CaptureBackend, CaptureSettings, FrameSource, SourceInfo, SourceSettings, SourceState,
};
pub use notify::{AlertRequest, LogNotifier, Notifier, SpoolNotifier};
pub use pipeline::DetectionPipeline;
pub use surveillance::{ProcessedFrame, Statistics, Surveillance, SurveillanceHandle};
