//! Frame ingestion.
//!
//! A `FrameSource` owns one capture backend and a dedicated acquisition thread
//! that pulls frames as fast as the backend delivers them and pushes them into a
//! `RingBuffer`. Consumers read the latest frame without ever blocking the feed.
//!
//! Backends are selected by URI:
//! - `stub://<name>[?frames=N]`: synthetic scene (tests, demos)
//! - `/dev/videoN` (feature: ingest-v4l2)
//! - RTSP URLs and local video files (feature: ingest-gstreamer)
//!
//! The ingestion layer MUST NOT:
//! - Block the acquisition thread on a consumer
//! - Log raw frame content

#[cfg(feature = "ingest-gstreamer")]
pub mod stream;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
mod source;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;

use crate::error::SourceError;
use crate::frame::CapturedImage;

#[cfg(feature = "ingest-gstreamer")]
pub use stream::GstreamerBackend;
pub use source::{FrameSource, SourceInfo, SourceSettings, SourceState};
pub use synthetic::SyntheticBackend;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Backend;

/// Capture parameters requested from a backend. Backends honor them best-effort.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
        }
    }
}

/// Format a backend actually delivers after `open`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ActiveFormat {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// A device, stream or file that yields RGB24 images.
///
/// `open` runs on the caller's thread so its failure is caller-visible.
/// `read_frame` runs on the acquisition thread; it may block for about one frame
/// interval but should not block indefinitely.
pub trait CaptureBackend: Send {
    /// Human-readable source identifier (URI or device path).
    fn describe(&self) -> String;

    fn open(&mut self, settings: &CaptureSettings) -> Result<ActiveFormat>;

    fn read_frame(&mut self) -> Result<CapturedImage>;
}

/// Build the backend for a source URI. Performs no I/O.
pub fn create_backend(uri: &str) -> Result<Box<dyn CaptureBackend>, SourceError> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(SourceError::unavailable(uri, "empty source uri"));
    }
    if uri.starts_with("stub://") {
        let backend =
            SyntheticBackend::from_uri(uri).map_err(|e| SourceError::unavailable(uri, e))?;
        return Ok(Box::new(backend));
    }
    if uri.starts_with("/dev/video") {
        #[cfg(feature = "ingest-v4l2")]
        {
            return Ok(Box::new(V4l2Backend::new(uri)));
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            return Err(SourceError::unavailable(
                uri,
                "video devices require the ingest-v4l2 feature",
            ));
        }
    }
    #[cfg(feature = "ingest-gstreamer")]
    {
        Ok(Box::new(GstreamerBackend::new(uri)))
    }
    #[cfg(not(feature = "ingest-gstreamer"))]
    {
        Err(SourceError::unavailable(
            uri,
            "streams and video files require the ingest-gstreamer feature",
        ))
    }
}
