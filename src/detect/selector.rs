use std::fmt;
use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use super::backend::DetectorBackend;
use super::backends::MotionBackend;
use super::result::Detection;
use crate::frame::Frame;

/// Which detector variant is active.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Primary,
    Fallback,
    Unavailable,
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DetectorKind::Primary => "primary",
            DetectorKind::Fallback => "fallback",
            DetectorKind::Unavailable => "unavailable",
        };
        f.write_str(label)
    }
}

/// The detection capability, chosen once at construction.
///
/// A primary model that cannot be loaded degrades to the motion fallback; the
/// choice never changes afterwards.
pub enum Detector {
    Primary(Box<dyn DetectorBackend>),
    Fallback(MotionBackend),
    /// No detection at all; every frame yields an empty result.
    Unavailable,
}

impl Detector {
    /// Use `primary` when it loaded and warms up, otherwise the motion fallback.
    pub fn select(primary: Result<Box<dyn DetectorBackend>>) -> Self {
        match primary {
            Ok(mut backend) => match backend.warm_up() {
                Ok(()) => {
                    log::info!("Detector: using primary backend '{}'", backend.name());
                    Detector::Primary(backend)
                }
                Err(err) => {
                    log::error!(
                        "Detector: backend '{}' failed to warm up: {:#}; falling back to motion detection",
                        backend.name(),
                        err
                    );
                    Detector::Fallback(MotionBackend::default())
                }
            },
            Err(err) => {
                log::error!(
                    "Detector: primary backend unavailable: {:#}; falling back to motion detection",
                    err
                );
                Detector::Fallback(MotionBackend::default())
            }
        }
    }

    /// Load the ONNX model at `model_path` as primary, or fall back to motion detection.
    pub fn from_model_path(model_path: Option<&Path>) -> Self {
        match model_path {
            Some(path) => Self::select(load_model(path)),
            None => {
                log::info!("Detector: no model configured; using motion detection");
                Detector::Fallback(MotionBackend::default())
            }
        }
    }

    pub fn kind(&self) -> DetectorKind {
        match self {
            Detector::Primary(_) => DetectorKind::Primary,
            Detector::Fallback(_) => DetectorKind::Fallback,
            Detector::Unavailable => DetectorKind::Unavailable,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Detector::Primary(backend) => backend.name(),
            Detector::Fallback(backend) => backend.name(),
            Detector::Unavailable => "none",
        }
    }

    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        match self {
            Detector::Primary(backend) => backend.detect(frame),
            Detector::Fallback(backend) => backend.detect(frame),
            Detector::Unavailable => Ok(Vec::new()),
        }
    }
}

#[cfg(feature = "backend-tract")]
fn load_model(path: &Path) -> Result<Box<dyn DetectorBackend>> {
    let backend = super::backends::TractBackend::new(path)?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn load_model(path: &Path) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow::anyhow!(
        "model {} requires the backend-tract feature",
        path.display()
    ))
}
