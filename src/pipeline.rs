//! Per-frame detection: run the detector, apply the confidence threshold, keep
//! target classes.

use std::collections::BTreeSet;

use crate::config::PipelineConfig;
use crate::detect::{Detection, Detector, DetectorKind};
use crate::frame::Frame;

/// Log the first detector error and then every Nth.
const DETECTOR_ERROR_LOG_EVERY: u64 = 50;

pub struct DetectionPipeline {
    detector: Detector,
    detector_errors: u64,
}

impl DetectionPipeline {
    pub fn new(detector: Detector) -> Self {
        log::info!(
            "DetectionPipeline: detector '{}' ({})",
            detector.name(),
            detector.kind()
        );
        Self {
            detector,
            detector_errors: 0,
        }
    }

    /// Run the detector and drop everything below `threshold`.
    ///
    /// Detector failures yield an empty result and are counted, never propagated.
    pub fn detect(&mut self, frame: &Frame, threshold: f32) -> Vec<Detection> {
        match self.detector.detect(frame) {
            Ok(detections) => detections
                .into_iter()
                .filter(|d| d.confidence >= threshold)
                .collect(),
            Err(err) => {
                self.detector_errors += 1;
                if self.detector_errors == 1 || self.detector_errors % DETECTOR_ERROR_LOG_EVERY == 0
                {
                    log::error!(
                        "DetectionPipeline: detector '{}' failed on frame {} ({} errors so far): {:#}",
                        self.detector.name(),
                        frame.sequence,
                        self.detector_errors,
                        err
                    );
                }
                Vec::new()
            }
        }
    }

    /// Detect then keep only `config.target_classes`.
    pub fn process(&mut self, frame: &Frame, config: &PipelineConfig) -> Vec<Detection> {
        let detections = self.detect(frame, config.confidence_threshold);
        filter_by_class(detections, &config.target_classes)
    }

    pub fn detector_errors(&self) -> u64 {
        self.detector_errors
    }

    pub fn detector_kind(&self) -> DetectorKind {
        self.detector.kind()
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }
}

/// Keep detections whose class is in `target_classes`, preserving order.
pub fn filter_by_class(
    detections: Vec<Detection>,
    target_classes: &BTreeSet<String>,
) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|d| target_classes.contains(&d.class_name))
        .collect()
}
