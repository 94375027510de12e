use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;

use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Deterministic backend that replays pre-programmed detections by frame sequence.
///
/// Used by the demo binary and by pipeline tests.
#[derive(Default)]
pub struct ScriptedBackend {
    script: HashMap<u64, Vec<Detection>>,
    failures: HashSet<u64>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `detections` for the frame with `sequence`.
    pub fn with_detections(mut self, sequence: u64, detections: Vec<Detection>) -> Self {
        self.script.insert(sequence, detections);
        self
    }

    /// Report `detections` for every frame in `sequences`.
    pub fn with_detections_between(
        mut self,
        sequences: RangeInclusive<u64>,
        detections: Vec<Detection>,
    ) -> Self {
        for sequence in sequences {
            self.script.insert(sequence, detections.clone());
        }
        self
    }

    /// Fail detection for the frame with `sequence`.
    pub fn with_failure(mut self, sequence: u64) -> Self {
        self.failures.insert(sequence);
        self
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        if self.failures.contains(&frame.sequence) {
            return Err(anyhow!("scripted failure at frame {}", frame.sequence));
        }
        Ok(self
            .script
            .get(&frame.sequence)
            .cloned()
            .unwrap_or_default())
    }
}
