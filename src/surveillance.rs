//! Orchestration: source → detection → alerting, caller-driven or on a background thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use crate::alert::{AlertCoordinator, AlertRecord, DetectionLogEntry};
use crate::config::{PipelineConfig, PipelineConfigUpdate, SharedConfig, WatchpostConfig};
use crate::detect::{Detection, Detector, DetectorKind};
use crate::error::SourceError;
use crate::frame::Frame;
use crate::ingest::{FrameSource, SourceState};
use crate::notify::{LogNotifier, Notifier, SpoolNotifier};
use crate::pipeline::DetectionPipeline;

/// Sleep between polls when no new frame is available.
pub const DEFAULT_IDLE_POLL: Duration = Duration::from_millis(10);

/// Result of one `process_next()` call.
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    pub frame: Frame,
    /// Target detections at or above the confidence threshold.
    pub detections: Vec<Detection>,
    pub alert: Option<AlertRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub frames_captured: u64,
    pub buffer_bytes: usize,
    pub frames_processed: u64,
    /// Processed frames that carried at least one target detection.
    pub detections: u64,
    pub alerts_raised: u64,
    pub notification_failures: u64,
    pub detector_errors: u64,
    pub read_failures: u64,
    pub source_state: SourceState,
    pub detector: DetectorKind,
    pub cooling_down: bool,
    pub cooldown_remaining: Option<Duration>,
    pub last_alert: Option<SystemTime>,
    pub config: PipelineConfig,
}

/// One source, one detection pipeline, one alert coordinator.
pub struct Surveillance {
    source: FrameSource,
    pipeline: DetectionPipeline,
    coordinator: AlertCoordinator,
    config: SharedConfig,
    last_sequence: u64,
    frames_processed: u64,
    detection_frames: u64,
}

impl Surveillance {
    pub fn new(
        source: FrameSource,
        pipeline: DetectionPipeline,
        coordinator: AlertCoordinator,
        config: SharedConfig,
    ) -> Self {
        Self {
            source,
            pipeline,
            coordinator,
            config,
            last_sequence: 0,
            frames_processed: 0,
            detection_frames: 0,
        }
    }

    /// Assemble everything the daemon configuration describes. The source is not opened.
    pub fn from_config(cfg: &WatchpostConfig) -> Result<Self> {
        let source = FrameSource::from_uri(&cfg.source.uri, cfg.source_settings())?;
        let pipeline = DetectionPipeline::new(Detector::from_model_path(cfg.model_path.as_deref()));
        let notifier: Box<dyn Notifier> = match &cfg.alert.spool_dir {
            Some(dir) => Box::new(SpoolNotifier::new(dir, cfg.alert.recipients.clone())?),
            None => Box::new(LogNotifier),
        };
        let coordinator = AlertCoordinator::new(cfg.alert.history_limit).with_notifier(notifier);
        let config = SharedConfig::new(cfg.pipeline.clone())?;
        Ok(Self::new(source, pipeline, coordinator, config))
    }

    pub fn open(&mut self) -> Result<(), SourceError> {
        self.source.open()
    }

    /// Process the newest buffered frame if it has not been processed yet.
    ///
    /// Returns `None` when no frame is available or the newest frame was already
    /// handled. Frames captured in between are skipped.
    pub fn process_next(&mut self) -> Option<ProcessedFrame> {
        let frame = self.source.get_frame()?;
        if frame.sequence <= self.last_sequence {
            return None;
        }
        self.last_sequence = frame.sequence;

        let config = self.config.snapshot();
        let detections = self.pipeline.process(&frame, &config);
        self.frames_processed += 1;
        if !detections.is_empty() {
            self.detection_frames += 1;
        }
        let alert = self.coordinator.observe(&frame, &detections, &config);
        Some(ProcessedFrame {
            frame,
            detections,
            alert,
        })
    }

    pub fn reconfigure(&self, update: &PipelineConfigUpdate) -> Result<Arc<PipelineConfig>> {
        self.config.reconfigure(update)
    }

    pub fn config(&self) -> SharedConfig {
        self.config.clone()
    }

    pub fn stats(&self) -> Statistics {
        let config = self.config.snapshot();
        let source = self.source.info();
        let cooldown_remaining = self.coordinator.cooldown_remaining(config.cooldown());
        Statistics {
            frames_captured: source.frames_captured,
            buffer_bytes: source.buffer_bytes,
            frames_processed: self.frames_processed,
            detections: self.detection_frames,
            alerts_raised: self.coordinator.alerts_raised(),
            notification_failures: self.coordinator.notification_failures(),
            detector_errors: self.pipeline.detector_errors(),
            read_failures: source.read_failures,
            source_state: source.state,
            detector: self.pipeline.detector_kind(),
            cooling_down: cooldown_remaining.is_some(),
            cooldown_remaining,
            last_alert: self.coordinator.last_alert_time(),
            config: (*config).clone(),
        }
    }

    pub fn alert_history(&self) -> Vec<AlertRecord> {
        self.coordinator.history().to_vec()
    }

    pub fn detection_log(&self) -> Vec<DetectionLogEntry> {
        self.coordinator.detection_log().entries()
    }

    pub fn source(&self) -> &FrameSource {
        &self.source
    }

    pub fn release(&mut self) {
        self.source.release();
    }

    /// Run `process_next()` on a background thread until the handle is stopped.
    pub fn spawn(self) -> Result<SurveillanceHandle> {
        self.spawn_with_idle_poll(DEFAULT_IDLE_POLL)
    }

    pub fn spawn_with_idle_poll(self, idle_poll: Duration) -> Result<SurveillanceHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(self.stats()));
        let config = self.config.clone();

        let stop_flag = stop.clone();
        let published = stats.clone();
        let join = thread::Builder::new()
            .name("watchpost-process".into())
            .spawn(move || processing_loop(self, &stop_flag, &published, idle_poll))
            .context("failed to spawn processing thread")?;

        Ok(SurveillanceHandle {
            stop,
            config,
            stats,
            join: Some(join),
        })
    }
}

fn processing_loop(
    mut surveillance: Surveillance,
    stop: &AtomicBool,
    published: &Mutex<Statistics>,
    idle_poll: Duration,
) -> Surveillance {
    log::info!("Surveillance: processing loop started");
    let mut reported_failure = false;
    while !stop.load(Ordering::SeqCst) {
        let processed = surveillance.process_next();
        *published.lock().unwrap_or_else(PoisonError::into_inner) = surveillance.stats();
        if processed.is_some() {
            continue;
        }
        if !reported_failure && surveillance.source.state() == SourceState::Failed {
            log::error!(
                "Surveillance: source {} failed; waiting for shutdown",
                surveillance.source.uri()
            );
            reported_failure = true;
        }
        thread::sleep(idle_poll);
    }
    log::info!(
        "Surveillance: processing loop stopped after {} frames",
        surveillance.frames_processed
    );
    surveillance
}

/// Control handle for a background surveillance loop.
pub struct SurveillanceHandle {
    stop: Arc<AtomicBool>,
    config: SharedConfig,
    stats: Arc<Mutex<Statistics>>,
    join: Option<JoinHandle<Surveillance>>,
}

impl SurveillanceHandle {
    /// Latest statistics published by the loop.
    pub fn stats(&self) -> Statistics {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reconfigure(&self, update: &PipelineConfigUpdate) -> Result<Arc<PipelineConfig>> {
        self.config.reconfigure(update)
    }

    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|join| !join.is_finished())
    }

    /// Stop the loop, release the source and return the orchestrator for inspection.
    pub fn stop(mut self) -> Result<Surveillance> {
        self.stop.store(true, Ordering::SeqCst);
        let join = self
            .join
            .take()
            .ok_or_else(|| anyhow!("processing loop already stopped"))?;
        let mut surveillance = join
            .join()
            .map_err(|_| anyhow!("processing thread panicked"))?;
        surveillance.release();
        Ok(surveillance)
    }
}

impl Drop for SurveillanceHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, ScriptedBackend};
    use crate::ingest::{SourceSettings, SyntheticBackend};
    use std::time::Instant;

    fn surveillance(backend: ScriptedBackend) -> Surveillance {
        let settings = SourceSettings {
            capture: crate::ingest::CaptureSettings {
                width: 64,
                height: 48,
                fps: 200,
            },
            ..SourceSettings::default()
        };
        let source = FrameSource::new(Box::new(SyntheticBackend::new("unit")), settings).unwrap();
        let config = SharedConfig::new(PipelineConfig {
            save_alert_frames: false,
            ..PipelineConfig::default()
        })
        .unwrap();
        Surveillance::new(
            source,
            DetectionPipeline::new(Detector::Primary(Box::new(backend))),
            AlertCoordinator::default(),
            config,
        )
    }

    fn wait_for<F: FnMut() -> bool>(mut condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn unopened_source_yields_nothing() {
        let mut surveillance = surveillance(ScriptedBackend::new());
        assert!(surveillance.process_next().is_none());
        assert_eq!(surveillance.stats().frames_processed, 0);
    }

    #[test]
    fn same_frame_is_never_processed_twice() -> Result<()> {
        let mut surveillance = surveillance(ScriptedBackend::new());
        surveillance.open()?;
        let mut last = 0;
        let mut processed = 0;
        assert!(wait_for(|| {
            if let Some(result) = surveillance.process_next() {
                assert!(result.frame.sequence > last);
                last = result.frame.sequence;
                processed += 1;
            }
            processed >= 5
        }));
        surveillance.release();
        assert_eq!(surveillance.stats().frames_processed, processed);
        Ok(())
    }

    #[test]
    fn reconfigure_rejects_invalid_threshold() -> Result<()> {
        let surveillance = surveillance(ScriptedBackend::new());
        let update = PipelineConfigUpdate {
            confidence_threshold: Some(-0.1),
            ..Default::default()
        };
        assert!(surveillance.reconfigure(&update).is_err());
        assert_eq!(surveillance.stats().config.confidence_threshold, 0.5);
        Ok(())
    }

    #[test]
    fn background_loop_alerts_and_stops() -> Result<()> {
        let person = Detection::new("person", 0.9, BoundingBox::new(0, 0, 8, 8), 0);
        let backend = ScriptedBackend::new().with_detections_between(1..=1_000, vec![person]);
        let mut surveillance = surveillance(backend);
        surveillance.open()?;

        let handle = surveillance.spawn()?;
        assert!(wait_for(|| handle.stats().alerts_raised >= 1));
        let stats = handle.stats();
        assert!(stats.cooling_down);
        assert_eq!(stats.detector, DetectorKind::Primary);

        let surveillance = handle.stop()?;
        assert_eq!(surveillance.alert_history().len(), 1);
        assert_eq!(surveillance.source().state(), SourceState::Stopped);
        assert!(surveillance.detection_log().len() as u64 >= 1);
        Ok(())
    }
}
