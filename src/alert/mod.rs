//! Turns per-frame target detections into rate-limited alerts.

mod compose;
mod history;

use std::time::{Duration, SystemTime};

pub use compose::{compose, summarize, AlertMessage};
pub use history::{
    AlertHistory, AlertRecord, DeliveryOutcome, DetectionLog, DetectionLogEntry,
    DETECTION_LOG_CAPACITY,
};

use crate::config::{PipelineConfig, DEFAULT_HISTORY_LIMIT};
use crate::detect::Detection;
use crate::evidence::{FrameStore, JpegFrameStore};
use crate::frame::Frame;
use crate::notify::{AlertRequest, Notifier};

/// Cooldown gate plus alert composition, evidence capture and delivery.
///
/// The gate is keyed on wall-clock time only: any target detection inside the
/// cooldown window is logged but raises nothing, whatever its class. When the
/// clock steps back behind the window start, the window restarts at the new
/// time, so suppression never outlasts one cooldown.
pub struct AlertCoordinator {
    notifier: Option<Box<dyn Notifier>>,
    frame_store: Box<dyn FrameStore>,
    last_alert_time: Option<SystemTime>,
    cooldown_start: Option<SystemTime>,
    history: AlertHistory,
    detection_log: DetectionLog,
    notification_failures: u64,
}

impl Default for AlertCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl AlertCoordinator {
    pub fn new(history_limit: usize) -> Self {
        Self {
            notifier: None,
            frame_store: Box::new(JpegFrameStore::default()),
            last_alert_time: None,
            cooldown_start: None,
            history: AlertHistory::new(history_limit),
            detection_log: DetectionLog::default(),
            notification_failures: 0,
        }
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        log::info!("AlertCoordinator: delivering alerts to {}", notifier.target());
        self.notifier = Some(notifier);
        self
    }

    pub fn with_frame_store(mut self, frame_store: Box<dyn FrameStore>) -> Self {
        self.frame_store = frame_store;
        self
    }

    /// Feed the filtered detections of one frame, using the current wall clock.
    pub fn observe(
        &mut self,
        frame: &Frame,
        detections: &[Detection],
        config: &PipelineConfig,
    ) -> Option<AlertRecord> {
        self.observe_at(frame, detections, config, SystemTime::now())
    }

    /// Like `observe` with an explicit `now`.
    pub fn observe_at(
        &mut self,
        frame: &Frame,
        detections: &[Detection],
        config: &PipelineConfig,
        now: SystemTime,
    ) -> Option<AlertRecord> {
        if detections.is_empty() {
            return None;
        }

        if let Some(start) = self.cooldown_start {
            if now < start && !config.cooldown().is_zero() {
                log::warn!(
                    "AlertCoordinator: wall clock stepped back {:?}, restarting cooldown",
                    start.duration_since(now).unwrap_or_default()
                );
                self.cooldown_start = Some(now);
            }
        }

        if let Some(remaining) = self.cooldown_remaining_at(config.cooldown(), now) {
            log::debug!(
                "AlertCoordinator: {} detection(s) on frame {} suppressed, cooldown {:?} remaining",
                detections.len(),
                frame.sequence,
                remaining
            );
            self.log_detections(frame, detections, now, false);
            return None;
        }

        self.last_alert_time = Some(now);
        self.cooldown_start = Some(now);
        log::warn!(
            "AlertCoordinator: alert triggered! Detected {} object(s) on frame {}",
            detections.len(),
            frame.sequence
        );
        for det in detections {
            log::warn!("  - {} ({:.2})", det.class_name, det.confidence);
        }

        let message = compose(detections, now);
        let frame_path = if config.save_alert_frames {
            match self
                .frame_store
                .save(frame, detections, &config.alert_frame_dir)
            {
                Ok(path) => {
                    log::info!("AlertCoordinator: alert frame saved: {}", path.display());
                    Some(path)
                }
                Err(err) => {
                    log::error!("AlertCoordinator: failed to save alert frame: {:#}", err);
                    None
                }
            }
        } else {
            None
        };

        let request = AlertRequest {
            subject: message.subject.clone(),
            body: message.body.clone(),
            attachment: frame_path.clone(),
        };
        let (target, delivery) = match &self.notifier {
            Some(notifier) => {
                let delivery = match notifier.send(&request) {
                    Ok(()) => DeliveryOutcome::Delivered,
                    Err(err) => {
                        self.notification_failures += 1;
                        log::error!(
                            "AlertCoordinator: delivery to {} failed: {:#}",
                            notifier.target(),
                            err
                        );
                        DeliveryOutcome::Failed(format!("{:#}", err))
                    }
                };
                (notifier.target(), delivery)
            }
            None => ("none".to_string(), DeliveryOutcome::NotRequested),
        };

        let record = self
            .history
            .push(AlertRecord {
                timestamp: now,
                subject: message.subject,
                body: message.body,
                detection_summary: message.detection_summary,
                target,
                frame_sequence: frame.sequence,
                frame_path,
                delivery,
            })
            .clone();
        self.log_detections(frame, detections, now, true);
        Some(record)
    }

    fn log_detections(
        &mut self,
        frame: &Frame,
        detections: &[Detection],
        now: SystemTime,
        alerted: bool,
    ) {
        self.detection_log.push(DetectionLogEntry {
            timestamp: now,
            frame_sequence: frame.sequence,
            detection_count: detections.len(),
            classes: detections.iter().map(|d| d.class_name.clone()).collect(),
            alerted,
        });
    }

    /// Time left before another alert may be raised, or `None` when not cooling down.
    ///
    /// A clock earlier than the cooldown start counts as a full cooldown remaining.
    pub fn cooldown_remaining_at(&self, cooldown: Duration, now: SystemTime) -> Option<Duration> {
        let start = self.cooldown_start?;
        let remaining = match now.duration_since(start) {
            Ok(elapsed) => cooldown.saturating_sub(elapsed),
            Err(_) => cooldown,
        };
        (!remaining.is_zero()).then_some(remaining)
    }

    pub fn cooldown_remaining(&self, cooldown: Duration) -> Option<Duration> {
        self.cooldown_remaining_at(cooldown, SystemTime::now())
    }

    pub fn last_alert_time(&self) -> Option<SystemTime> {
        self.last_alert_time
    }

    pub fn history(&self) -> &AlertHistory {
        &self.history
    }

    pub fn detection_log(&self) -> &DetectionLog {
        &self.detection_log
    }

    pub fn alerts_raised(&self) -> u64 {
        self.history.len() as u64 + self.history.evicted()
    }

    pub fn notification_failures(&self) -> u64 {
        self.notification_failures
    }
}
