use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use anyhow::{anyhow, Result};

use watchpost::detect::ScriptedBackend;
use watchpost::ingest::{ActiveFormat, SyntheticBackend};
use watchpost::{
    AlertCoordinator, BoundingBox, CaptureBackend, CaptureSettings, CapturedImage,
    DeliveryOutcome, Detection, DetectionPipeline, Detector, FrameSource, PipelineConfig,
    SharedConfig, SourceSettings, SpoolNotifier, Surveillance,
};

const WIDTH: u32 = 32;
const HEIGHT: u32 = 24;

/// Backend fed frame by frame from the test thread.
struct ChannelBackend {
    frames: mpsc::Receiver<CapturedImage>,
}

impl CaptureBackend for ChannelBackend {
    fn describe(&self) -> String {
        "test://channel".to_string()
    }

    fn open(&mut self, settings: &CaptureSettings) -> Result<ActiveFormat> {
        Ok(ActiveFormat {
            width: settings.width,
            height: settings.height,
            fps: settings.fps as f64,
        })
    }

    fn read_frame(&mut self) -> Result<CapturedImage> {
        self.frames
            .recv_timeout(Duration::from_millis(100))
            .map_err(|e| anyhow!("no frame: {}", e))
    }
}

fn settings(fps: u32) -> SourceSettings {
    SourceSettings {
        capture: CaptureSettings {
            width: WIDTH,
            height: HEIGHT,
            fps,
        },
        max_consecutive_failures: 0,
        read_backoff: Duration::from_millis(1),
        ..SourceSettings::default()
    }
}

fn person() -> Detection {
    Detection::new("person", 0.9, BoundingBox::new(2, 2, 12, 20), 0)
}

fn pipeline_config(cooldown: u64, save_frames: bool, dir: &std::path::Path) -> PipelineConfig {
    PipelineConfig {
        alert_cooldown_seconds: cooldown,
        save_alert_frames: save_frames,
        alert_frame_dir: dir.join("alerts"),
        ..PipelineConfig::default()
    }
}

fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

#[test]
fn single_detection_raises_exactly_one_alert() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (tx, rx) = mpsc::channel();
    let source = FrameSource::new(Box::new(ChannelBackend { frames: rx }), settings(0))?;

    let car = Detection::new("car", 0.95, BoundingBox::new(0, 0, 4, 4), 2);
    let weak_person = Detection::new("person", 0.3, BoundingBox::new(0, 0, 4, 4), 0);
    let scripted = ScriptedBackend::new()
        .with_detections(50, vec![person(), car])
        .with_detections(51, vec![weak_person]);
    let notifier = SpoolNotifier::new(dir.path(), vec!["ops@example.com".to_string()])?;
    let spool = notifier.path().to_path_buf();
    let mut surveillance = Surveillance::new(
        source,
        DetectionPipeline::new(Detector::Primary(Box::new(scripted))),
        AlertCoordinator::default().with_notifier(Box::new(notifier)),
        SharedConfig::new(pipeline_config(5, true, dir.path()))?,
    );
    surveillance.open()?;

    let started = SystemTime::now();
    let mut alerts = Vec::new();
    for sequence in 1..=100u64 {
        tx.send(CapturedImage::new(
            vec![(sequence % 255) as u8; (WIDTH * HEIGHT * 3) as usize],
            WIDTH,
            HEIGHT,
        ))?;
        assert!(wait_until(Duration::from_secs(2), || {
            surveillance.source().info().frames_captured >= sequence
        }));
        let processed = surveillance
            .process_next()
            .ok_or_else(|| anyhow!("frame {} not processed", sequence))?;
        assert_eq!(processed.frame.sequence, sequence);
        if sequence == 50 {
            assert_eq!(processed.detections, vec![person()]);
        } else {
            assert!(processed.detections.is_empty());
        }
        if let Some(alert) = processed.alert {
            alerts.push(alert);
        }
        // Each frame is handled once.
        assert!(surveillance.process_next().is_none());
    }
    let finished = SystemTime::now();
    surveillance.release();

    assert_eq!(alerts.len(), 1);
    let alert = &alerts[0];
    assert_eq!(alert.frame_sequence, 50);
    assert!(alert.subject.contains("1 Object(s)"));
    assert!(alert.body.contains("person"));
    assert_eq!(alert.detection_summary, "person (0.90)");
    assert!(alert.timestamp >= started && alert.timestamp <= finished);
    assert_eq!(alert.delivery, DeliveryOutcome::Delivered);
    assert_eq!(alert.target, "ops@example.com");

    let frame_path = alert
        .frame_path
        .as_ref()
        .ok_or_else(|| anyhow!("alert frame not saved"))?;
    assert!(frame_path.exists());

    let spooled = std::fs::read_to_string(&spool)?;
    assert_eq!(spooled.lines().count(), 1);

    assert_eq!(surveillance.alert_history(), alerts);
    let stats = surveillance.stats();
    assert_eq!(stats.frames_processed, 100);
    assert_eq!(stats.detections, 1);
    assert_eq!(stats.alerts_raised, 1);
    assert_eq!(stats.notification_failures, 0);
    Ok(())
}

#[test]
fn background_loop_at_fixed_rate_alerts_once() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = FrameSource::new(
        Box::new(SyntheticBackend::new("e2e").with_frame_limit(100)),
        settings(50),
    )?;
    let scripted = ScriptedBackend::new().with_detections_between(50..=59, vec![person()]);
    let mut surveillance = Surveillance::new(
        source,
        DetectionPipeline::new(Detector::Primary(Box::new(scripted))),
        AlertCoordinator::default(),
        SharedConfig::new(pipeline_config(5, false, dir.path()))?,
    );
    surveillance.open()?;

    let handle = surveillance.spawn()?;
    assert!(handle.is_running());
    assert!(wait_until(Duration::from_secs(10), || {
        handle.stats().frames_captured >= 100
    }));
    thread::sleep(Duration::from_millis(50));
    let surveillance = handle.stop()?;

    let history = surveillance.alert_history();
    assert_eq!(history.len(), 1);
    assert!((50..=59).contains(&history[0].frame_sequence));
    assert!(history[0].body.contains("person"));
    assert_eq!(history[0].delivery, DeliveryOutcome::NotRequested);
    assert!(history[0].frame_path.is_none());

    let log = surveillance.detection_log();
    assert!(!log.is_empty());
    assert_eq!(log.iter().filter(|entry| entry.alerted).count(), 1);
    Ok(())
}

#[test]
fn reconfiguration_takes_effect_on_next_frame() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (tx, rx) = mpsc::channel();
    let source = FrameSource::new(Box::new(ChannelBackend { frames: rx }), settings(0))?;
    let car = Detection::new("car", 0.8, BoundingBox::new(0, 0, 4, 4), 2);
    let scripted = ScriptedBackend::new()
        .with_detections(1, vec![car.clone()])
        .with_detections(2, vec![car.clone()]);
    let mut surveillance = Surveillance::new(
        source,
        DetectionPipeline::new(Detector::Primary(Box::new(scripted))),
        AlertCoordinator::default(),
        SharedConfig::new(pipeline_config(0, false, dir.path()))?,
    );
    surveillance.open()?;

    let step = |sequence: u64, surveillance: &mut Surveillance| -> Result<_> {
        tx.send(CapturedImage::new(
            vec![0u8; (WIDTH * HEIGHT * 3) as usize],
            WIDTH,
            HEIGHT,
        ))?;
        assert!(wait_until(Duration::from_secs(2), || {
            surveillance.source().info().frames_captured >= sequence
        }));
        surveillance
            .process_next()
            .ok_or_else(|| anyhow!("frame {} not processed", sequence))
    };

    assert!(step(1, &mut surveillance)?.detections.is_empty());

    surveillance.reconfigure(&watchpost::PipelineConfigUpdate {
        target_classes: Some(["car".to_string()].into_iter().collect()),
        ..Default::default()
    })?;
    let processed = step(2, &mut surveillance)?;
    assert_eq!(processed.detections, vec![car]);
    assert!(processed.alert.is_some());

    surveillance.release();
    Ok(())
}
