use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::frame::DEFAULT_BUFFER_FRAMES;
use crate::ingest::{CaptureSettings, SourceSettings};

const DEFAULT_SOURCE_URI: &str = "stub://front_camera";
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;
const DEFAULT_FPS: u32 = 30;
const DEFAULT_MAX_CONSECUTIVE_FAILURES: u64 = 100;
const DEFAULT_TARGET_CLASS: &str = "person";
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_COOLDOWN_SECS: u64 = 30;
const DEFAULT_ALERT_FRAME_DIR: &str = "alerts";
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Detection and alerting parameters read on every processed frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineConfig {
    pub target_classes: BTreeSet<String>,
    pub confidence_threshold: f32,
    pub alert_cooldown_seconds: u64,
    pub save_alert_frames: bool,
    pub alert_frame_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_classes: BTreeSet::from([DEFAULT_TARGET_CLASS.to_string()]),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            alert_cooldown_seconds: DEFAULT_COOLDOWN_SECS,
            save_alert_frames: true,
            alert_frame_dir: PathBuf::from(DEFAULT_ALERT_FRAME_DIR),
        }
    }
}

impl PipelineConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.alert_cooldown_seconds)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.confidence_threshold.is_finite()
            || !(0.0..=1.0).contains(&self.confidence_threshold)
        {
            return Err(anyhow!(
                "confidence_threshold must be within 0.0..=1.0 (got {})",
                self.confidence_threshold
            ));
        }
        if self.target_classes.is_empty() {
            return Err(anyhow!("target_classes must name at least one class"));
        }
        if self.target_classes.iter().any(|class| class.trim().is_empty()) {
            return Err(anyhow!("target_classes must not contain blank names"));
        }
        if self.save_alert_frames && self.alert_frame_dir.as_os_str().is_empty() {
            return Err(anyhow!("alert_frame_dir must be set when saving alert frames"));
        }
        Ok(())
    }
}

/// Partial reconfiguration; unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfigUpdate {
    pub target_classes: Option<BTreeSet<String>>,
    pub confidence_threshold: Option<f32>,
    pub alert_cooldown_seconds: Option<u64>,
    pub save_alert_frames: Option<bool>,
    pub alert_frame_dir: Option<PathBuf>,
}

impl PipelineConfigUpdate {
    /// Merge onto `base`, returning the validated result. `base` is never modified.
    pub fn apply(&self, base: &PipelineConfig) -> Result<PipelineConfig> {
        let mut next = base.clone();
        if let Some(classes) = &self.target_classes {
            next.target_classes = classes.iter().map(|c| c.trim().to_string()).collect();
        }
        if let Some(threshold) = self.confidence_threshold {
            next.confidence_threshold = threshold;
        }
        if let Some(cooldown) = self.alert_cooldown_seconds {
            next.alert_cooldown_seconds = cooldown;
        }
        if let Some(save) = self.save_alert_frames {
            next.save_alert_frames = save;
        }
        if let Some(dir) = &self.alert_frame_dir {
            next.alert_frame_dir = dir.clone();
        }
        next.validate()?;
        Ok(next)
    }
}

/// Pipeline configuration shared between the processing loop and its controllers.
///
/// Readers take an `Arc` snapshot per frame; writers swap the whole value.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig {
    current: Arc<RwLock<Arc<PipelineConfig>>>,
}

impl SharedConfig {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
        })
    }

    pub fn snapshot(&self) -> Arc<PipelineConfig> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply `update`; on error the previous configuration stays in effect.
    pub fn reconfigure(&self, update: &PipelineConfigUpdate) -> Result<Arc<PipelineConfig>> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let next = Arc::new(update.apply(&guard)?);
        *guard = next.clone();
        log::info!(
            "SharedConfig: classes={:?} threshold={} cooldown={}s save_frames={}",
            next.target_classes,
            next.confidence_threshold,
            next.alert_cooldown_seconds,
            next.save_alert_frames
        );
        Ok(next)
    }
}

#[derive(Debug, Deserialize, Default)]
struct WatchpostConfigFile {
    source: Option<SourceConfigFile>,
    detection: Option<DetectionConfigFile>,
    alert: Option<AlertConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    uri: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    buffer_frames: Option<usize>,
    max_consecutive_failures: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    model_path: Option<PathBuf>,
    confidence_threshold: Option<f32>,
    target_classes: Option<Vec<String>>,
    save_alert_frames: Option<bool>,
    alert_frame_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    cooldown_seconds: Option<u64>,
    history_limit: Option<usize>,
    spool_dir: Option<PathBuf>,
    recipients: Option<Vec<String>>,
}

/// Daemon configuration: JSON file at `$WATCHPOST_CONFIG`, then environment overrides.
#[derive(Debug, Clone)]
pub struct WatchpostConfig {
    pub source: SourceConfig,
    pub model_path: Option<PathBuf>,
    pub pipeline: PipelineConfig,
    pub alert: AlertSettings,
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub uri: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub buffer_frames: usize,
    pub max_consecutive_failures: u64,
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    /// Maximum retained alert records; zero keeps everything.
    pub history_limit: usize,
    /// Directory for the JSON-lines alert spool. Alerts are only logged when unset.
    pub spool_dir: Option<PathBuf>,
    pub recipients: Vec<String>,
}

impl WatchpostConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("WATCHPOST_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: WatchpostConfigFile) -> Self {
        let source = file.source.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let alert = file.alert.unwrap_or_default();
        let defaults = PipelineConfig::default();

        let source = SourceConfig {
            uri: source.uri.unwrap_or_else(|| DEFAULT_SOURCE_URI.to_string()),
            width: source.width.unwrap_or(DEFAULT_WIDTH),
            height: source.height.unwrap_or(DEFAULT_HEIGHT),
            fps: source.fps.unwrap_or(DEFAULT_FPS),
            buffer_frames: source.buffer_frames.unwrap_or(DEFAULT_BUFFER_FRAMES),
            max_consecutive_failures: source
                .max_consecutive_failures
                .unwrap_or(DEFAULT_MAX_CONSECUTIVE_FAILURES),
        };
        let pipeline = PipelineConfig {
            target_classes: detection
                .target_classes
                .map(|classes| classes.into_iter().map(|c| c.trim().to_string()).collect())
                .unwrap_or(defaults.target_classes),
            confidence_threshold: detection
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            alert_cooldown_seconds: alert
                .cooldown_seconds
                .unwrap_or(defaults.alert_cooldown_seconds),
            save_alert_frames: detection
                .save_alert_frames
                .unwrap_or(defaults.save_alert_frames),
            alert_frame_dir: detection
                .alert_frame_dir
                .unwrap_or(defaults.alert_frame_dir),
        };
        Self {
            source,
            model_path: detection.model_path,
            pipeline,
            alert: AlertSettings {
                history_limit: alert.history_limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
                spool_dir: alert.spool_dir,
                recipients: alert.recipients.unwrap_or_default(),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(uri) = std::env::var("WATCHPOST_SOURCE_URI") {
            if !uri.trim().is_empty() {
                self.source.uri = uri.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var("WATCHPOST_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(classes) = std::env::var("WATCHPOST_TARGET_CLASSES") {
            let parsed = split_csv(&classes);
            if !parsed.is_empty() {
                self.pipeline.target_classes = parsed.into_iter().collect();
            }
        }
        if let Ok(confidence) = std::env::var("WATCHPOST_CONFIDENCE") {
            self.pipeline.confidence_threshold = confidence.trim().parse().map_err(|_| {
                anyhow!("WATCHPOST_CONFIDENCE must be a number between 0.0 and 1.0")
            })?;
        }
        if let Ok(cooldown) = std::env::var("WATCHPOST_COOLDOWN_SECS") {
            self.pipeline.alert_cooldown_seconds = cooldown.trim().parse().map_err(|_| {
                anyhow!("WATCHPOST_COOLDOWN_SECS must be an integer number of seconds")
            })?;
        }
        if let Ok(dir) = std::env::var("WATCHPOST_ALERT_DIR") {
            if !dir.trim().is_empty() {
                self.pipeline.alert_frame_dir = PathBuf::from(dir);
            }
        }
        if let Ok(dir) = std::env::var("WATCHPOST_SPOOL_DIR") {
            if !dir.trim().is_empty() {
                self.alert.spool_dir = Some(PathBuf::from(dir));
            }
        }
        if let Ok(recipients) = std::env::var("WATCHPOST_RECIPIENTS") {
            let parsed = split_csv(&recipients);
            if !parsed.is_empty() {
                self.alert.recipients = parsed;
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.pipeline.validate()?;
        if self.source.uri.is_empty() {
            return Err(anyhow!("source uri must not be empty"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source width and height must be greater than zero"));
        }
        if self.source.fps == 0 {
            return Err(anyhow!("source fps must be greater than zero"));
        }
        if self.source.buffer_frames == 0 {
            return Err(anyhow!("source buffer_frames must be greater than zero"));
        }
        if self.alert.recipients.iter().any(|r| !r.contains('@')) {
            return Err(anyhow!("alert recipients must be email addresses"));
        }
        Ok(())
    }

    /// Acquisition settings for the configured source.
    pub fn source_settings(&self) -> SourceSettings {
        SourceSettings {
            capture: CaptureSettings {
                width: self.source.width,
                height: self.source.height,
                fps: self.source.fps,
            },
            buffer_frames: self.source.buffer_frames,
            max_consecutive_failures: self.source.max_consecutive_failures,
            ..SourceSettings::default()
        }
    }
}

fn read_config_file(path: &Path) -> Result<WatchpostConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
