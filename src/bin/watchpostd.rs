//! watchpostd - surveillance daemon
//!
//! This daemon:
//! 1. Loads configuration ($WATCHPOST_CONFIG + WATCHPOST_* overrides)
//! 2. Opens the configured video source
//! 3. Selects a detector (ONNX model, or motion fallback)
//! 4. Runs detection and alerting on a background thread
//! 5. Logs statistics periodically until Ctrl-C

use anyhow::{anyhow, Result};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use watchpost::{Surveillance, WatchpostConfig};

const STATS_INTERVAL: Duration = Duration::from_secs(30);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = WatchpostConfig::load()?;
    log::info!(
        "watchpostd {} starting: source={} classes={:?} threshold={} cooldown={}s",
        env!("CARGO_PKG_VERSION"),
        cfg.source.uri,
        cfg.pipeline.target_classes,
        cfg.pipeline.confidence_threshold,
        cfg.pipeline.alert_cooldown_seconds
    );

    let mut surveillance = Surveillance::from_config(&cfg)?;
    surveillance.open()?;
    let handle = surveillance.spawn()?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("watchpostd running. waiting for shutdown signal (Ctrl-C)...");
    loop {
        match rx.recv_timeout(STATS_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                if !handle.is_running() {
                    log::error!("processing loop exited unexpectedly");
                    break;
                }
                let stats = handle.stats();
                log::info!(
                    "stats: captured={} buffered_bytes={} processed={} detections={} alerts={} read_failures={} detector_errors={} notify_failures={} source={:?} cooling_down={}",
                    stats.frames_captured,
                    stats.buffer_bytes,
                    stats.frames_processed,
                    stats.detections,
                    stats.alerts_raised,
                    stats.read_failures,
                    stats.detector_errors,
                    stats.notification_failures,
                    stats.source_state,
                    stats.cooling_down
                );
            }
        }
    }

    log::info!("stopping surveillance...");
    let surveillance = handle.stop()?;
    let stats = surveillance.stats();
    log::info!(
        "watchpostd stopped: {} frames processed, {} alert(s) raised",
        stats.frames_processed,
        stats.alerts_raised
    );
    Ok(())
}
