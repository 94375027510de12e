//! demo - end-to-end synthetic run
//!
//! Synthetic source + scripted detector: a person appears at a chosen frame,
//! the pipeline raises one alert, and the run prints statistics and history.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use watchpost::detect::ScriptedBackend;
use watchpost::ingest::SyntheticBackend;
use watchpost::{
    AlertCoordinator, BoundingBox, CaptureSettings, Detection, DetectionPipeline, Detector,
    FrameSource, PipelineConfig, SharedConfig, SourceSettings, SourceState, SpoolNotifier,
    Surveillance,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Number of synthetic frames to produce.
    #[arg(long, default_value_t = 100)]
    frames: u64,
    /// Frames per second for the synthetic source.
    #[arg(long, default_value_t = 25)]
    fps: u32,
    /// Frame sequence at which a person is "detected".
    #[arg(long, default_value_t = 50)]
    detect_at: u64,
    /// How many consecutive frames carry the detection.
    #[arg(long, default_value_t = 10)]
    detect_frames: u64,
    /// Alert cooldown in seconds.
    #[arg(long, default_value_t = 5)]
    cooldown: u64,
    /// Output directory for alert frames and the alert spool.
    #[arg(long, default_value = "demo_out")]
    out: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }
    if args.detect_at == 0 || args.detect_at > args.frames {
        return Err(anyhow!("detect-at must be within 1..={}", args.frames));
    }

    let out_dir = PathBuf::from(&args.out);
    fs::create_dir_all(&out_dir)?;

    stage("open synthetic source");
    let backend = SyntheticBackend::new("demo").with_frame_limit(args.frames);
    let settings = SourceSettings {
        capture: CaptureSettings {
            width: 320,
            height: 240,
            fps: args.fps,
        },
        ..SourceSettings::default()
    };
    let source = FrameSource::new(Box::new(backend), settings)?;

    stage("script detector");
    let last_detection = args.detect_at + args.detect_frames.saturating_sub(1);
    let person = Detection::new("person", 0.92, BoundingBox::new(120, 60, 200, 220), 0);
    let scripted = ScriptedBackend::new()
        .with_detections_between(args.detect_at..=last_detection, vec![person]);
    let pipeline = DetectionPipeline::new(Detector::select(Ok(Box::new(scripted))));

    let notifier = SpoolNotifier::new(&out_dir, vec!["demo@localhost".to_string()])?;
    let spool_path = notifier.path().to_path_buf();
    let coordinator = AlertCoordinator::default().with_notifier(Box::new(notifier));
    let config = SharedConfig::new(PipelineConfig {
        alert_cooldown_seconds: args.cooldown,
        alert_frame_dir: out_dir.join("alerts"),
        ..PipelineConfig::default()
    })?;

    stage("run surveillance loop");
    let mut surveillance = Surveillance::new(source, pipeline, coordinator, config);
    surveillance.open()?;
    let handle = surveillance.spawn()?;

    let frame_interval = Duration::from_secs_f64(1.0 / args.fps as f64);
    let run_time = Duration::from_secs_f64(args.frames as f64 / args.fps as f64 + 1.0);
    let deadline = Instant::now() + run_time;
    while Instant::now() < deadline {
        let stats = handle.stats();
        if stats.frames_captured >= args.frames || stats.source_state == SourceState::Failed {
            break;
        }
        thread::sleep(Duration::from_millis(50));
    }
    // Let the loop pick up the last frame.
    thread::sleep(frame_interval * 2);
    let surveillance = handle.stop()?;

    stage("results");
    let stats = surveillance.stats();
    println!(
        "{}",
        serde_json::to_string_pretty(&stats).context("serialize statistics")?
    );
    let history = surveillance.alert_history();
    for record in &history {
        println!(
            "alert at frame {}: {} [{}] -> {} ({:?})",
            record.frame_sequence,
            record.subject,
            record.detection_summary,
            record.target,
            record.delivery
        );
        if let Some(path) = &record.frame_path {
            println!("  evidence: {}", path.display());
        }
    }
    println!("alert spool: {}", spool_path.display());
    if history.is_empty() {
        return Err(anyhow!(
            "no alert raised; frames {}..={} were never processed",
            args.detect_at,
            last_detection
        ));
    }
    Ok(())
}

fn stage(msg: &str) {
    eprintln!("demo: {}", msg);
}
