use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use watchpost::config::WatchpostConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "WATCHPOST_CONFIG",
        "WATCHPOST_SOURCE_URI",
        "WATCHPOST_MODEL_PATH",
        "WATCHPOST_TARGET_CLASSES",
        "WATCHPOST_CONFIDENCE",
        "WATCHPOST_COOLDOWN_SECS",
        "WATCHPOST_ALERT_DIR",
        "WATCHPOST_SPOOL_DIR",
        "WATCHPOST_RECIPIENTS",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "source": {
                "uri": "rtsp://camera-1/stream",
                "width": 800,
                "height": 600,
                "fps": 12,
                "buffer_frames": 16,
                "max_consecutive_failures": 0
            },
            "detection": {
                "model_path": "models/yolov8n.onnx",
                "confidence_threshold": 0.65,
                "target_classes": ["person", "car"],
                "save_alert_frames": false,
                "alert_frame_dir": "/var/lib/watchpost/alerts"
            },
            "alert": {
                "cooldown_seconds": 45,
                "history_limit": 50,
                "spool_dir": "/var/spool/watchpost",
                "recipients": ["ops@example.com"]
            }
        }"#,
    );

    std::env::set_var("WATCHPOST_CONFIG", file.path());
    std::env::set_var("WATCHPOST_TARGET_CLASSES", "person, dog");
    std::env::set_var("WATCHPOST_COOLDOWN_SECS", "90");
    std::env::set_var("WATCHPOST_RECIPIENTS", "ops@example.com,guard@example.com");

    let cfg = WatchpostConfig::load().expect("load config");

    assert_eq!(cfg.source.uri, "rtsp://camera-1/stream");
    assert_eq!((cfg.source.width, cfg.source.height, cfg.source.fps), (800, 600, 12));
    assert_eq!(cfg.source.buffer_frames, 16);
    assert_eq!(cfg.source.max_consecutive_failures, 0);
    assert_eq!(cfg.model_path, Some(PathBuf::from("models/yolov8n.onnx")));
    assert_eq!(cfg.pipeline.confidence_threshold, 0.65);
    assert_eq!(
        cfg.pipeline.target_classes.iter().cloned().collect::<Vec<_>>(),
        vec!["dog".to_string(), "person".to_string()]
    );
    assert!(!cfg.pipeline.save_alert_frames);
    assert_eq!(cfg.pipeline.alert_frame_dir, PathBuf::from("/var/lib/watchpost/alerts"));
    assert_eq!(cfg.pipeline.alert_cooldown_seconds, 90);
    assert_eq!(cfg.alert.history_limit, 50);
    assert_eq!(cfg.alert.spool_dir, Some(PathBuf::from("/var/spool/watchpost")));
    assert_eq!(cfg.alert.recipients, vec!["ops@example.com", "guard@example.com"]);

    let settings = cfg.source_settings();
    assert_eq!(settings.capture.width, 800);
    assert_eq!(settings.buffer_frames, 16);

    clear_env();
}

#[test]
fn defaults_apply_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = WatchpostConfig::load().expect("load config");

    assert!(cfg.source.uri.starts_with("stub://"));
    assert_eq!((cfg.source.width, cfg.source.height, cfg.source.fps), (1280, 720, 30));
    assert!(cfg.model_path.is_none());
    assert_eq!(cfg.pipeline.confidence_threshold, 0.5);
    assert!(cfg.pipeline.target_classes.contains("person"));
    assert_eq!(cfg.pipeline.alert_cooldown_seconds, 30);
    assert!(cfg.pipeline.save_alert_frames);
    assert_eq!(cfg.pipeline.alert_frame_dir, PathBuf::from("alerts"));
    assert_eq!(cfg.alert.history_limit, 1000);
    assert!(cfg.alert.spool_dir.is_none());

    clear_env();
}

#[test]
fn rejects_out_of_range_confidence() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("WATCHPOST_CONFIDENCE", "1.5");
    assert!(WatchpostConfig::load().is_err());

    std::env::set_var("WATCHPOST_CONFIDENCE", "high");
    assert!(WatchpostConfig::load().is_err());

    clear_env();
}

#[test]
fn rejects_invalid_file_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let empty_classes = write_config(r#"{"detection": {"target_classes": []}}"#);
    std::env::set_var("WATCHPOST_CONFIG", empty_classes.path());
    assert!(WatchpostConfig::load().is_err());

    let zero_buffer = write_config(r#"{"source": {"buffer_frames": 0}}"#);
    std::env::set_var("WATCHPOST_CONFIG", zero_buffer.path());
    assert!(WatchpostConfig::load().is_err());

    let malformed = write_config("{ not json");
    std::env::set_var("WATCHPOST_CONFIG", malformed.path());
    assert!(WatchpostConfig::load().is_err());

    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("WATCHPOST_CONFIG", "/nonexistent/watchpost.json");
    assert!(WatchpostConfig::load().is_err());

    clear_env();
}
