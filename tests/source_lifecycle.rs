use std::thread;
use std::time::{Duration, Instant};

use watchpost::{FrameSource, SourceError, SourceSettings, SourceState};

fn settings() -> SourceSettings {
    let mut settings = SourceSettings::default();
    settings.capture.width = 64;
    settings.capture.height = 48;
    settings.capture.fps = 100;
    settings.buffer_frames = 8;
    settings
}

fn wait_until<F: FnMut() -> bool>(mut condition: F) -> bool {
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
fn stub_source_streams_increasing_frames() {
    let mut source = FrameSource::from_uri("stub://lobby", settings()).expect("source");
    assert!(source.get_frame().is_none());
    assert_eq!(source.state(), SourceState::Idle);

    source.open().expect("open");
    assert!(wait_until(|| source.info().frames_captured >= 20));

    let mut last = 0;
    for _ in 0..10 {
        if let Some(frame) = source.get_frame() {
            assert!(frame.sequence >= last);
            assert_eq!((frame.width, frame.height), (64, 48));
            last = frame.sequence;
        }
        thread::sleep(Duration::from_millis(5));
    }

    let info = source.info();
    assert_eq!(info.uri, "stub://lobby");
    assert_eq!((info.width, info.height), (64, 48));
    assert!(info.buffer_depth <= 8);
    assert!(info.buffer_bytes > 0 && info.buffer_bytes <= 8 * 64 * 48 * 3);
    assert_eq!(info.buffer_bytes % (64 * 48 * 3), 0);
    assert_eq!(info.state, SourceState::Running);

    let buffered = source.snapshot();
    assert!(buffered.windows(2).all(|w| w[0].sequence < w[1].sequence));

    source.release();
}

#[test]
fn opening_twice_is_rejected() {
    let mut source = FrameSource::from_uri("stub://twice", settings()).expect("source");
    source.open().expect("open");
    assert!(matches!(source.open(), Err(SourceError::AlreadyOpen(_))));
    source.release();
}

#[test]
fn release_is_idempotent_and_bounded() {
    let mut source = FrameSource::from_uri("stub://door", settings()).expect("source");
    source.open().expect("open");

    let started = Instant::now();
    source.release();
    source.release();
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(source.state(), SourceState::Stopped);
    assert!(source.get_frame().is_none());
}

#[test]
fn exhausted_stream_is_declared_failed() {
    let mut settings = settings();
    settings.max_consecutive_failures = 3;
    settings.read_backoff = Duration::from_millis(1);
    let mut source = FrameSource::from_uri("stub://clip?frames=5", settings).expect("source");
    source.open().expect("open");

    assert!(wait_until(|| source.state() == SourceState::Failed));
    let info = source.info();
    assert_eq!(info.frames_captured, 5);
    assert_eq!(info.read_failures, 3);
    source.release();
    assert_eq!(source.state(), SourceState::Failed);
}

#[test]
fn zero_capacity_buffer_is_rejected() {
    let mut settings = settings();
    settings.buffer_frames = 0;
    assert!(matches!(
        FrameSource::from_uri("stub://none", settings),
        Err(SourceError::InvalidConfig(_))
    ));
}

#[cfg(not(feature = "ingest-gstreamer"))]
#[test]
fn stream_uris_need_the_gstreamer_feature() {
    assert!(matches!(
        FrameSource::from_uri("rtsp://camera/stream", settings()),
        Err(SourceError::Unavailable { .. })
    ));
}
