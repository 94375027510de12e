//! Threaded frame acquisition.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{create_backend, ActiveFormat, CaptureBackend, CaptureSettings};
use crate::error::SourceError;
use crate::frame::{Frame, RingBuffer, DEFAULT_BUFFER_FRAMES};

/// Log the first read failure of a streak and then every Nth.
const READ_FAILURE_LOG_EVERY: u64 = 50;

/// Upper bound on a single backoff sleep, so a stop request is observed promptly.
const STOP_POLL_SLICE: Duration = Duration::from_millis(10);

/// Acquisition parameters for a `FrameSource`.
#[derive(Clone, Debug)]
pub struct SourceSettings {
    pub capture: CaptureSettings,
    /// Ring buffer capacity in frames.
    pub buffer_frames: usize,
    /// Consecutive read failures after which the source is declared dead.
    /// Zero retries forever.
    pub max_consecutive_failures: u64,
    /// Pause after a failed read.
    pub read_backoff: Duration,
    /// How long `release()` waits for the acquisition thread to exit.
    pub release_timeout: Duration,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            capture: CaptureSettings::default(),
            buffer_frames: DEFAULT_BUFFER_FRAMES,
            max_consecutive_failures: 100,
            read_backoff: Duration::from_millis(50),
            release_timeout: Duration::from_secs(2),
        }
    }
}

/// Lifecycle of a `FrameSource`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    /// Constructed, never opened.
    Idle,
    /// Acquisition thread running.
    Running,
    /// Released by the caller.
    Stopped,
    /// Acquisition gave up after too many consecutive read failures.
    Failed,
}

impl SourceState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SourceState::Running,
            2 => SourceState::Stopped,
            3 => SourceState::Failed,
            _ => SourceState::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SourceState::Idle => 0,
            SourceState::Running => 1,
            SourceState::Stopped => 2,
            SourceState::Failed => 3,
        }
    }
}

/// Read-only diagnostics for a `FrameSource`.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct SourceInfo {
    pub uri: String,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub frames_captured: u64,
    pub buffer_depth: usize,
    /// Pixel bytes currently held by the ring buffer.
    pub buffer_bytes: usize,
    pub read_failures: u64,
    pub consecutive_failures: u64,
    pub state: SourceState,
}

/// State shared between the owner and the acquisition thread.
struct CaptureShared {
    stop: AtomicBool,
    state: AtomicU8,
    frames_captured: AtomicU64,
    read_failures: AtomicU64,
    consecutive_failures: AtomicU64,
    format: OnceLock<ActiveFormat>,
}

impl CaptureShared {
    fn new() -> Self {
        Self {
            stop: AtomicBool::new(false),
            state: AtomicU8::new(SourceState::Idle.as_u8()),
            frames_captured: AtomicU64::new(0),
            read_failures: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            format: OnceLock::new(),
        }
    }

    fn state(&self) -> SourceState {
        SourceState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: SourceState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    /// Move Running -> `next`, leaving any other state untouched.
    fn leave_running(&self, next: SourceState) {
        let _ = self.state.compare_exchange(
            SourceState::Running.as_u8(),
            next.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

struct Worker {
    join: JoinHandle<()>,
    /// Disconnects when the acquisition thread exits (normally or by panic).
    exited: mpsc::Receiver<()>,
}

/// A live video source backed by a dedicated acquisition thread.
pub struct FrameSource {
    uri: String,
    settings: SourceSettings,
    backend: Option<Box<dyn CaptureBackend>>,
    buffer: Arc<RingBuffer>,
    shared: Arc<CaptureShared>,
    worker: Option<Worker>,
}

impl FrameSource {
    /// Wrap an already constructed backend.
    pub fn new(
        backend: Box<dyn CaptureBackend>,
        settings: SourceSettings,
    ) -> Result<Self, SourceError> {
        let buffer = Arc::new(RingBuffer::new(settings.buffer_frames)?);
        Ok(Self {
            uri: backend.describe(),
            settings,
            backend: Some(backend),
            buffer,
            shared: Arc::new(CaptureShared::new()),
            worker: None,
        })
    }

    /// Resolve the backend for `uri` (see `ingest::create_backend`).
    pub fn from_uri(uri: &str, settings: SourceSettings) -> Result<Self, SourceError> {
        Self::new(create_backend(uri)?, settings)
    }

    /// Open the underlying source and start the acquisition thread.
    pub fn open(&mut self) -> Result<(), SourceError> {
        if self.worker.is_some() || self.shared.state() != SourceState::Idle {
            return Err(SourceError::AlreadyOpen(self.uri.clone()));
        }
        let mut backend = self
            .backend
            .take()
            .ok_or_else(|| SourceError::AlreadyOpen(self.uri.clone()))?;

        let format = match backend.open(&self.settings.capture) {
            Ok(format) => format,
            Err(err) => {
                log::error!("FrameSource: failed to open {}: {:#}", self.uri, err);
                self.backend = Some(backend);
                return Err(SourceError::unavailable(&self.uri, format!("{:#}", err)));
            }
        };
        if format.width != self.settings.capture.width
            || format.height != self.settings.capture.height
        {
            log::warn!(
                "FrameSource: {} delivers {}x{} (requested {}x{})",
                self.uri,
                format.width,
                format.height,
                self.settings.capture.width,
                self.settings.capture.height
            );
        }
        let _ = self.shared.format.set(format);
        self.shared.set_state(SourceState::Running);

        let (exit_tx, exit_rx) = mpsc::channel();
        let buffer = self.buffer.clone();
        let shared = self.shared.clone();
        let settings = self.settings.clone();
        let spawned = thread::Builder::new()
            .name("watchpost-capture".into())
            .spawn(move || {
                let _exit_guard = exit_tx;
                acquisition_loop(backend, &buffer, &shared, &settings);
            });
        let join = match spawned {
            Ok(join) => join,
            Err(err) => {
                self.shared.set_state(SourceState::Failed);
                return Err(SourceError::unavailable(
                    &self.uri,
                    format!("spawn acquisition thread: {}", err),
                ));
            }
        };
        self.worker = Some(Worker {
            join,
            exited: exit_rx,
        });

        log::info!(
            "FrameSource: opened {} ({}x{} @ {:.1} fps, buffer {} frames)",
            self.uri,
            format.width,
            format.height,
            format.fps,
            self.buffer.capacity()
        );
        Ok(())
    }

    /// Latest buffered frame, without blocking.
    ///
    /// Returns `None` when nothing has been captured yet or the source is not running.
    pub fn get_frame(&self) -> Option<Frame> {
        if self.shared.state() != SourceState::Running {
            return None;
        }
        self.buffer.latest()
    }

    /// All buffered frames, oldest first.
    pub fn snapshot(&self) -> Vec<Frame> {
        self.buffer.snapshot()
    }

    pub fn state(&self) -> SourceState {
        self.shared.state()
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn info(&self) -> SourceInfo {
        let (fps, width, height) = match self.shared.format.get() {
            Some(format) => (format.fps, format.width, format.height),
            None => (0.0, 0, 0),
        };
        SourceInfo {
            uri: self.uri.clone(),
            fps,
            width,
            height,
            frames_captured: self.shared.frames_captured.load(Ordering::Relaxed),
            buffer_depth: self.buffer.len(),
            buffer_bytes: self.buffer.memory_bytes(),
            read_failures: self.shared.read_failures.load(Ordering::Relaxed),
            consecutive_failures: self.shared.consecutive_failures.load(Ordering::Relaxed),
            state: self.shared.state(),
        }
    }

    /// Stop the acquisition thread and release the underlying source.
    ///
    /// Waits at most `release_timeout`. A thread stuck inside a backend read is
    /// detached rather than joined; it drops the backend once the read returns.
    /// Calling this more than once is a no-op.
    pub fn release(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        let Some(worker) = self.worker.take() else {
            if self.shared.state() == SourceState::Idle {
                self.shared.set_state(SourceState::Stopped);
            }
            return;
        };

        match worker.exited.recv_timeout(self.settings.release_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.join.join().is_err() {
                    log::error!("FrameSource: acquisition thread for {} panicked", self.uri);
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "FrameSource: acquisition thread for {} did not exit within {:?}; detaching",
                    self.uri,
                    self.settings.release_timeout
                );
            }
        }
        self.shared.leave_running(SourceState::Stopped);
        log::info!("FrameSource: released {}", self.uri);
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.release();
    }
}

fn acquisition_loop(
    mut backend: Box<dyn CaptureBackend>,
    buffer: &RingBuffer,
    shared: &CaptureShared,
    settings: &SourceSettings,
) {
    let uri = backend.describe();
    let mut sequence = 0u64;

    while !shared.stop_requested() {
        match backend.read_frame() {
            Ok(image) => {
                if shared.stop_requested() {
                    break;
                }
                sequence += 1;
                buffer.push(Frame::from_capture(image, sequence));
                shared.frames_captured.fetch_add(1, Ordering::Relaxed);
                shared.consecutive_failures.store(0, Ordering::Relaxed);
            }
            Err(err) => {
                let total = shared.read_failures.fetch_add(1, Ordering::Relaxed) + 1;
                let streak = shared.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if streak == 1 || total % READ_FAILURE_LOG_EVERY == 0 {
                    log::warn!(
                        "FrameSource: read from {} failed ({} total): {:#}",
                        uri,
                        total,
                        err
                    );
                }
                if settings.max_consecutive_failures > 0
                    && streak >= settings.max_consecutive_failures
                {
                    log::error!(
                        "FrameSource: {} failed {} consecutive reads; giving up",
                        uri,
                        streak
                    );
                    shared.leave_running(SourceState::Failed);
                    break;
                }
                sleep_unless_stopped(shared, settings.read_backoff);
            }
        }
    }

    drop(backend);
    log::debug!("FrameSource: acquisition loop for {} exited", uri);
}

fn sleep_unless_stopped(shared: &CaptureShared, duration: Duration) {
    let deadline = Instant::now() + duration;
    while !shared.stop_requested() {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(STOP_POLL_SLICE));
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
