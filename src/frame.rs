//! Frame snapshots and the capture hand-off buffer.
//!
//! - `Frame`: immutable RGB24 snapshot with a sequence number and capture time.
//! - `RingBuffer`: bounded, overwrite-oldest buffer shared between the acquisition
//!   thread (single producer) and any number of consumers.
//!
//! Pixel data lives behind an `Arc<[u8]>`. Cloning a frame out of the buffer never
//! copies pixels and never allows mutation, so a consumer can hold a frame for as
//! long as it likes without blocking or tearing the live feed.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Instant, SystemTime};

use crate::error::SourceError;

/// Default ring buffer capacity. At 30 fps this is roughly two seconds of video.
pub const DEFAULT_BUFFER_FRAMES: usize = 64;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Decoded image handed over by a capture backend, before it is stamped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapturedImage {
    /// Packed RGB24 pixels, row-major, no padding.
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl CapturedImage {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            pixels,
            width,
            height,
        }
    }
}

/// One captured image. Immutable once created.
#[derive(Clone)]
pub struct Frame {
    data: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    /// Monotonic per-source sequence number, starting at 1.
    pub sequence: u64,
    /// Wall-clock capture time.
    pub captured_at: SystemTime,
    capture_instant: Instant,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            data: pixels.into(),
            width,
            height,
            sequence,
            captured_at: SystemTime::now(),
            capture_instant: Instant::now(),
        }
    }

    /// Stamp a backend image with its sequence number and capture time.
    pub fn from_capture(image: CapturedImage, sequence: u64) -> Self {
        Self::new(image.pixels, image.width, image.height, sequence)
    }

    /// Packed RGB24 pixel data.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// True when the pixel buffer length matches `width * height * 3`.
    pub fn is_rgb24(&self) -> bool {
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(3))
            .is_some_and(|expected| expected == self.data.len())
    }
}

// Pixel content is never written to logs.
impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// RingBuffer
// ----------------------------------------------------------------------------

/// Fixed-capacity frame buffer with an overwrite-oldest policy.
///
/// The mutex is held only for the duration of a push or read. A push never
/// waits for consumers: when the buffer is full the oldest frame is evicted.
pub struct RingBuffer {
    frames: Mutex<VecDeque<Frame>>,
    capacity: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Result<Self, SourceError> {
        if capacity == 0 {
            return Err(SourceError::InvalidConfig(
                "ring buffer capacity must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        })
    }

    /// Push a frame, evicting the oldest entry when at capacity.
    pub fn push(&self, frame: Frame) {
        let mut frames = self.lock();
        while frames.len() >= self.capacity {
            frames.pop_front();
        }
        frames.push_back(frame);
    }

    /// Most recently pushed frame, if any.
    pub fn latest(&self) -> Option<Frame> {
        self.lock().back().cloned()
    }

    /// All buffered frames, oldest first.
    pub fn snapshot(&self) -> Vec<Frame> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Approximate pixel memory held by the buffer.
    pub fn memory_bytes(&self) -> usize {
        self.lock().iter().map(Frame::byte_len).sum()
    }

    // A panic while holding the lock cannot leave the deque half-updated, so a
    // poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, VecDeque<Frame>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
