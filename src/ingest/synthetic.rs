//! Synthetic frame source (`stub://`) for tests and demos.
//!
//! Renders a static gradient background with a bright block that drifts across
//! the scene, paced to the requested frame rate. A `frames=N` query parameter
//! makes the stream finite: reads after the Nth frame fail like an exhausted file.

use anyhow::{anyhow, Result};
use std::thread;
use std::time::{Duration, Instant};

use super::{ActiveFormat, CaptureBackend, CaptureSettings};
use crate::frame::CapturedImage;

/// Block edge relative to frame height, so the motion detector sees it at any resolution.
const BLOCK_HEIGHT_DIVISOR: u32 = 4;
const MIN_BLOCK_SIZE: u32 = 4;

pub struct SyntheticBackend {
    uri: String,
    frame_limit: Option<u64>,
    settings: Option<CaptureSettings>,
    frame_count: u64,
    next_due: Option<Instant>,
}

impl SyntheticBackend {
    pub fn new(name: &str) -> Self {
        Self {
            uri: format!("stub://{}", name),
            frame_limit: None,
            settings: None,
            frame_count: 0,
            next_due: None,
        }
    }

    /// Parse `stub://<name>[?frames=N]`.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("synthetic source uri must start with stub://"))?;
        let (name, query) = match rest.split_once('?') {
            Some((name, query)) => (name, Some(query)),
            None => (rest, None),
        };
        let mut backend = Self::new(name);
        backend.uri = uri.to_string();
        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            match pair.split_once('=') {
                Some(("frames", value)) => {
                    let limit: u64 = value
                        .parse()
                        .map_err(|_| anyhow!("frames must be an integer, got {:?}", value))?;
                    backend.frame_limit = Some(limit);
                }
                _ => return Err(anyhow!("unsupported synthetic source option {:?}", pair)),
            }
        }
        Ok(backend)
    }

    /// Stop producing frames after `limit` reads.
    pub fn with_frame_limit(mut self, limit: u64) -> Self {
        self.frame_limit = Some(limit);
        self
    }

    fn pace(&mut self, fps: u32) {
        if fps == 0 {
            return;
        }
        let interval = Duration::from_secs_f64(1.0 / fps as f64);
        let now = Instant::now();
        match self.next_due {
            Some(due) if due > now => {
                thread::sleep(due - now);
                self.next_due = Some(due + interval);
            }
            // Running late (or first frame): restart the schedule from now.
            _ => self.next_due = Some(now + interval),
        }
    }

    fn render(&self, width: u32, height: u32) -> Vec<u8> {
        let w = width as usize;
        let h = height as usize;
        let mut pixels = vec![0u8; w * h * 3];

        let block_size = (height / BLOCK_HEIGHT_DIVISOR).max(MIN_BLOCK_SIZE).min(width);
        let span = width.saturating_sub(block_size).max(1) as u64;
        let block_x = (self.frame_count * 4 % span) as usize;
        let block_y = (h.saturating_sub(block_size as usize)) / 2;
        let block = block_size as usize;

        for y in 0..h {
            for x in 0..w {
                let offset = (y * w + x) * 3;
                let inside =
                    x >= block_x && x < block_x + block && y >= block_y && y < block_y + block;
                if inside {
                    pixels[offset..offset + 3].copy_from_slice(&[250, 250, 250]);
                } else {
                    let shade = ((x * 64) / w.max(1)) as u8 + ((y * 32) / h.max(1)) as u8;
                    pixels[offset..offset + 3].copy_from_slice(&[shade, shade / 2, 40]);
                }
            }
        }
        pixels
    }
}

impl CaptureBackend for SyntheticBackend {
    fn describe(&self) -> String {
        self.uri.clone()
    }

    fn open(&mut self, settings: &CaptureSettings) -> Result<ActiveFormat> {
        if settings.width == 0 || settings.height == 0 {
            return Err(anyhow!(
                "synthetic source needs a non-zero resolution, got {}x{}",
                settings.width,
                settings.height
            ));
        }
        self.settings = Some(*settings);
        log::info!("SyntheticBackend: connected to {}", self.uri);
        Ok(ActiveFormat {
            width: settings.width,
            height: settings.height,
            fps: settings.fps as f64,
        })
    }

    fn read_frame(&mut self) -> Result<CapturedImage> {
        let settings = self
            .settings
            .ok_or_else(|| anyhow!("synthetic source not opened"))?;
        if self.frame_limit.is_some_and(|limit| self.frame_count >= limit) {
            // Keep failed reads from spinning while the caller decides what to do.
            self.pace(settings.fps);
            return Err(anyhow!("synthetic stream {} exhausted", self.uri));
        }
        self.pace(settings.fps);
        self.frame_count += 1;
        let pixels = self.render(settings.width, settings.height);
        Ok(CapturedImage::new(pixels, settings.width, settings.height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> CaptureSettings {
        CaptureSettings {
            width: 64,
            height: 48,
            fps: 0,
        }
    }

    #[test]
    fn produces_rgb_frames_of_requested_size() -> Result<()> {
        let mut backend = SyntheticBackend::new("test");
        let format = backend.open(&settings())?;
        assert_eq!((format.width, format.height), (64, 48));

        let image = backend.read_frame()?;
        assert_eq!(image.pixels.len(), 64 * 48 * 3);
        Ok(())
    }

    #[test]
    fn consecutive_frames_differ() -> Result<()> {
        let mut backend = SyntheticBackend::new("test");
        backend.open(&settings())?;
        let first = backend.read_frame()?;
        let second = backend.read_frame()?;
        assert_ne!(first.pixels, second.pixels);
        Ok(())
    }

    #[test]
    fn frame_limit_exhausts_stream() -> Result<()> {
        let mut backend = SyntheticBackend::from_uri("stub://short?frames=2")?;
        backend.open(&settings())?;
        backend.read_frame()?;
        backend.read_frame()?;
        assert!(backend.read_frame().is_err());
        Ok(())
    }

    #[test]
    fn rejects_unknown_options() {
        assert!(SyntheticBackend::from_uri("stub://x?color=red").is_err());
        assert!(SyntheticBackend::from_uri("stub://x?frames=many").is_err());
    }

    #[test]
    fn read_before_open_fails() {
        let mut backend = SyntheticBackend::new("test");
        assert!(backend.read_frame().is_err());
    }
}
