//! Alert evidence: JPEG snapshots of the frame that triggered an alert.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use crate::detect::{BoundingBox, Detection};
use crate::frame::Frame;

const DEFAULT_JPEG_QUALITY: u8 = 90;
const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: i32 = 2;

/// Persists alert frames.
pub trait FrameStore: Send {
    /// Write `frame`, outlining `detections`, into `dir`. Returns the written path.
    fn save(&self, frame: &Frame, detections: &[Detection], dir: &Path) -> Result<PathBuf>;
}

/// Writes `alert_{unix_secs}_{sequence}.jpg` files.
#[derive(Debug, Clone)]
pub struct JpegFrameStore {
    quality: u8,
}

impl Default for JpegFrameStore {
    fn default() -> Self {
        Self {
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl JpegFrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quality(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl FrameStore for JpegFrameStore {
    fn save(&self, frame: &Frame, detections: &[Detection], dir: &Path) -> Result<PathBuf> {
        let mut image = RgbImage::from_raw(frame.width, frame.height, frame.pixels().to_vec())
            .ok_or_else(|| {
                anyhow!(
                    "frame {} is not packed RGB24 ({}x{}, {} bytes)",
                    frame.sequence,
                    frame.width,
                    frame.height,
                    frame.byte_len()
                )
            })?;
        for detection in detections {
            outline(&mut image, &detection.bbox);
        }

        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create alert frame dir {}", dir.display()))?;
        let secs = frame
            .captured_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let path = dir.join(format!("alert_{}_{}.jpg", secs, frame.sequence));
        let file = File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        JpegEncoder::new_with_quality(BufWriter::new(file), self.quality)
            .encode_image(&image)
            .map_err(|err| anyhow!("JPEG encode failed for {}: {err}", path.display()))?;
        Ok(path)
    }
}

/// Draw a rectangle outline, clipped to the image.
fn outline(image: &mut RgbImage, bbox: &BoundingBox) {
    let (width, height) = (image.width() as i32, image.height() as i32);
    if width == 0 || height == 0 {
        return;
    }
    let x1 = bbox.x1.clamp(0, width - 1);
    let y1 = bbox.y1.clamp(0, height - 1);
    let x2 = bbox.x2.clamp(0, width - 1);
    let y2 = bbox.y2.clamp(0, height - 1);
    if x2 < x1 || y2 < y1 {
        return;
    }
    for t in 0..BOX_THICKNESS {
        for x in x1..=x2 {
            for y in [y1 + t, y2 - t] {
                if (y1..=y2).contains(&y) {
                    image.put_pixel(x as u32, y as u32, BOX_COLOR);
                }
            }
        }
        for y in y1..=y2 {
            for x in [x1 + t, x2 - t] {
                if (x1..=x2).contains(&x) {
                    image.put_pixel(x as u32, y as u32, BOX_COLOR);
                }
            }
        }
    }
}
