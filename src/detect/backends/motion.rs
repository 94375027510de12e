use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// Class name reported for motion regions.
pub const MOTION_CLASS: &str = "motion";

const DEFAULT_CELL_SIZE: u32 = 8;
const DEFAULT_LUMA_DELTA: f32 = 25.0;
const DEFAULT_MIN_AREA: u32 = 500;

/// Frame-differencing detector used when no object model is available.
///
/// Each frame is reduced to a grid of mean-luma cells and compared with the
/// previous frame. Changed cells are merged into 4-connected regions; every
/// region covering at least `min_area` pixels becomes a `motion` detection with
/// confidence 1.0. The first frame (and any resolution change) only primes the
/// reference and yields nothing.
pub struct MotionBackend {
    cell_size: u32,
    luma_delta: f32,
    min_area: u32,
    previous: Option<LumaGrid>,
}

impl Default for MotionBackend {
    fn default() -> Self {
        Self {
            cell_size: DEFAULT_CELL_SIZE,
            luma_delta: DEFAULT_LUMA_DELTA,
            min_area: DEFAULT_MIN_AREA,
            previous: None,
        }
    }
}

impl MotionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Minimum region size in pixels.
    pub fn with_min_area(mut self, min_area: u32) -> Self {
        self.min_area = min_area;
        self
    }

    pub fn with_cell_size(mut self, cell_size: u32) -> Self {
        self.cell_size = cell_size.max(1);
        self
    }

    fn regions(&self, previous: &LumaGrid, current: &LumaGrid) -> Vec<BoundingBox> {
        let changed: Vec<bool> = previous
            .means
            .iter()
            .zip(&current.means)
            .map(|(a, b)| (a - b).abs() > self.luma_delta)
            .collect();

        let cols = current.cols;
        let rows = current.rows;
        let mut visited = vec![false; changed.len()];
        let mut boxes = Vec::new();
        let mut stack = Vec::new();

        for start in 0..changed.len() {
            if !changed[start] || visited[start] {
                continue;
            }
            visited[start] = true;
            stack.push(start);
            let (mut min_c, mut max_c) = (start % cols, start % cols);
            let (mut min_r, mut max_r) = (start / cols, start / cols);
            let mut cells = 0u64;

            while let Some(index) = stack.pop() {
                cells += 1;
                let (c, r) = (index % cols, index / cols);
                min_c = min_c.min(c);
                max_c = max_c.max(c);
                min_r = min_r.min(r);
                max_r = max_r.max(r);

                let mut neighbours = Vec::with_capacity(4);
                if c > 0 {
                    neighbours.push(index - 1);
                }
                if c + 1 < cols {
                    neighbours.push(index + 1);
                }
                if r > 0 {
                    neighbours.push(index - cols);
                }
                if r + 1 < rows {
                    neighbours.push(index + cols);
                }
                for next in neighbours {
                    if changed[next] && !visited[next] {
                        visited[next] = true;
                        stack.push(next);
                    }
                }
            }

            let cell = self.cell_size as u64;
            if cells * cell * cell < self.min_area as u64 {
                continue;
            }
            let cell = self.cell_size as usize;
            boxes.push(BoundingBox::new(
                (min_c * cell) as i32,
                (min_r * cell) as i32,
                ((max_c + 1) * cell).min(current.width) as i32,
                ((max_r + 1) * cell).min(current.height) as i32,
            ));
        }
        boxes
    }
}

impl DetectorBackend for MotionBackend {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        if !frame.is_rgb24() {
            return Err(anyhow!(
                "frame {} is not packed RGB24 ({}x{}, {} bytes)",
                frame.sequence,
                frame.width,
                frame.height,
                frame.byte_len()
            ));
        }
        let current = LumaGrid::from_frame(frame, self.cell_size);
        let previous = self.previous.replace(current);
        let (Some(previous), Some(current)) = (previous, self.previous.as_ref()) else {
            return Ok(Vec::new());
        };
        if previous.cols != current.cols || previous.rows != current.rows {
            return Ok(Vec::new());
        }

        Ok(self
            .regions(&previous, current)
            .into_iter()
            .map(|bbox| Detection::new(MOTION_CLASS, 1.0, bbox, 0))
            .collect())
    }
}

/// Mean luma per `cell_size` square.
struct LumaGrid {
    cols: usize,
    rows: usize,
    width: usize,
    height: usize,
    means: Vec<f32>,
}

impl LumaGrid {
    fn from_frame(frame: &Frame, cell_size: u32) -> Self {
        let width = frame.width as usize;
        let height = frame.height as usize;
        let cell = cell_size as usize;
        let cols = width.div_ceil(cell);
        let rows = height.div_ceil(cell);
        let mut sums = vec![0f32; cols * rows];
        let mut counts = vec![0u32; cols * rows];

        for (i, px) in frame.pixels().chunks_exact(3).enumerate() {
            let (x, y) = (i % width, i / width);
            let luma = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
            let index = (y / cell) * cols + x / cell;
            sums[index] += luma;
            counts[index] += 1;
        }

        let means = sums
            .iter()
            .zip(&counts)
            .map(|(sum, &count)| if count == 0 { 0.0 } else { sum / count as f32 })
            .collect();
        Self {
            cols,
            rows,
            width,
            height,
            means,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(size: u32, sequence: u64) -> Frame {
        Frame::new(vec![0u8; (size * size * 3) as usize], size, size, sequence)
    }

    fn with_square(size: u32, from: u32, to: u32, sequence: u64) -> Frame {
        let mut pixels = vec![0u8; (size * size * 3) as usize];
        for y in from..to {
            for x in from..to {
                let offset = ((y * size + x) * 3) as usize;
                pixels[offset..offset + 3].copy_from_slice(&[255, 255, 255]);
            }
        }
        Frame::new(pixels, size, size, sequence)
    }

    #[test]
    fn first_frame_only_primes_reference() -> Result<()> {
        let mut backend = MotionBackend::new();
        assert!(backend.detect(&solid(64, 1))?.is_empty());
        Ok(())
    }

    #[test]
    fn static_scene_has_no_motion() -> Result<()> {
        let mut backend = MotionBackend::new();
        backend.detect(&solid(64, 1))?;
        assert!(backend.detect(&solid(64, 2))?.is_empty());
        Ok(())
    }

    #[test]
    fn changed_region_is_reported() -> Result<()> {
        let mut backend = MotionBackend::new();
        backend.detect(&solid(64, 1))?;
        let detections = backend.detect(&with_square(64, 16, 48, 2))?;

        assert_eq!(detections.len(), 1);
        let det = &detections[0];
        assert_eq!(det.class_name, MOTION_CLASS);
        assert_eq!(det.confidence, 1.0);
        assert_eq!(det.bbox, BoundingBox::new(16, 16, 48, 48));
        Ok(())
    }

    #[test]
    fn small_changes_are_ignored() -> Result<()> {
        let mut backend = MotionBackend::new();
        backend.detect(&solid(64, 1))?;
        // 8x8 = 64 px, well under the 500 px minimum.
        assert!(backend.detect(&with_square(64, 0, 8, 2))?.is_empty());
        Ok(())
    }

    #[test]
    fn finer_grid_and_lower_minimum_catch_small_changes() -> Result<()> {
        let mut backend = MotionBackend::new().with_cell_size(4).with_min_area(32);
        backend.detect(&solid(64, 1))?;
        let detections = backend.detect(&with_square(64, 0, 8, 2))?;
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bbox, BoundingBox::new(0, 0, 8, 8));
        Ok(())
    }

    #[test]
    fn resolution_change_resets_reference() -> Result<()> {
        let mut backend = MotionBackend::new();
        backend.detect(&solid(64, 1))?;
        assert!(backend.detect(&with_square(32, 0, 32, 2))?.is_empty());
        Ok(())
    }

    #[test]
    fn malformed_frame_is_an_error() {
        let mut backend = MotionBackend::new();
        let frame = Frame::new(vec![0u8; 5], 2, 2, 1);
        assert!(backend.detect(&frame).is_err());
    }
}
