#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// Class labels of the COCO dataset, in model output order.
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

const DEFAULT_INPUT_SIZE: u32 = 640;

/// Scores below this never enter non-maximum suppression. This is a fixed
/// candidate floor, not the operator's confidence threshold.
const CANDIDATE_FLOOR: f32 = 0.05;

const NMS_IOU: f32 = 0.45;

/// YOLOv8-style ONNX object detector running on tract.
///
/// Expects one input `[1, 3, H, W]` (RGB, 0..1) and one output
/// `[1, 4 + classes, anchors]` holding `cx, cy, w, h` in input pixels followed by
/// per-class scores. Transposed `[1, anchors, 4 + classes]` outputs are accepted.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_width: u32,
    input_height: u32,
}

impl TractBackend {
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        Self::with_input_size(model_path, DEFAULT_INPUT_SIZE, DEFAULT_INPUT_SIZE)
    }

    /// Load an ONNX model from disk and prepare it for inference.
    pub fn with_input_size<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_width: width,
            input_height: height,
        })
    }

    /// Nearest-neighbour resize into a normalized NCHW tensor.
    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if !frame.is_rgb24() || frame.width == 0 || frame.height == 0 {
            return Err(anyhow!(
                "frame {} is not packed RGB24 ({}x{}, {} bytes)",
                frame.sequence,
                frame.width,
                frame.height,
                frame.byte_len()
            ));
        }

        let pixels = frame.pixels();
        let src_w = frame.width as usize;
        let src_h = frame.height as usize;
        let dst_w = self.input_width as usize;
        let dst_h = self.input_height as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, dst_h, dst_w), |(_, c, y, x)| {
            let sx = (x * src_w / dst_w).min(src_w - 1);
            let sy = (y * src_h / dst_h).min(src_h - 1);
            pixels[(sy * src_w + sx) * 3 + c] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not rank 3")?;
        let view = if view.shape()[1] > view.shape()[2] {
            view.permuted_axes([0, 2, 1])
        } else {
            view
        };

        let channels = view.shape()[1];
        let anchors = view.shape()[2];
        if channels < 5 {
            return Err(anyhow!("model output has {} channels, need at least 5", channels));
        }

        let scale_x = frame.width as f32 / self.input_width as f32;
        let scale_y = frame.height as f32 / self.input_height as f32;
        let max_x = frame.width as f32;
        let max_y = frame.height as f32;

        let mut candidates = Vec::new();
        for a in 0..anchors {
            let (class_id, score) = (4..channels)
                .map(|c| (c - 4, view[[0, c, a]]))
                .fold((0, f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });
            if !score.is_finite() || score < CANDIDATE_FLOOR {
                continue;
            }
            let (cx, cy, w, h) = (
                view[[0, 0, a]],
                view[[0, 1, a]],
                view[[0, 2, a]],
                view[[0, 3, a]],
            );
            let bbox = BoundingBox::new(
                ((cx - w / 2.0) * scale_x).clamp(0.0, max_x) as i32,
                ((cy - h / 2.0) * scale_y).clamp(0.0, max_y) as i32,
                ((cx + w / 2.0) * scale_x).clamp(0.0, max_x) as i32,
                ((cy + h / 2.0) * scale_y).clamp(0.0, max_y) as i32,
            );
            let class_name = COCO_CLASSES
                .get(class_id)
                .map(|name| name.to_string())
                .unwrap_or_else(|| format!("class_{}", class_id));
            candidates.push(Detection {
                class_name,
                confidence: score.min(1.0),
                bbox,
                class_id: class_id as u32,
            });
        }

        Ok(non_maximum_suppression(candidates, NMS_IOU))
    }
}

/// Per-class greedy NMS, highest confidence first.
fn non_maximum_suppression(mut candidates: Vec<Detection>, iou_limit: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::new();
    for candidate in candidates {
        let overlaps = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou_limit
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        let width = self.input_width;
        let height = self.input_height;
        let blank = Frame::new(vec![0u8; (width * height * 3) as usize], width, height, 0);
        self.detect(&blank).map(|_| ())
    }
}
