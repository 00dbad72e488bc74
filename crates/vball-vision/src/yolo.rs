//! YOLOv8 output decoding.
//!
//! Detection heads emit `[B, 4 + C + E, A]`: box centre and size, `C` class
//! scores and `E` extra features per anchor (mask coefficients or keypoints).

use ndarray::{ArrayView3, ArrayView4, Axis};

use crate::error::{VisionError, VisionResult};
use crate::session::OutputTensor;

/// Shape of one model's head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadLayout {
    pub num_classes: usize,
    pub extra: usize,
}

impl HeadLayout {
    pub fn features(&self) -> usize {
        4 + self.num_classes + self.extra
    }
}

/// A thresholded anchor, in model input coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub class_id: usize,
    pub score: f32,
    pub extra: Vec<f32>,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &Candidate) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let intersection = w * h;
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// Decode every image of a batch, keeping anchors whose best class score
/// reaches `threshold`.
pub fn decode(
    output: &OutputTensor,
    layout: HeadLayout,
    threshold: f32,
) -> VisionResult<Vec<Vec<Candidate>>> {
    if output.shape.len() != 3 || output.dim(1) != layout.features() {
        return Err(VisionError::detection_failed(format!(
            "Unexpected output shape {:?}, expected [B, {}, A]",
            output.shape,
            layout.features()
        )));
    }

    let (batch, features, anchors) = (output.dim(0), output.dim(1), output.dim(2));
    let view = ArrayView3::from_shape((batch, features, anchors), &output.data)
        .map_err(|e| VisionError::detection_failed(format!("Failed to reshape output: {}", e)))?;

    let mut decoded = Vec::with_capacity(batch);
    for image in view.axis_iter(Axis(0)) {
        // [features, anchors] -> [anchors, features]
        let rows = image.t();
        let mut candidates = Vec::new();

        for row in rows.outer_iter() {
            let mut class_id = 0;
            let mut score = f32::MIN;
            for c in 0..layout.num_classes {
                if row[4 + c] > score {
                    score = row[4 + c];
                    class_id = c;
                }
            }
            if score < threshold {
                continue;
            }

            let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
            let extra_start = 4 + layout.num_classes;
            candidates.push(Candidate {
                x1: cx - w / 2.0,
                y1: cy - h / 2.0,
                x2: cx + w / 2.0,
                y2: cy + h / 2.0,
                class_id,
                score,
                extra: (extra_start..features).map(|f| row[f]).collect(),
            });
        }
        decoded.push(candidates);
    }

    Ok(decoded)
}

/// Class-wise non-maximum suppression, highest score first.
pub fn non_maximum_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let suppressed = keep
            .iter()
            .any(|k| k.class_id == candidate.class_id && k.iou(&candidate) > iou_threshold);
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}

/// Maps model input coordinates back onto the source frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameScale {
    pub sx: f32,
    pub sy: f32,
}

impl FrameScale {
    pub fn new(frame_width: u32, frame_height: u32, input_size: u32) -> Self {
        Self {
            sx: frame_width as f32 / input_size as f32,
            sy: frame_height as f32 / input_size as f32,
        }
    }

    pub fn x(&self, x: f32) -> f32 {
        x * self.sx
    }

    pub fn y(&self, y: f32) -> f32 {
        y * self.sy
    }
}

/// Prototype masks of a segmentation head, `[B, K, Mh, Mw]`.
pub struct MaskProtos<'a> {
    view: ArrayView4<'a, f32>,
}

impl<'a> MaskProtos<'a> {
    pub fn new(output: &'a OutputTensor) -> VisionResult<Self> {
        if output.shape.len() != 4 {
            return Err(VisionError::detection_failed(format!(
                "Unexpected mask prototype shape {:?}",
                output.shape
            )));
        }
        let shape = (output.dim(0), output.dim(1), output.dim(2), output.dim(3));
        let view = ArrayView4::from_shape(shape, &output.data)
            .map_err(|e| VisionError::detection_failed(format!("Failed to reshape protos: {}", e)))?;
        Ok(Self { view })
    }

    /// Number of mask coefficients each anchor carries.
    pub fn coefficients(&self) -> usize {
        self.view.dim().1
    }

    /// Tight extent `(x1, y1, x2, y2)` of the candidate's mask, in model input
    /// coordinates. `None` when no mask pixel inside the box passes 0.5.
    pub fn mask_extent(
        &self,
        image: usize,
        candidate: &Candidate,
        input_size: u32,
    ) -> Option<(f32, f32, f32, f32)> {
        let (batch, k, mh, mw) = self.view.dim();
        if image >= batch || candidate.extra.len() != k || mh == 0 || mw == 0 {
            return None;
        }
        let protos = self.view.index_axis(Axis(0), image);

        let to_mx = mw as f32 / input_size as f32;
        let to_my = mh as f32 / input_size as f32;
        let mx1 = ((candidate.x1 * to_mx).floor().max(0.0) as usize).min(mw - 1);
        let my1 = ((candidate.y1 * to_my).floor().max(0.0) as usize).min(mh - 1);
        let mx2 = ((candidate.x2 * to_mx).ceil().max(0.0) as usize).min(mw - 1);
        let my2 = ((candidate.y2 * to_my).ceil().max(0.0) as usize).min(mh - 1);

        let mut extent: Option<(usize, usize, usize, usize)> = None;
        for my in my1..=my2 {
            for mx in mx1..=mx2 {
                let logit: f32 = candidate
                    .extra
                    .iter()
                    .enumerate()
                    .map(|(i, coeff)| coeff * protos[[i, my, mx]])
                    .sum();
                if sigmoid(logit) <= 0.5 {
                    continue;
                }
                extent = Some(match extent {
                    None => (mx, my, mx, my),
                    Some((x1, y1, x2, y2)) => (x1.min(mx), y1.min(my), x2.max(mx), y2.max(my)),
                });
            }
        }

        extent.map(|(x1, y1, x2, y2)| {
            (
                (x1 as f32 / to_mx).max(candidate.x1),
                (y1 as f32 / to_my).max(candidate.y1),
                ((x2 + 1) as f32 / to_mx).min(candidate.x2),
                ((y2 + 1) as f32 / to_my).min(candidate.y2),
            )
        })
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
