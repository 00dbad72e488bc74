//! Spatial detectors over rally frames.
//!
//! | Detector | Labels | Per frame |
//! |----------|--------|-----------|
//! | [`BallDetector`] | ball | at most one box |
//! | [`ActionDetector`] | spike, block, set, receive, serve | ranked boxes |
//! | [`PlayerDetector`] | player | ranked boxes, optionally court-filtered |
//! | [`PoseDetector`] | player | keypoint sets |
//!
//! All detectors take a batch of frames and return one list per frame, in
//! input order. A failed model call fails the whole batch.

mod action;
mod ball;
mod player;
mod pose;

pub use action::ActionDetector;
pub use ball::BallDetector;
pub use player::PlayerDetector;
pub use pose::PoseDetector;

use async_trait::async_trait;
use std::path::PathBuf;
use vball_media::Frame;
use vball_models::{BoundingBox, KeypointSet, ObjectLabel};

use crate::error::{VisionError, VisionResult};
use crate::preprocess::detector_batch;
use crate::session::{OnnxModel, OutputTensor};
use crate::yolo::{decode, non_maximum_suppression, Candidate, FrameScale, HeadLayout};

/// Box detector over frames.
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    /// Detect boxes in every frame, skipping labels listed in `exclude`.
    async fn detect_batch(
        &self,
        frames: &[Frame],
        exclude: &[ObjectLabel],
    ) -> VisionResult<Vec<Vec<BoundingBox>>>;

    /// Detect boxes in one frame.
    async fn detect(&self, frame: &Frame, exclude: &[ObjectLabel]) -> VisionResult<Vec<BoundingBox>> {
        let mut batch = self
            .detect_batch(std::slice::from_ref(frame), exclude)
            .await?;
        Ok(batch.pop().unwrap_or_default())
    }

    /// Detector name for logging.
    fn name(&self) -> &'static str;
}

/// Keypoint detector over frames.
#[async_trait]
pub trait KeypointDetector: Send + Sync {
    /// Detect people's keypoints in every frame.
    async fn detect_batch(&self, frames: &[Frame]) -> VisionResult<Vec<Vec<KeypointSet>>>;

    /// Detect keypoints in one frame.
    async fn detect(&self, frame: &Frame) -> VisionResult<Vec<KeypointSet>> {
        let mut batch = self.detect_batch(std::slice::from_ref(frame)).await?;
        Ok(batch.pop().unwrap_or_default())
    }

    /// Detector name for logging.
    fn name(&self) -> &'static str;
}

/// Configuration for a YOLO detector.
#[derive(Debug, Clone)]
pub struct YoloConfig {
    /// Path to ONNX model file
    pub weights_path: PathBuf,
    /// Confidence threshold for detections
    pub confidence_threshold: f32,
    /// IoU threshold for NMS
    pub nms_threshold: f32,
    /// Input image size (model expects square input)
    pub input_size: u32,
    /// Label of each model class, in class-id order
    pub classes: Vec<ObjectLabel>,
}

impl YoloConfig {
    pub fn new(weights_path: impl Into<PathBuf>, classes: Vec<ObjectLabel>) -> Self {
        Self {
            weights_path: weights_path.into(),
            confidence_threshold: 0.25,
            nms_threshold: 0.45,
            input_size: 640,
            classes,
        }
    }

    fn validate(&self) -> VisionResult<()> {
        if self.classes.is_empty() {
            return Err(VisionError::invalid_config(format!(
                "{}: no classes configured",
                self.weights_path.display()
            )));
        }
        if self.input_size == 0 {
            return Err(VisionError::invalid_config("input_size must be positive"));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) || !(0.0..=1.0).contains(&self.nms_threshold) {
            return Err(VisionError::invalid_config("thresholds must lie in [0, 1]"));
        }
        Ok(())
    }
}

/// Shared YOLO inference: preprocessing, one session call per batch,
/// decoding and NMS.
pub(crate) struct YoloEngine {
    model: OnnxModel,
    config: YoloConfig,
    layout: HeadLayout,
}

impl YoloEngine {
    pub(crate) fn load(config: YoloConfig, extra: usize) -> VisionResult<Self> {
        config.validate()?;
        let layout = HeadLayout {
            num_classes: config.classes.len(),
            extra,
        };
        let model = OnnxModel::load(&config.weights_path)?;
        Ok(Self {
            model,
            config,
            layout,
        })
    }

    pub(crate) fn config(&self) -> &YoloConfig {
        &self.config
    }

    /// Run the model and return the requested outputs.
    pub(crate) fn infer(&self, frames: &[Frame], outputs: &[&str]) -> VisionResult<Vec<OutputTensor>> {
        let (shape, data) = detector_batch(frames, self.config.input_size)?;
        self.model.run(shape, data, outputs)
    }

    /// Thresholded, suppressed candidates for each frame of the batch.
    pub(crate) fn candidates(
        &self,
        output: &OutputTensor,
        expected: usize,
    ) -> VisionResult<Vec<Vec<Candidate>>> {
        let decoded = decode(output, self.layout, self.config.confidence_threshold)?;
        if decoded.len() != expected {
            return Err(VisionError::detection_failed(format!(
                "model returned {} results for {} frames",
                decoded.len(),
                expected
            )));
        }
        Ok(decoded
            .into_iter()
            .map(|c| non_maximum_suppression(c, self.config.nms_threshold))
            .collect())
    }

    pub(crate) fn label(&self, candidate: &Candidate) -> Option<ObjectLabel> {
        self.config.classes.get(candidate.class_id).copied()
    }

    pub(crate) fn scale(&self, frame: &Frame) -> FrameScale {
        FrameScale::new(frame.width(), frame.height(), self.config.input_size)
    }

    /// Candidate corners mapped to a clamped frame box.
    pub(crate) fn to_box(
        &self,
        frame: &Frame,
        corners: (f32, f32, f32, f32),
        label: ObjectLabel,
        confidence: f32,
    ) -> BoundingBox {
        let scale = self.scale(frame);
        BoundingBox::from_xyxy(
            scale.x(corners.0),
            scale.y(corners.1),
            scale.x(corners.2),
            scale.y(corners.3),
            label,
            confidence,
        )
        .clamp(frame.width(), frame.height())
    }
}

pub(crate) fn corners(c: &Candidate) -> (f32, f32, f32, f32) {
    (c.x1, c.y1, c.x2, c.y2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = YoloConfig::new("models/ball.onnx", vec![ObjectLabel::Ball]);
        assert_eq!(config.input_size, 640);
        assert!((config.confidence_threshold - 0.25).abs() < 1e-6);
        assert!((config.nms_threshold - 0.45).abs() < 1e-6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_empty_classes() {
        let config = YoloConfig::new("models/ball.onnx", Vec::new());
        assert!(matches!(config.validate(), Err(VisionError::InvalidConfig(_))));
    }

    #[test]
    fn test_config_rejects_bad_threshold() {
        let mut config = YoloConfig::new("models/ball.onnx", vec![ObjectLabel::Ball]);
        config.confidence_threshold = 1.5;
        assert!(config.validate().is_err());
    }
}
