//! ONNX models for the volleyball rally scanner.
//!
//! This crate provides:
//! - A video classifier labelling frame windows as service, play or no-play
//! - YOLO detectors for the ball, player actions, players and poses
//! - Shared ONNX Runtime session handling and YOLO output decoding

pub mod classifier;
pub mod detectors;
pub mod error;
pub mod preprocess;
pub mod session;
pub mod yolo;

pub use classifier::{validate_window, ClassifierConfig, OnnxStateClassifier, StateClassifier};
pub use detectors::{
    ActionDetector, BallDetector, KeypointDetector, ObjectDetector, PlayerDetector, PoseDetector,
    YoloConfig,
};
pub use error::{VisionError, VisionResult};
pub use session::{OnnxModel, OutputTensor};

use std::sync::Arc;

/// The detectors run over every emitted rally.
///
/// Ball and action detectors are always present; player and pose detection
/// are optional.
#[derive(Clone)]
pub struct DetectorSet {
    pub ball: Arc<dyn ObjectDetector>,
    pub action: Arc<dyn ObjectDetector>,
    pub player: Option<Arc<dyn ObjectDetector>>,
    pub pose: Option<Arc<dyn KeypointDetector>>,
}

impl DetectorSet {
    pub fn new(ball: Arc<dyn ObjectDetector>, action: Arc<dyn ObjectDetector>) -> Self {
        Self {
            ball,
            action,
            player: None,
            pose: None,
        }
    }

    pub fn with_player(mut self, player: Arc<dyn ObjectDetector>) -> Self {
        self.player = Some(player);
        self
    }

    pub fn with_pose(mut self, pose: Arc<dyn KeypointDetector>) -> Self {
        self.pose = Some(pose);
        self
    }
}
