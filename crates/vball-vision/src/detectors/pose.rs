use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use vball_media::Frame;
use vball_models::{Keypoint, KeypointSet, ObjectLabel, KEYPOINT_COUNT};

use super::{corners, KeypointDetector, YoloConfig, YoloEngine};
use crate::error::VisionResult;
use crate::session::run_blocking;
use crate::yolo::{Candidate, FrameScale};

/// Values per keypoint in the head: x, y, confidence.
const KEYPOINT_STRIDE: usize = 3;

/// YOLOv8-pose person keypoint detector.
#[derive(Clone)]
pub struct PoseDetector {
    engine: Arc<YoloEngine>,
}

impl PoseDetector {
    pub fn new(config: YoloConfig) -> VisionResult<Self> {
        Ok(Self {
            engine: Arc::new(YoloEngine::load(config, KEYPOINT_COUNT * KEYPOINT_STRIDE)?),
        })
    }
}

/// Keypoints of a candidate mapped into frame pixels.
pub(crate) fn keypoints(candidate: &Candidate, scale: FrameScale) -> Vec<Keypoint> {
    candidate
        .extra
        .chunks_exact(KEYPOINT_STRIDE)
        .take(KEYPOINT_COUNT)
        .map(|k| Keypoint {
            x: scale.x(k[0]),
            y: scale.y(k[1]),
            confidence: k[2],
        })
        .collect()
}

fn detect_sync(engine: &YoloEngine, frames: &[Frame]) -> VisionResult<Vec<Vec<KeypointSet>>> {
    if frames.is_empty() {
        return Ok(Vec::new());
    }
    let outputs = engine.infer(frames, &["output0"])?;
    let per_frame = engine.candidates(&outputs[0], frames.len())?;

    let results: Vec<Vec<KeypointSet>> = frames
        .iter()
        .zip(per_frame)
        .map(|(frame, candidates)| {
            let scale = engine.scale(frame);
            let mut sets: Vec<KeypointSet> = candidates
                .iter()
                .filter(|c| engine.label(c) == Some(ObjectLabel::Player))
                .map(|c| KeypointSet {
                    keypoints: keypoints(c, scale),
                    bbox: engine
                        .to_box(frame, corners(c), ObjectLabel::Player, c.score)
                        .coords(),
                    confidence: c.score,
                })
                .collect();
            sets.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
            sets
        })
        .collect();

    debug!(
        frames = frames.len(),
        people = results.iter().map(Vec::len).sum::<usize>(),
        "Pose detection completed"
    );
    Ok(results)
}

#[async_trait]
impl KeypointDetector for PoseDetector {
    async fn detect_batch(&self, frames: &[Frame]) -> VisionResult<Vec<Vec<KeypointSet>>> {
        let engine = Arc::clone(&self.engine);
        let frames = frames.to_vec();
        run_blocking(move || detect_sync(&engine, &frames)).await
    }

    fn name(&self) -> &'static str {
        "yolo-pose"
    }
}
