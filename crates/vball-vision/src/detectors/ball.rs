use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use vball_media::Frame;
use vball_models::{BoundingBox, ObjectLabel};

use super::{corners, ObjectDetector, YoloConfig, YoloEngine};
use crate::error::VisionResult;
use crate::session::run_blocking;

/// Ball detector: the single best ball box per frame.
#[derive(Clone)]
pub struct BallDetector {
    engine: Arc<YoloEngine>,
}

impl BallDetector {
    pub fn new(config: YoloConfig) -> VisionResult<Self> {
        Ok(Self {
            engine: Arc::new(YoloEngine::load(config, 0)?),
        })
    }
}

/// Highest-ranked ball box, by confidence then area.
pub(crate) fn best_ball(boxes: impl IntoIterator<Item = BoundingBox>) -> Option<BoundingBox> {
    boxes
        .into_iter()
        .filter(|b| b.label == ObjectLabel::Ball)
        .min_by(BoundingBox::rank_cmp)
}

fn detect_sync(
    engine: &YoloEngine,
    frames: &[Frame],
    exclude: &[ObjectLabel],
) -> VisionResult<Vec<Vec<BoundingBox>>> {
    if frames.is_empty() {
        return Ok(Vec::new());
    }
    let outputs = engine.infer(frames, &["output0"])?;
    let per_frame = engine.candidates(&outputs[0], frames.len())?;

    let results: Vec<Vec<BoundingBox>> = frames
        .iter()
        .zip(per_frame)
        .map(|(frame, candidates)| {
            if exclude.contains(&ObjectLabel::Ball) {
                return Vec::new();
            }
            let boxes = candidates.iter().filter_map(|c| {
                engine
                    .label(c)
                    .map(|label| engine.to_box(frame, corners(c), label, c.score))
            });
            best_ball(boxes).into_iter().collect()
        })
        .collect();

    debug!(
        frames = frames.len(),
        found = results.iter().filter(|r| !r.is_empty()).count(),
        "Ball detection completed"
    );
    Ok(results)
}

#[async_trait]
impl ObjectDetector for BallDetector {
    async fn detect_batch(
        &self,
        frames: &[Frame],
        exclude: &[ObjectLabel],
    ) -> VisionResult<Vec<Vec<BoundingBox>>> {
        let engine = Arc::clone(&self.engine);
        let frames = frames.to_vec();
        let exclude = exclude.to_vec();
        run_blocking(move || detect_sync(&engine, &frames, &exclude)).await
    }

    fn name(&self) -> &'static str {
        "yolo-ball"
    }
}
