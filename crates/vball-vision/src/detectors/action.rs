use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use vball_media::Frame;
use vball_models::{sort_by_rank, BoundingBox, ObjectLabel};

use super::{corners, ObjectDetector, YoloConfig, YoloEngine};
use crate::error::{VisionError, VisionResult};
use crate::session::run_blocking;

/// Multi-class action detector (spike, block, set, receive, serve).
#[derive(Clone)]
pub struct ActionDetector {
    engine: Arc<YoloEngine>,
}

impl ActionDetector {
    pub fn new(config: YoloConfig) -> VisionResult<Self> {
        if let Some(label) = config.classes.iter().find(|l| !l.is_action()) {
            return Err(VisionError::invalid_config(format!(
                "action detector cannot emit '{}'",
                label
            )));
        }
        Ok(Self {
            engine: Arc::new(YoloEngine::load(config, 0)?),
        })
    }

    /// Default configuration with the standard action class order.
    pub fn default_config(weights_path: impl Into<std::path::PathBuf>) -> YoloConfig {
        YoloConfig::new(weights_path, ObjectLabel::ACTIONS.to_vec())
    }

    pub fn classes(&self) -> &[ObjectLabel] {
        &self.engine.config().classes
    }
}

/// Drop excluded labels and order the rest by rank.
pub(crate) fn rank_actions(
    boxes: impl IntoIterator<Item = BoundingBox>,
    exclude: &[ObjectLabel],
) -> Vec<BoundingBox> {
    let mut kept: Vec<BoundingBox> = boxes
        .into_iter()
        .filter(|b| !exclude.contains(&b.label))
        .collect();
    sort_by_rank(&mut kept);
    kept
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
            let boxes = candidates.iter().filter_map(|c| {
                engine
                    .label(c)
                    .map(|label| engine.to_box(frame, corners(c), label, c.score))
            });
            rank_actions(boxes, exclude)
        })
        .collect();

    debug!(
        frames = frames.len(),
        boxes = results.iter().map(Vec::len).sum::<usize>(),
        "Action detection completed"
    );
    Ok(results)
}

#[async_trait]
impl ObjectDetector for ActionDetector {
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
        "yolo-action"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_actions_orders_and_excludes() {
        let boxes = vec![
            BoundingBox::new(0, 0, 9, 9, ObjectLabel::Set, 0.5),
            BoundingBox::new(0, 0, 19, 19, ObjectLabel::Serve, 0.9),
            BoundingBox::new(0, 0, 29, 29, ObjectLabel::Spike, 0.5),
        ];
        let ranked = rank_actions(boxes.clone(), &[]);
        let labels: Vec<ObjectLabel> = ranked.iter().map(|b| b.label).collect();
        assert_eq!(
            labels,
            vec![ObjectLabel::Serve, ObjectLabel::Spike, ObjectLabel::Set]
        );

        let without_serve = rank_actions(boxes, &[ObjectLabel::Serve]);
        assert_eq!(without_serve.len(), 2);
        assert!(without_serve.iter().all(|b| b.label != ObjectLabel::Serve));
    }

    #[test]
    fn test_rejects_non_action_class() {
        let config = YoloConfig::new("/nonexistent/action.onnx", vec![ObjectLabel::Ball]);
        assert!(matches!(
            ActionDetector::new(config),
            Err(VisionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_default_class_order() {
        let config = ActionDetector::default_config("action.onnx");
        assert_eq!(config.classes, ObjectLabel::ACTIONS.to_vec());
    }
}
