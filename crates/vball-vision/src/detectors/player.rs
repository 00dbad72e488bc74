use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use vball_media::Frame;
use vball_models::{sort_by_rank, BoundingBox, CourtZones, ObjectLabel};

use super::{corners, ObjectDetector, YoloConfig, YoloEngine};
use crate::error::VisionResult;
use crate::session::run_blocking;
use crate::yolo::MaskProtos;

/// Mask coefficients per anchor in YOLOv8-seg heads.
pub const MASK_COEFFICIENTS: usize = 32;

struct PlayerInner {
    engine: YoloEngine,
    segmentation: bool,
    court: Option<CourtZones>,
}

/// Player detector with optional mask-derived boxes and court filtering.
#[derive(Clone)]
pub struct PlayerDetector {
    inner: Arc<PlayerInner>,
}

impl PlayerDetector {
    /// Load the model. With `court`, only players standing in one of its
    /// zones are reported.
    pub fn new(
        config: YoloConfig,
        segmentation: bool,
        court: Option<CourtZones>,
    ) -> VisionResult<Self> {
        let extra = if segmentation { MASK_COEFFICIENTS } else { 0 };
        Ok(Self {
            inner: Arc::new(PlayerInner {
                engine: YoloEngine::load(config, extra)?,
                segmentation,
                court,
            }),
        })
    }
}

/// Keep player boxes admitted by the court zones, ranked.
pub(crate) fn filter_players(
    boxes: impl IntoIterator<Item = BoundingBox>,
    court: Option<&CourtZones>,
) -> Vec<BoundingBox> {
    let mut kept: Vec<BoundingBox> = boxes
        .into_iter()
        .filter(|b| b.label == ObjectLabel::Player)
        .filter(|b| court.map_or(true, |zones| zones.admits(b)))
        .collect();
    sort_by_rank(&mut kept);
    kept
}

fn detect_sync(inner: &PlayerInner, frames: &[Frame]) -> VisionResult<Vec<Vec<BoundingBox>>> {
    if frames.is_empty() {
        return Ok(Vec::new());
    }
    let engine = &inner.engine;
    let names: &[&str] = if inner.segmentation {
        &["output0", "output1"]
    } else {
        &["output0"]
    };
    let outputs = engine.infer(frames, names)?;
    let per_frame = engine.candidates(&outputs[0], frames.len())?;
    let protos = match outputs.get(1) {
        Some(tensor) => Some(MaskProtos::new(tensor)?),
        None => None,
    };

    let input_size = engine.config().input_size;
    let results: Vec<Vec<BoundingBox>> = frames
        .iter()
        .zip(per_frame)
        .enumerate()
        .map(|(image, (frame, candidates))| {
            let boxes = candidates.iter().filter_map(|c| {
                let label = engine.label(c)?;
                let extent = protos
                    .as_ref()
                    .and_then(|p| p.mask_extent(image, c, input_size))
                    .unwrap_or_else(|| corners(c));
                Some(engine.to_box(frame, extent, label, c.score))
            });
            filter_players(boxes, inner.court.as_ref())
        })
        .collect();

    debug!(
        frames = frames.len(),
        players = results.iter().map(Vec::len).sum::<usize>(),
        segmentation = inner.segmentation,
        "Player detection completed"
    );
    Ok(results)
}

#[async_trait]
impl ObjectDetector for PlayerDetector {
    async fn detect_batch(
        &self,
        frames: &[Frame],
        exclude: &[ObjectLabel],
    ) -> VisionResult<Vec<Vec<BoundingBox>>> {
        if exclude.contains(&ObjectLabel::Player) {
            return Ok(vec![Vec::new(); frames.len()]);
        }
        let inner = Arc::clone(&self.inner);
        let frames = frames.to_vec();
        run_blocking(move || detect_sync(&inner, &frames)).await
    }

    fn name(&self) -> &'static str {
        "yolo-player"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vball_models::{CourtPolygon, Point};

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> CourtPolygon {
        CourtPolygon::new([
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ])
    }

    fn player(x1: i32, y1: i32, x2: i32, y2: i32, confidence: f32) -> BoundingBox {
        BoundingBox::new(x1, y1, x2, y2, ObjectLabel::Player, confidence)
    }

    #[test]
    fn test_filter_without_court_keeps_all_ranked() {
        let kept = filter_players(
            vec![player(0, 0, 9, 9, 0.3), player(100, 100, 120, 150, 0.9)],
            None,
        );
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_filter_by_court_anchor() {
        let zones = CourtZones {
            main: rect(0.0, 0.0, 100.0, 50.0),
            front: rect(0.0, 50.0, 100.0, 100.0),
        };
        let kept = filter_players(
            vec![
                // feet inside the main zone
                player(10, 0, 20, 40, 0.5),
                // feet inside the front zone
                player(10, 40, 20, 90, 0.5),
                // left foot on the zone edge
                player(100, 60, 140, 100, 0.5),
                // entirely outside
                player(200, 200, 220, 260, 0.9),
            ],
            Some(&zones),
        );
        assert_eq!(kept.len(), 3);
        assert!(kept.iter().all(|b| b.x1 < 200));
    }
}
