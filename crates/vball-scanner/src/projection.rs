//! Projection of detector output onto a rally's detection maps.
//!
//! Every detector runs over the rally in sub-batches. Boxes are routed by
//! label: ball, spike, block, set and receive boxes land in their maps, serve
//! boxes pick the service hitter, and court-filtered players are split into
//! the two team maps. A failed sub-batch only drops that detector's entries
//! for those frames.

use std::cmp::Ordering;
use tracing::{debug, warn};
use vball_media::Frame;
use vball_models::{
    BoundingBox, CourtZones, DetectionMap, FrameOffset, KeypointSet, ObjectLabel, RallyDetections,
    ServiceHitter,
};
use vball_vision::{DetectorSet, KeypointDetector, ObjectDetector, VisionError, VisionResult};

/// Detections for one rally and how many detector calls failed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    pub detections: RallyDetections,
    pub failures: usize,
}

fn offset(i: usize) -> FrameOffset {
    FrameOffset(i as u32)
}

async fn detect_chunk(
    detector: &dyn ObjectDetector,
    chunk: &[Frame],
) -> VisionResult<Vec<Vec<BoundingBox>>> {
    let per_frame = detector.detect_batch(chunk, &[]).await?;
    if per_frame.len() != chunk.len() {
        return Err(VisionError::detection_failed(format!(
            "{} returned {} results for {} frames",
            detector.name(),
            per_frame.len(),
            chunk.len()
        )));
    }
    Ok(per_frame)
}

/// Run every configured detector over `frames` and build the detection maps.
///
/// `service_offset` bounds the frames searched for the serve; `court` is
/// required to split players into teams.
pub async fn project_detections(
    detectors: &DetectorSet,
    frames: &[Frame],
    batch_size: usize,
    service_offset: Option<usize>,
    court: Option<&CourtZones>,
) -> Projection {
    let batch_size = batch_size.max(1);
    let mut projection = Projection::default();
    let mut serve: Option<(usize, BoundingBox)> = None;
    let split_teams = court.filter(|_| detectors.player.is_some());
    let mut team1 = DetectionMap::new();
    let mut team2 = DetectionMap::new();

    for (batch, chunk) in frames.chunks(batch_size).enumerate() {
        let base = batch * batch_size;

        match detect_chunk(detectors.ball.as_ref(), chunk).await {
            Ok(per_frame) => {
                for (i, boxes) in per_frame.iter().enumerate() {
                    for bbox in boxes {
                        projection.detections.maps.record(offset(base + i), bbox);
                    }
                }
            }
            Err(e) => projection.failed(detectors.ball.name(), base, chunk.len(), &e),
        }

        match detect_chunk(detectors.action.as_ref(), chunk).await {
            Ok(per_frame) => {
                for (i, boxes) in per_frame.iter().enumerate() {
                    let at = base + i;
                    for bbox in boxes {
                        if bbox.label == ObjectLabel::Serve {
                            if service_offset.is_some_and(|s| at <= s) {
                                serve = better_serve(serve, at, *bbox);
                            }
                        } else {
                            projection.detections.maps.record(offset(at), bbox);
                        }
                    }
                }
            }
            Err(e) => projection.failed(detectors.action.name(), base, chunk.len(), &e),
        }

        if let (Some(player), Some(zones)) = (&detectors.player, split_teams) {
            match detect_chunk(player.as_ref(), chunk).await {
                Ok(per_frame) => {
                    for (i, boxes) in per_frame.iter().enumerate() {
                        for bbox in boxes {
                            let team = if zones.in_front(bbox) {
                                &mut team1
                            } else {
                                &mut team2
                            };
                            team.push(offset(base + i), bbox.coords());
                        }
                    }
                }
                Err(e) => projection.failed(player.name(), base, chunk.len(), &e),
            }
        }
    }

    if split_teams.is_some() {
        projection.detections.team1_positions = Some(team1);
        projection.detections.team2_positions = Some(team2);
    }

    if let Some((at, bbox)) = serve {
        let hitter = match &detectors.pose {
            Some(pose) => match pose_for(pose.as_ref(), &frames[at], &bbox).await {
                Ok(hitter) => hitter,
                Err(e) => {
                    projection.failed(pose.name(), at, 1, &e);
                    None
                }
            },
            None => None,
        };
        debug!(
            offset = at,
            confidence = bbox.confidence,
            has_pose = hitter.is_some(),
            "Service hitter found"
        );
        projection.detections.service_hitter = Some(ServiceHitter {
            hitter_bbox: Some(bbox.coords()),
            hitter,
        });
    }

    projection
}

impl Projection {
    fn failed(&mut self, detector: &str, first_offset: usize, frames: usize, error: &VisionError) {
        self.failures += 1;
        warn!(
            detector,
            first_offset,
            frames,
            error = %error,
            "Detection failed, frames skipped"
        );
    }
}

/// Keep the higher ranked serve; earlier frames win ties.
fn better_serve(
    current: Option<(usize, BoundingBox)>,
    at: usize,
    candidate: BoundingBox,
) -> Option<(usize, BoundingBox)> {
    match current {
        Some((_, best)) if BoundingBox::rank_cmp(&candidate, &best) != Ordering::Less => current,
        _ => Some((at, candidate)),
    }
}

/// The pose overlapping the hitter box the most.
async fn pose_for(
    pose: &dyn KeypointDetector,
    frame: &Frame,
    hitter: &BoundingBox,
) -> VisionResult<Option<KeypointSet>> {
    let poses = pose.detect(frame).await?;
    Ok(poses
        .into_iter()
        .map(|set| (set.bounding_box().iou(hitter), set))
        .filter(|(iou, _)| *iou > 0.0)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, set)| set))
}
