//! Sparse per-frame detection maps keyed by rally offset.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::geometry::{BoundingBox, BoxCoords, KeypointSet};
use crate::label::ObjectLabel;

/// Frame index relative to a rally's `start_frame`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameOffset(pub u32);

impl FrameOffset {
    pub fn new(offset: u32) -> Self {
        Self(offset)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Absolute frame index for a rally starting at `start_frame`.
    pub fn absolute(self, start_frame: u64) -> u64 {
        start_frame + self.0 as u64
    }
}

impl fmt::Display for FrameOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for FrameOffset {
    fn from(offset: u32) -> Self {
        Self(offset)
    }
}

/// Offset -> ordered boxes. JSON keys are decimal offsets, emitted in
/// ascending order, and parse back to integers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetectionMap(BTreeMap<FrameOffset, Vec<BoxCoords>>);

impl DetectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a box to an offset, preserving insertion order.
    pub fn push(&mut self, offset: FrameOffset, bbox: BoxCoords) {
        self.0.entry(offset).or_default().push(bbox);
    }

    pub fn get(&self, offset: FrameOffset) -> Option<&[BoxCoords]> {
        self.0.get(&offset).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn offsets(&self) -> impl Iterator<Item = FrameOffset> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FrameOffset, &Vec<BoxCoords>)> {
        self.0.iter()
    }

    /// Largest offset present.
    pub fn max_offset(&self) -> Option<FrameOffset> {
        self.0.keys().next_back().copied()
    }

    /// Total number of boxes across all frames.
    pub fn box_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }
}

/// The five action/ball maps attached to a rally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionMaps {
    #[serde(default)]
    pub sets: DetectionMap,
    #[serde(default)]
    pub spikes: DetectionMap,
    #[serde(default)]
    pub blocks: DetectionMap,
    #[serde(default)]
    pub receives: DetectionMap,
    #[serde(default)]
    pub ball_positions: DetectionMap,
}

impl DetectionMaps {
    /// Map a label routes to, if it has one.
    pub fn map_for_mut(&mut self, label: ObjectLabel) -> Option<&mut DetectionMap> {
        match label {
            ObjectLabel::Ball => Some(&mut self.ball_positions),
            ObjectLabel::Spike => Some(&mut self.spikes),
            ObjectLabel::Block => Some(&mut self.blocks),
            ObjectLabel::Set => Some(&mut self.sets),
            ObjectLabel::Receive => Some(&mut self.receives),
            ObjectLabel::Serve | ObjectLabel::Player => None,
        }
    }

    /// Route a box to its map. Returns false for labels without a map.
    pub fn record(&mut self, offset: FrameOffset, bbox: &BoundingBox) -> bool {
        match self.map_for_mut(bbox.label) {
            Some(map) => {
                map.push(offset, bbox.coords());
                true
            }
            None => false,
        }
    }

    pub fn all(&self) -> [&DetectionMap; 5] {
        [
            &self.sets,
            &self.spikes,
            &self.blocks,
            &self.receives,
            &self.ball_positions,
        ]
    }

    /// Largest offset present in any map.
    pub fn max_offset(&self) -> Option<FrameOffset> {
        self.all().iter().filter_map(|m| m.max_offset()).max()
    }
}

/// Service details only known after detection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceHitter {
    pub hitter_bbox: Option<BoxCoords>,
    pub hitter: Option<KeypointSet>,
}

/// Payload of the one-shot `update_rally` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RallyDetections {
    #[serde(flatten)]
    pub maps: DetectionMaps,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team1_positions: Option<DetectionMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team2_positions: Option<DetectionMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_hitter: Option<ServiceHitter>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coords(v: i32) -> BoxCoords {
        BoxCoords {
            x1: v,
            y1: v,
            x2: v + 1,
            y2: v + 1,
        }
    }

    #[test]
    fn test_integer_keys_survive_json() {
        let mut map = DetectionMap::new();
        map.push(FrameOffset(10), coords(1));
        map.push(FrameOffset(2), coords(2));
        map.push(FrameOffset(2), coords(3));

        let json = serde_json::to_string(&map).unwrap();
        assert!(json.starts_with("{\"2\":"));

        let parsed: DetectionMap = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, map);
        assert_eq!(parsed.get(FrameOffset(2)).unwrap().len(), 2);
        assert_eq!(parsed.max_offset(), Some(FrameOffset(10)));
    }

    #[test]
    fn test_non_integer_keys_rejected() {
        assert!(serde_json::from_str::<DetectionMap>("{\"a\":[]}").is_err());
        assert!(serde_json::from_str::<DetectionMap>("{\"-1\":[]}").is_err());
    }

    #[test]
    fn test_label_routing() {
        let mut maps = DetectionMaps::default();
        let ball = BoundingBox::new(0, 0, 3, 3, ObjectLabel::Ball, 0.8);
        let serve = BoundingBox::new(0, 0, 3, 3, ObjectLabel::Serve, 0.8);
        let spike = BoundingBox::new(5, 5, 9, 9, ObjectLabel::Spike, 0.8);

        assert!(maps.record(FrameOffset(0), &ball));
        assert!(maps.record(FrameOffset(4), &spike));
        assert!(!maps.record(FrameOffset(0), &serve));

        assert_eq!(maps.ball_positions.len(), 1);
        assert_eq!(maps.spikes.len(), 1);
        assert_eq!(maps.max_offset(), Some(FrameOffset(4)));
    }

    #[test]
    fn test_detections_json_shape() {
        let mut detections = RallyDetections::default();
        detections.maps.sets.push(FrameOffset(1), coords(0));
        let value = serde_json::to_value(&detections).unwrap();
        assert!(value.get("sets").is_some());
        assert!(value.get("ball_positions").is_some());
        assert!(value.get("team1_positions").is_none());
    }
}
