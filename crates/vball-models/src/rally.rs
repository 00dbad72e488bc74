//! Rally records and the embedded service record.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::catalog::MatchId;
use crate::detection::{DetectionMap, DetectionMaps};
use crate::geometry::{BoxCoords, KeypointSet, Point};
use crate::rally_states::RallyStates;

/// Durable identifier of a persisted rally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct RallyId(pub i64);

impl fmt::Display for RallyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    #[default]
    Float,
    HighToss,
    LowToss,
}

/// Service details embedded in a rally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ServiceRecord {
    /// Absolute frame of the last service frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_frame: Option<u64>,
    /// Offset of the last service frame within the rally
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_index: Option<u32>,
    #[serde(default)]
    pub hitter: Option<KeypointSet>,
    #[serde(default)]
    pub hitter_bbox: Option<BoxCoords>,
    #[serde(default)]
    pub bounce_point: Option<Point>,
    /// Court zone 1..=6 the serve lands in
    #[serde(default)]
    pub target_zone: Option<u8>,
    #[serde(default, rename = "type")]
    pub service_type: ServiceType,
}

impl ServiceRecord {
    /// Service that ended at `end_index` in a rally starting at `start_frame`.
    pub fn ending_at(start_frame: u64, end_index: u32) -> Self {
        Self {
            end_frame: Some(start_frame + end_index as u64),
            end_index: Some(end_index),
            ..Default::default()
        }
    }
}

/// A rally as handed to the persistence gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRally {
    pub match_id: MatchId,
    /// Controller's emission counter, which also names the clip. The store
    /// assigns the persisted, gap-free order itself.
    pub order: u32,
    pub start_frame: u64,
    pub end_frame: u64,
    pub clip_path: String,
    pub rally_states: RallyStates,
    pub service: Option<ServiceRecord>,
}

impl NewRally {
    /// Inclusive number of frames.
    pub fn frame_count(&self) -> u64 {
        self.end_frame.saturating_sub(self.start_frame) + 1
    }
}

/// A persisted rally row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rally {
    pub id: RallyId,
    pub match_id: MatchId,
    pub order: u32,
    pub start_frame: u64,
    pub end_frame: u64,
    pub clip_path: String,
    pub rally_states: RallyStates,
    pub service: Option<ServiceRecord>,
    #[serde(flatten)]
    pub detections: DetectionMaps,
    pub team1_positions: Option<DetectionMap>,
    pub team2_positions: Option<DetectionMap>,
    pub result: Option<serde_json::Value>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Rally {
    /// Inclusive number of frames.
    pub fn frame_count(&self) -> u64 {
        self.end_frame.saturating_sub(self.start_frame) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_ending_at() {
        let service = ServiceRecord::ending_at(60, 29);
        assert_eq!(service.end_frame, Some(89));
        assert_eq!(service.end_index, Some(29));
        assert_eq!(service.service_type, ServiceType::Float);
    }

    #[test]
    fn test_service_json() {
        let service = ServiceRecord::ending_at(0, 29);
        let value = serde_json::to_value(&service).unwrap();
        assert_eq!(value["end_index"], 29);
        assert_eq!(value["type"], "float");

        let parsed: ServiceRecord = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, service);
    }
}
