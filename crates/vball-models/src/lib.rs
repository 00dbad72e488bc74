//! Shared data models for the volleyball rally scanner.
//!
//! This crate provides Serde-serializable types for:
//! - Game states and their run-length encoding
//! - Pixel geometry (boxes, keypoints, court polygons)
//! - Offset-keyed detection maps
//! - Rally and service records
//! - Catalog entities (matches, videos, series, teams)

pub mod catalog;
pub mod detection;
pub mod game_state;
pub mod geometry;
pub mod label;
pub mod rally;
pub mod rally_states;

pub use catalog::{
    Camera, CameraId, Match, MatchId, Nation, NationId, Player, PlayerId, Series, SeriesId, Team,
    TeamId, Video, VideoId,
};
pub use detection::{DetectionMap, DetectionMaps, FrameOffset, RallyDetections, ServiceHitter};
pub use game_state::GameState;
pub use geometry::{
    sort_by_rank, BoundingBox, BoxCoords, CourtPolygon, CourtZones, Keypoint, KeypointSet, Point,
    KEYPOINT_COUNT,
};
pub use label::ObjectLabel;
pub use rally::{NewRally, Rally, RallyId, ServiceRecord, ServiceType};
pub use rally_states::{run_length_decode, run_length_encode, RallyStates, StateRun};

use thiserror::Error;

/// Errors raised while parsing model values.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Invalid game state code: {0}")]
    InvalidStateCode(u8),

    #[error("Unknown game state: {0}")]
    UnknownState(String),

    #[error("Unknown object label: {0}")]
    UnknownLabel(String),

    #[error("Court polygon needs 4 vertices, got {0}")]
    InvalidPolygon(usize),
}
