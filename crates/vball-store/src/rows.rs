//! Row types and their conversion to models.

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use sqlx::FromRow;
use vball_models::{
    CameraId, DetectionMap, DetectionMaps, Match, MatchId, Rally, RallyId, RallyStates, Series,
    SeriesId, TeamId, Video, VideoId,
};

use crate::error::{StoreError, StoreResult};

#[derive(Debug, FromRow)]
pub(crate) struct MatchRow {
    pub id: i64,
    pub series_id: i64,
    pub video_id: i64,
    pub team1_id: i64,
    pub team2_id: i64,
}

impl From<MatchRow> for Match {
    fn from(row: MatchRow) -> Self {
        Match {
            id: MatchId(row.id),
            team1_id: TeamId(row.team1_id),
            team2_id: TeamId(row.team2_id),
            series_id: SeriesId(row.series_id),
            video_id: VideoId(row.video_id),
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct VideoRow {
    pub id: i64,
    pub camera_type_id: i64,
    pub path: String,
}

impl From<VideoRow> for Video {
    fn from(row: VideoRow) -> Self {
        Video {
            id: VideoId(row.id),
            camera_id: CameraId(row.camera_type_id),
            path: row.path,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct SeriesRow {
    pub id: i64,
    pub host: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl From<SeriesRow> for Series {
    fn from(row: SeriesRow) -> Self {
        Series {
            id: SeriesId(row.id),
            host: row.host,
            start_date: row.start_date,
            end_date: row.end_date,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct RallyRow {
    pub id: i64,
    pub match_id: i64,
    pub order: i64,
    pub start_frame: i64,
    pub end_frame: i64,
    pub clip_path: String,
    pub rally_states: String,
    pub service: Option<String>,
    pub sets: Option<String>,
    pub spikes: Option<String>,
    pub blocks: Option<String>,
    pub receives: Option<String>,
    pub ball_positions: Option<String>,
    pub team1_positions: Option<String>,
    pub team2_positions: Option<String>,
    pub result: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// Columns selected for [`RallyRow`].
pub(crate) const RALLY_COLUMNS: &str = r#"id, match_id, "order", start_frame, end_frame, clip_path,
    rally_states, service, sets, spikes, blocks, receives, ball_positions,
    team1_positions, team2_positions, result, created, updated"#;

fn parse_opt<T: DeserializeOwned>(column: Option<String>) -> StoreResult<Option<T>> {
    column
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(StoreError::from)
}

fn parse_map(column: Option<String>) -> StoreResult<DetectionMap> {
    Ok(parse_opt(column)?.unwrap_or_default())
}

fn to_u64(value: i64, column: &str) -> StoreResult<u64> {
    u64::try_from(value).map_err(|_| StoreError::OutOfRange(format!("{} = {}", column, value)))
}

impl TryFrom<RallyRow> for Rally {
    type Error = StoreError;

    fn try_from(row: RallyRow) -> StoreResult<Self> {
        Ok(Rally {
            id: RallyId(row.id),
            match_id: MatchId(row.match_id),
            order: u32::try_from(row.order)
                .map_err(|_| StoreError::OutOfRange(format!("order = {}", row.order)))?,
            start_frame: to_u64(row.start_frame, "start_frame")?,
            end_frame: to_u64(row.end_frame, "end_frame")?,
            clip_path: row.clip_path,
            rally_states: RallyStates::from_json(&row.rally_states)?,
            service: parse_opt(row.service)?,
            detections: DetectionMaps {
                sets: parse_map(row.sets)?,
                spikes: parse_map(row.spikes)?,
                blocks: parse_map(row.blocks)?,
                receives: parse_map(row.receives)?,
                ball_positions: parse_map(row.ball_positions)?,
            },
            team1_positions: parse_opt(row.team1_positions)?,
            team2_positions: parse_opt(row.team2_positions)?,
            result: parse_opt(row.result)?,
            created: row.created,
            updated: row.updated,
        })
    }
}

/// Convert a frame index for binding.
pub(crate) fn to_i64(value: u64, what: &str) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| StoreError::OutOfRange(format!("{} = {}", what, value)))
}
