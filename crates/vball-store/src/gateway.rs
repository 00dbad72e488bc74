//! Persistence gateway for rallies and the catalog entities they hang off.

use async_trait::async_trait;
use chrono::Utc;
use std::future::Future;
use std::time::Instant;
use tracing::{debug, info};
use vball_models::{
    Match, MatchId, NewRally, Rally, RallyDetections, RallyId, Series, SeriesId, ServiceRecord,
    Video, VideoId,
};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::metrics;
use crate::rows::{to_i64, MatchRow, RallyRow, SeriesRow, VideoRow, RALLY_COLUMNS};

/// Storage operations the scanner depends on.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Insert a rally in one transaction and return its id.
    ///
    /// The store assigns the next gap-free `order` within the match. Saving
    /// a rally whose start frame is already stored for the match returns the
    /// existing id.
    async fn save_rally(&self, rally: &NewRally) -> StoreResult<RallyId>;

    /// Overwrite a rally's detection columns. Safe to repeat.
    async fn update_rally(&self, id: RallyId, detections: &RallyDetections) -> StoreResult<()>;

    async fn get_match(&self, id: MatchId) -> StoreResult<Match>;

    async fn get_video(&self, id: VideoId) -> StoreResult<Video>;

    async fn get_series(&self, id: SeriesId) -> StoreResult<Series>;

    /// Rallies of a match in `order`.
    async fn list_rallies(&self, match_id: MatchId) -> StoreResult<Vec<Rally>>;
}

/// Check the invariants a rally must satisfy before it is stored.
pub fn validate_new_rally(rally: &NewRally) -> StoreResult<()> {
    if rally.start_frame >= rally.end_frame {
        return Err(StoreError::invalid_rally(format!(
            "start_frame {} must be before end_frame {}",
            rally.start_frame, rally.end_frame
        )));
    }
    let expected = rally.frame_count();
    let actual = rally.rally_states.frame_count() as u64;
    if actual != expected {
        return Err(StoreError::invalid_rally(format!(
            "rally_states cover {} frames, rally spans {}",
            actual, expected
        )));
    }
    Ok(())
}

/// Time a store call and record its outcome.
async fn observe<T, F>(operation: &'static str, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    let start = Instant::now();
    let result = fut.await;
    metrics::record_request(operation, result.is_ok(), start.elapsed().as_secs_f64() * 1000.0);
    result
}

/// [`PersistenceGateway`] backed by SQLite.
#[derive(Debug, Clone)]
pub struct SqliteGateway {
    db: Database,
}

impl SqliteGateway {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Connect to `url` and apply migrations.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        Ok(Self::new(Database::connect(url).await?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    async fn insert_rally(&self, rally: &NewRally) -> StoreResult<RallyId> {
        validate_new_rally(rally)?;
        let start_frame = to_i64(rally.start_frame, "start_frame")?;
        let end_frame = to_i64(rally.end_frame, "end_frame")?;

        // Take the write lock up front; other processes may share the file.
        let mut tx = self.db.pool().begin_with("BEGIN IMMEDIATE").await?;

        let existing: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM rally WHERE match_id = ? AND start_frame = ?")
                .bind(rally.match_id.0)
                .bind(start_frame)
                .fetch_optional(&mut *tx)
                .await?;
        if let Some((id,)) = existing {
            tx.commit().await?;
            metrics::record_duplicate_rally();
            info!(
                match_id = %rally.match_id,
                start_frame = rally.start_frame,
                rally_id = id,
                "Rally already stored"
            );
            return Ok(RallyId(id));
        }

        let (order,): (i64,) =
            sqlx::query_as(r#"SELECT COALESCE(MAX("order") + 1, 0) FROM rally WHERE match_id = ?"#)
                .bind(rally.match_id.0)
                .fetch_one(&mut *tx)
                .await?;

        let service = rally
            .service
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let now = Utc::now();

        let id = sqlx::query(
            r#"INSERT INTO rally
               (match_id, clip_path, start_frame, end_frame, "order", service, rally_states, created, updated)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(rally.match_id.0)
        .bind(&rally.clip_path)
        .bind(start_frame)
        .bind(end_frame)
        .bind(order)
        .bind(service)
        .bind(rally.rally_states.to_json())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        tx.commit().await?;

        info!(
            match_id = %rally.match_id,
            rally_id = id,
            order,
            start_frame = rally.start_frame,
            end_frame = rally.end_frame,
            "Rally saved"
        );
        Ok(RallyId(id))
    }

    async fn write_detections(&self, id: RallyId, detections: &RallyDetections) -> StoreResult<()> {
        let mut tx = self.db.pool().begin_with("BEGIN IMMEDIATE").await?;

        let row: Option<(Option<String>,)> = sqlx::query_as("SELECT service FROM rally WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await?;
        let (stored_service,) = row.ok_or_else(|| StoreError::not_found(format!("rally {}", id)))?;

        let service = match (&detections.service_hitter, stored_service) {
            (Some(hitter), Some(json)) => {
                let mut service: ServiceRecord = serde_json::from_str(&json)?;
                service.hitter_bbox = hitter.hitter_bbox;
                service.hitter = hitter.hitter.clone();
                Some(serde_json::to_string(&service)?)
            }
            (_, stored) => stored,
        };

        let maps = &detections.maps;
        let team1 = detections
            .team1_positions
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let team2 = detections
            .team2_positions
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"UPDATE rally SET
                 sets = ?, spikes = ?, blocks = ?, receives = ?, ball_positions = ?,
                 team1_positions = COALESCE(?, team1_positions),
                 team2_positions = COALESCE(?, team2_positions),
                 service = ?, updated = ?
               WHERE id = ?"#,
        )
        .bind(serde_json::to_string(&maps.sets)?)
        .bind(serde_json::to_string(&maps.spikes)?)
        .bind(serde_json::to_string(&maps.blocks)?)
        .bind(serde_json::to_string(&maps.receives)?)
        .bind(serde_json::to_string(&maps.ball_positions)?)
        .bind(team1)
        .bind(team2)
        .bind(service)
        .bind(Utc::now())
        .bind(id.0)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            rally_id = %id,
            ball = maps.ball_positions.len(),
            spikes = maps.spikes.len(),
            "Rally detections written"
        );
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for SqliteGateway {
    async fn save_rally(&self, rally: &NewRally) -> StoreResult<RallyId> {
        observe("save_rally", self.insert_rally(rally)).await
    }

    async fn update_rally(&self, id: RallyId, detections: &RallyDetections) -> StoreResult<()> {
        observe("update_rally", self.write_detections(id, detections)).await
    }

    async fn get_match(&self, id: MatchId) -> StoreResult<Match> {
        observe("get_match", async {
            let row: Option<MatchRow> = sqlx::query_as(
                r#"SELECT id, series_id, video_id, team1_id, team2_id FROM "match" WHERE id = ?"#,
            )
            .bind(id.0)
            .fetch_optional(self.db.pool())
            .await?;
            row.map(Match::from)
                .ok_or_else(|| StoreError::not_found(format!("match {}", id)))
        })
        .await
    }

    async fn get_video(&self, id: VideoId) -> StoreResult<Video> {
        observe("get_video", async {
            let row: Option<VideoRow> =
                sqlx::query_as("SELECT id, camera_type_id, path FROM video WHERE id = ?")
                    .bind(id.0)
                    .fetch_optional(self.db.pool())
                    .await?;
            row.map(Video::from)
                .ok_or_else(|| StoreError::not_found(format!("video {}", id)))
        })
        .await
    }

    async fn get_series(&self, id: SeriesId) -> StoreResult<Series> {
        observe("get_series", async {
            let row: Option<SeriesRow> =
                sqlx::query_as("SELECT id, host, start_date, end_date FROM series WHERE id = ?")
                    .bind(id.0)
                    .fetch_optional(self.db.pool())
                    .await?;
            row.map(Series::from)
                .ok_or_else(|| StoreError::not_found(format!("series {}", id)))
        })
        .await
    }

    async fn list_rallies(&self, match_id: MatchId) -> StoreResult<Vec<Rally>> {
        observe("list_rallies", async {
            let sql = format!(
                r#"SELECT {} FROM rally WHERE match_id = ? ORDER BY "order""#,
                RALLY_COLUMNS
            );
            let rows: Vec<RallyRow> = sqlx::query_as(&sql)
                .bind(match_id.0)
                .fetch_all(self.db.pool())
                .await?;
            rows.into_iter().map(Rally::try_from).collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::seed_match;
    use vball_models::{
        BoxCoords, DetectionMap, FrameOffset, GameState, Keypoint, KeypointSet, RallyStates,
        ServiceHitter,
    };

    async fn gateway() -> (SqliteGateway, MatchId) {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let match_id = seed_match(&db, "/videos/match.mp4").await.unwrap();
        (SqliteGateway::new(db), match_id)
    }

    fn new_rally(match_id: MatchId, order: u32, start: u64, end: u64) -> NewRally {
        let len = (end - start + 1) as usize;
        let mut labels = vec![GameState::Service; 30.min(len)];
        labels.resize(len, GameState::Play);
        NewRally {
            match_id,
            order,
            start_frame: start,
            end_frame: end,
            clip_path: format!("/clips/{}/{}.mp4", match_id, order),
            rally_states: RallyStates::encode(&labels),
            service: Some(ServiceRecord::ending_at(start, 29)),
        }
    }

    fn coords(x: i32) -> BoxCoords {
        BoxCoords {
            x1: x,
            y1: x,
            x2: x + 10,
            y2: x + 10,
        }
    }

    #[tokio::test]
    async fn test_save_assigns_gap_free_order() {
        let (gw, match_id) = gateway().await;
        let a = gw.save_rally(&new_rally(match_id, 0, 0, 149)).await.unwrap();
        // Controller counter skipped a failed emission; the store does not.
        let b = gw.save_rally(&new_rally(match_id, 2, 300, 449)).await.unwrap();
        assert_ne!(a, b);

        let rallies = gw.list_rallies(match_id).await.unwrap();
        assert_eq!(rallies.len(), 2);
        assert_eq!(rallies[0].order, 0);
        assert_eq!(rallies[1].order, 1);
        assert_eq!(rallies[1].start_frame, 300);
        assert_eq!(rallies[1].clip_path, format!("/clips/{}/2.mp4", match_id));
        assert_eq!(rallies[0].rally_states.frame_count(), 150);
        assert_eq!(rallies[0].service.as_ref().unwrap().end_frame, Some(29));
        assert!(rallies[0].detections.ball_positions.is_empty());
        assert!(rallies[0].team1_positions.is_none());
    }

    #[tokio::test]
    async fn test_save_duplicate_start_returns_existing_id() {
        let (gw, match_id) = gateway().await;
        let rally = new_rally(match_id, 0, 60, 209);
        let first = gw.save_rally(&rally).await.unwrap();
        let second = gw.save_rally(&rally).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(gw.list_rallies(match_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_rejects_invalid_rallies() {
        let (gw, match_id) = gateway().await;

        let mut reversed = new_rally(match_id, 0, 0, 149);
        reversed.start_frame = 149;
        reversed.end_frame = 149;
        assert!(matches!(
            gw.save_rally(&reversed).await,
            Err(StoreError::InvalidRally(_))
        ));

        let mut short = new_rally(match_id, 0, 0, 149);
        short.end_frame = 150;
        assert!(matches!(
            gw.save_rally(&short).await,
            Err(StoreError::InvalidRally(_))
        ));

        let orphan = new_rally(MatchId(999), 0, 0, 149);
        assert!(matches!(
            gw.save_rally(&orphan).await,
            Err(StoreError::Database(_))
        ));
        assert!(gw.list_rallies(match_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_writes_detections_and_hitter() {
        let (gw, match_id) = gateway().await;
        let id = gw.save_rally(&new_rally(match_id, 0, 0, 149)).await.unwrap();

        let mut detections = RallyDetections::default();
        detections.maps.ball_positions.push(FrameOffset(3), coords(5));
        detections.maps.spikes.push(FrameOffset(90), coords(40));
        let mut team1 = DetectionMap::new();
        team1.push(FrameOffset(0), coords(100));
        detections.team1_positions = Some(team1.clone());
        detections.service_hitter = Some(ServiceHitter {
            hitter_bbox: Some(coords(200)),
            hitter: Some(KeypointSet {
                keypoints: vec![
                    Keypoint {
                        x: 1.0,
                        y: 2.0,
                        confidence: 0.9
                    };
                    17
                ],
                bbox: coords(200),
                confidence: 0.8,
            }),
        });

        gw.update_rally(id, &detections).await.unwrap();
        // Repeating the update leaves the same row.
        gw.update_rally(id, &detections).await.unwrap();

        let rally = gw.list_rallies(match_id).await.unwrap().remove(0);
        assert_eq!(rally.detections.ball_positions.get(FrameOffset(3)), Some(&[coords(5)][..]));
        assert_eq!(rally.detections.spikes.box_count(), 1);
        assert_eq!(rally.team1_positions, Some(team1));
        assert!(rally.team2_positions.is_none());

        let service = rally.service.unwrap();
        assert_eq!(service.end_index, Some(29));
        assert_eq!(service.hitter_bbox, Some(coords(200)));
        assert_eq!(service.hitter.unwrap().keypoints.len(), 17);
        assert!(rally.updated >= rally.created);
    }

    #[tokio::test]
    async fn test_update_keeps_positions_when_absent() {
        let (gw, match_id) = gateway().await;
        let id = gw.save_rally(&new_rally(match_id, 0, 0, 149)).await.unwrap();

        let mut with_teams = RallyDetections::default();
        let mut team2 = DetectionMap::new();
        team2.push(FrameOffset(1), coords(7));
        with_teams.team2_positions = Some(team2.clone());
        gw.update_rally(id, &with_teams).await.unwrap();

        gw.update_rally(id, &RallyDetections::default()).await.unwrap();
        let rally = gw.list_rallies(match_id).await.unwrap().remove(0);
        assert_eq!(rally.team2_positions, Some(team2));
    }

    #[tokio::test]
    async fn test_update_unknown_rally() {
        let (gw, _) = gateway().await;
        let err = gw
            .update_rally(RallyId(42), &RallyDetections::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_catalog_reads() {
        let (gw, match_id) = gateway().await;
        let m = gw.get_match(match_id).await.unwrap();
        let video = gw.get_video(m.video_id).await.unwrap();
        assert_eq!(video.path, "/videos/match.mp4");
        let series = gw.get_series(m.series_id).await.unwrap();
        assert_eq!(series.host, "Test Cup");
        assert!(series.end_date.is_none());

        assert!(gw.get_match(MatchId(77)).await.unwrap_err().is_not_found());
        assert!(gw.get_video(VideoId(77)).await.unwrap_err().is_not_found());
        assert!(gw.get_series(SeriesId(77)).await.unwrap_err().is_not_found());
    }

    async fn save_run(gw: &SqliteGateway, match_id: MatchId, first_start: u64) -> usize {
        let mut detections = RallyDetections::default();
        detections.maps.ball_positions.push(FrameOffset(0), coords(1));

        let mut failures = 0;
        for i in 0..50u64 {
            let start = first_start + i * 200;
            let rally = new_rally(match_id, i as u32, start, start + 99);
            match gw.save_rally(&rally).await {
                Ok(id) => {
                    if gw.update_rally(id, &detections).await.is_err() {
                        failures += 1;
                    }
                }
                Err(_) => failures += 1,
            }
        }
        failures
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_two_writers_share_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("vball.db").display());

        let first = SqliteGateway::connect(&url).await.unwrap();
        let match_id = seed_match(first.database(), "/videos/match.mp4").await.unwrap();
        let second = SqliteGateway::connect(&url).await.unwrap();

        let (a, b) = tokio::join!(
            save_run(&first, match_id, 0),
            save_run(&second, match_id, 100)
        );
        assert_eq!(a + b, 0);

        let rallies = first.list_rallies(match_id).await.unwrap();
        assert_eq!(rallies.len(), 100);
        let orders: Vec<u32> = rallies.iter().map(|r| r.order).collect();
        assert_eq!(orders, (0..100).collect::<Vec<_>>());
        assert!(rallies.iter().all(|r| r.detections.ball_positions.len() == 1));
    }
}
