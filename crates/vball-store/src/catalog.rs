//! Catalog writes used to seed matches before a scan.
//!
//! The scanner itself only reads the catalog; these helpers back fixtures
//! and operator tooling.

use chrono::{NaiveDate, Utc};
use vball_models::{
    Camera, CameraId, MatchId, Nation, NationId, Player, PlayerId, SeriesId, Team, TeamId, VideoId,
};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

pub async fn insert_team(db: &Database, name: &str, is_national_team: bool) -> StoreResult<TeamId> {
    let now = Utc::now();
    let id = sqlx::query(
        "INSERT INTO team (name, is_national_team, created, updated) VALUES (?, ?, ?, ?)",
    )
    .bind(name)
    .bind(is_national_team)
    .bind(now)
    .bind(now)
    .execute(db.pool())
    .await?
    .last_insert_rowid();
    Ok(TeamId(id))
}

pub async fn get_team(db: &Database, id: TeamId) -> StoreResult<Team> {
    let row: Option<(i64, String, bool)> =
        sqlx::query_as("SELECT id, name, is_national_team FROM team WHERE id = ?")
            .bind(id.0)
            .fetch_optional(db.pool())
            .await?;
    let (id, name, is_national_team) =
        row.ok_or_else(|| StoreError::not_found(format!("team {}", id)))?;
    Ok(Team {
        id: TeamId(id),
        name,
        is_national_team,
    })
}

pub async fn insert_nation(db: &Database, name: &str, display_name: &str) -> StoreResult<NationId> {
    let now = Utc::now();
    let id = sqlx::query(
        "INSERT INTO nation (name, display_name, created, updated) VALUES (?, ?, ?, ?)",
    )
    .bind(name)
    .bind(display_name)
    .bind(now)
    .bind(now)
    .execute(db.pool())
    .await?
    .last_insert_rowid();
    Ok(NationId(id))
}

pub async fn get_nation(db: &Database, id: NationId) -> StoreResult<Nation> {
    let row: Option<(i64, String, String)> =
        sqlx::query_as("SELECT id, name, display_name FROM nation WHERE id = ?")
            .bind(id.0)
            .fetch_optional(db.pool())
            .await?;
    let (id, name, display_name) =
        row.ok_or_else(|| StoreError::not_found(format!("nation {}", id)))?;
    Ok(Nation {
        id: NationId(id),
        name,
        display_name,
    })
}

/// Insert a player. `player.id` is ignored; the new id is returned.
pub async fn insert_player(db: &Database, player: &Player) -> StoreResult<PlayerId> {
    let now = Utc::now();
    let id = sqlx::query(
        r#"INSERT INTO player
           (first_name, last_name, is_male, is_right_handed, role, age, height, weight,
            nation_id, team_id, created, updated)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&player.first_name)
    .bind(&player.last_name)
    .bind(player.is_male)
    .bind(player.is_right_handed)
    .bind(&player.role)
    .bind(player.age)
    .bind(player.height)
    .bind(player.weight)
    .bind(player.nation_id.map(|n| n.0))
    .bind(player.team_id.map(|t| t.0))
    .bind(now)
    .bind(now)
    .execute(db.pool())
    .await?
    .last_insert_rowid();
    Ok(PlayerId(id))
}

pub async fn insert_series(
    db: &Database,
    host: &str,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
) -> StoreResult<SeriesId> {
    let now = Utc::now();
    let id = sqlx::query(
        "INSERT INTO series (host, start_date, end_date, created, updated) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(host)
    .bind(start_date)
    .bind(end_date)
    .bind(now)
    .bind(now)
    .execute(db.pool())
    .await?
    .last_insert_rowid();
    Ok(SeriesId(id))
}

pub async fn insert_camera(db: &Database, angle_name: &str) -> StoreResult<CameraId> {
    let now = Utc::now();
    let id = sqlx::query("INSERT INTO camera (angle_name, created, updated) VALUES (?, ?, ?)")
        .bind(angle_name)
        .bind(now)
        .bind(now)
        .execute(db.pool())
        .await?
        .last_insert_rowid();
    Ok(CameraId(id))
}

pub async fn get_camera(db: &Database, id: CameraId) -> StoreResult<Camera> {
    let row: Option<(i64, String)> = sqlx::query_as("SELECT id, angle_name FROM camera WHERE id = ?")
        .bind(id.0)
        .fetch_optional(db.pool())
        .await?;
    let (id, angle_name) = row.ok_or_else(|| StoreError::not_found(format!("camera {}", id)))?;
    Ok(Camera {
        id: CameraId(id),
        angle_name,
    })
}

pub async fn insert_video(db: &Database, camera_id: CameraId, path: &str) -> StoreResult<VideoId> {
    let now = Utc::now();
    let id = sqlx::query(
        "INSERT INTO video (camera_type_id, path, created, updated) VALUES (?, ?, ?, ?)",
    )
    .bind(camera_id.0)
    .bind(path)
    .bind(now)
    .bind(now)
    .execute(db.pool())
    .await?
    .last_insert_rowid();
    Ok(VideoId(id))
}

pub async fn insert_match(
    db: &Database,
    series_id: SeriesId,
    video_id: VideoId,
    team1_id: TeamId,
    team2_id: TeamId,
) -> StoreResult<MatchId> {
    let now = Utc::now();
    let id = sqlx::query(
        r#"INSERT INTO "match" (series_id, video_id, team1_id, team2_id, created, updated)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(series_id.0)
    .bind(video_id.0)
    .bind(team1_id.0)
    .bind(team2_id.0)
    .bind(now)
    .bind(now)
    .execute(db.pool())
    .await?
    .last_insert_rowid();
    Ok(MatchId(id))
}

/// Seed a series, camera, video, two teams and the match tying them.
pub async fn seed_match(db: &Database, video_path: &str) -> StoreResult<MatchId> {
    let series = insert_series(db, "Test Cup", None, None).await?;
    let camera = insert_camera(db, "behind_baseline").await?;
    let video = insert_video(db, camera, video_path).await?;
    let team1 = insert_team(db, "Home", false).await?;
    let team2 = insert_team(db, "Away", false).await?;
    insert_match(db, series, video, team1, team2).await
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn db() -> Database {
        Database::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_team_roundtrip() {
        let db = db().await;
        let id = insert_team(&db, "Poland", true).await.unwrap();
        let team = get_team(&db, id).await.unwrap();
        assert_eq!(team.name, "Poland");
        assert!(team.is_national_team);

        assert!(get_team(&db, TeamId(999)).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_player_references_nation_and_team() {
        let db = db().await;
        let nation = insert_nation(&db, "POL", "Poland").await.unwrap();
        let team = insert_team(&db, "Poland", true).await.unwrap();
        assert_eq!(get_nation(&db, nation).await.unwrap().display_name, "Poland");

        let player = Player {
            id: PlayerId(0),
            first_name: "Wilfredo".into(),
            last_name: "Leon".into(),
            is_male: true,
            is_right_handed: true,
            role: Some("outside_hitter".into()),
            age: Some(31),
            height: Some(201.0),
            weight: None,
            nation_id: Some(nation),
            team_id: Some(team),
        };
        let id = insert_player(&db, &player).await.unwrap();
        assert!(id.0 > 0);

        let dangling = Player {
            nation_id: Some(NationId(404)),
            ..player
        };
        assert!(insert_player(&db, &dangling).await.is_err());
    }

    #[tokio::test]
    async fn test_seed_match() {
        let db = db().await;
        let match_id = seed_match(&db, "/videos/final.mp4").await.unwrap();
        let (video_path,): (String,) = sqlx::query_as(
            r#"SELECT v.path FROM "match" m JOIN video v ON v.id = m.video_id WHERE m.id = ?"#,
        )
        .bind(match_id.0)
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(video_path, "/videos/final.mp4");

        let camera = get_camera(&db, CameraId(1)).await.unwrap();
        assert_eq!(camera.angle_name, "behind_baseline");
    }
}
