//! Rally segmentation scenarios driven by scripted models.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use vball_media::{ClipOverlay, ClipWriter, Frame, MediaResult, MemoryFrameSource};
use vball_models::{
    BoundingBox, CameraId, FrameOffset, GameState, Match, MatchId, NewRally, ObjectLabel, Rally,
    RallyDetections, RallyId, Series, SeriesId, TeamId, Video, VideoId,
};
use vball_scanner::{MatchScanner, PipelineContext, ScanSummary};
use vball_store::catalog::seed_match;
use vball_store::{Database, PersistenceGateway, SqliteGateway, StoreError, StoreResult};
use vball_vision::{DetectorSet, ObjectDetector, StateClassifier, VisionError, VisionResult};

use GameState::{NoPlay, Play, Service};

const N: usize = 30;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Returns scripted labels in order; `None` entries fail the window.
struct ScriptedClassifier {
    script: Mutex<VecDeque<Option<GameState>>>,
}

impl ScriptedClassifier {
    fn new(script: Vec<Option<GameState>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
        }
    }
}

#[async_trait]
impl StateClassifier for ScriptedClassifier {
    async fn classify(&self, _window: &[Frame]) -> VisionResult<GameState> {
        match self.script.lock().unwrap().pop_front() {
            Some(Some(state)) => Ok(state),
            Some(None) => Err(VisionError::invalid_window("empty model output")),
            None => Ok(NoPlay),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct BallEveryFrame;

#[async_trait]
impl ObjectDetector for BallEveryFrame {
    async fn detect_batch(
        &self,
        frames: &[Frame],
        _exclude: &[ObjectLabel],
    ) -> VisionResult<Vec<Vec<BoundingBox>>> {
        Ok(frames
            .iter()
            .map(|_| vec![BoundingBox::new(1, 1, 3, 3, ObjectLabel::Ball, 0.9)])
            .collect())
    }

    fn name(&self) -> &'static str {
        "ball-every-frame"
    }
}

struct NoActions;

#[async_trait]
impl ObjectDetector for NoActions {
    async fn detect_batch(
        &self,
        frames: &[Frame],
        _exclude: &[ObjectLabel],
    ) -> VisionResult<Vec<Vec<BoundingBox>>> {
        Ok(vec![Vec::new(); frames.len()])
    }

    fn name(&self) -> &'static str {
        "no-actions"
    }
}

#[derive(Default)]
struct RecordingGateway {
    saved: Mutex<Vec<NewRally>>,
    updates: Mutex<Vec<(RallyId, RallyDetections)>>,
    fail_saves: bool,
}

#[async_trait]
impl PersistenceGateway for RecordingGateway {
    async fn save_rally(&self, rally: &NewRally) -> StoreResult<RallyId> {
        if self.fail_saves {
            return Err(StoreError::invalid_rally("store unavailable"));
        }
        let mut saved = self.saved.lock().unwrap();
        saved.push(rally.clone());
        Ok(RallyId(saved.len() as i64))
    }

    async fn update_rally(&self, id: RallyId, detections: &RallyDetections) -> StoreResult<()> {
        self.updates.lock().unwrap().push((id, detections.clone()));
        Ok(())
    }

    async fn get_match(&self, id: MatchId) -> StoreResult<Match> {
        Ok(test_match_with_id(id))
    }

    async fn get_video(&self, id: VideoId) -> StoreResult<Video> {
        Ok(Video {
            id,
            camera_id: CameraId(1),
            path: "/videos/match.mp4".to_string(),
        })
    }

    async fn get_series(&self, id: SeriesId) -> StoreResult<Series> {
        Ok(Series {
            id,
            host: "Test Cup".to_string(),
            start_date: None,
            end_date: None,
        })
    }

    async fn list_rallies(&self, _match_id: MatchId) -> StoreResult<Vec<Rally>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct WrittenClip {
    path: PathBuf,
    frames: usize,
    overlay: bool,
}

#[derive(Default)]
struct RecordingClipWriter {
    clips: Mutex<Vec<WrittenClip>>,
}

#[async_trait]
impl ClipWriter for RecordingClipWriter {
    async fn write_clip(
        &self,
        path: &Path,
        frames: &[Frame],
        _fps: f64,
        overlay: Option<ClipOverlay<'_>>,
    ) -> MediaResult<()> {
        self.clips.lock().unwrap().push(WrittenClip {
            path: path.to_path_buf(),
            frames: frames.len(),
            overlay: overlay.is_some(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn test_match_with_id(id: MatchId) -> Match {
    Match {
        id,
        team1_id: TeamId(1),
        team2_id: TeamId(2),
        series_id: SeriesId(5),
        video_id: VideoId(3),
    }
}

fn test_match() -> Match {
    test_match_with_id(MatchId(7))
}

fn labels(states: &[GameState]) -> Vec<Option<GameState>> {
    states.iter().copied().map(Some).collect()
}

struct Run {
    summary: ScanSummary,
    gateway: Arc<RecordingGateway>,
    clips: Arc<RecordingClipWriter>,
}

impl Run {
    fn saved(&self) -> Vec<NewRally> {
        self.gateway.saved.lock().unwrap().clone()
    }

    fn updates(&self) -> Vec<(RallyId, RallyDetections)> {
        self.gateway.updates.lock().unwrap().clone()
    }

    fn clips(&self) -> Vec<WrittenClip> {
        self.clips.clips.lock().unwrap().clone()
    }
}

fn context(
    script: Vec<Option<GameState>>,
    gateway: Arc<dyn PersistenceGateway>,
    clips: Arc<RecordingClipWriter>,
) -> PipelineContext {
    let detectors = DetectorSet::new(Arc::new(BallEveryFrame), Arc::new(NoActions));
    PipelineContext::new(
        Arc::new(ScriptedClassifier::new(script)),
        detectors,
        gateway,
        clips,
        "/clips",
        N,
    )
    .unwrap()
}

async fn scan_with(
    script: Vec<Option<GameState>>,
    frame_count: usize,
    gateway: RecordingGateway,
) -> Run {
    let gateway = Arc::new(gateway);
    let clips = Arc::new(RecordingClipWriter::default());
    let ctx = context(script, gateway.clone(), clips.clone());
    let scanner = MatchScanner::new(Arc::new(ctx));
    let mut source = MemoryFrameSource::uniform(frame_count, 4, 4, 30.0);
    let summary = scanner
        .scan_source(&test_match(), &mut source)
        .await
        .unwrap();
    Run {
        summary,
        gateway,
        clips,
    }
}

async fn scan(states: &[GameState]) -> Run {
    scan_with(labels(states), states.len() * N, RecordingGateway::default()).await
}

/// Invariants every emitted rally must satisfy.
fn assert_rally_invariants(rallies: &[NewRally], frame_count: u64) {
    for rally in rallies {
        assert!(rally.start_frame < rally.end_frame);
        assert!(rally.end_frame < frame_count);

        let expanded = rally.rally_states.decode();
        assert_eq!(expanded.len() as u64, rally.end_frame - rally.start_frame + 1);

        if let Some(end_index) = rally.service.as_ref().and_then(|s| s.end_index) {
            assert_eq!(expanded[end_index as usize], Service);
        }
    }
    for pair in rallies.windows(2) {
        assert!(pair[0].end_frame < pair[1].start_frame);
        assert_eq!(pair[0].order + 1, pair[1].order);
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_nominal_rally() {
    let run = scan(&[NoPlay, NoPlay, Service, Play, Play, NoPlay, NoPlay, NoPlay]).await;
    let saved = run.saved();
    assert_eq!(saved.len(), 1);

    let rally = &saved[0];
    assert_eq!(rally.start_frame, 60);
    assert_eq!(rally.end_frame, 209);
    assert_eq!(rally.order, 0);
    assert_eq!(rally.rally_states.frame_count(), 150);
    let service = rally.service.as_ref().unwrap();
    assert_eq!(service.end_index, Some(29));
    assert_eq!(service.end_frame, Some(89));
    assert_eq!(rally.clip_path, "/clips/5/7/rallies/rally_0_start_60.mp4");

    let expanded = rally.rally_states.decode();
    assert_eq!(expanded[30], Play);

    assert_eq!(run.summary.rallies_emitted, 1);
    assert_eq!(run.summary.windows_classified, 8);
    assert_rally_invariants(&saved, 240);
}

#[tokio::test]
async fn test_back_to_back_rallies() {
    let run = scan(&[
        NoPlay, Service, Play, NoPlay, NoPlay, Service, Play, NoPlay, NoPlay,
    ])
    .await;
    let saved = run.saved();
    assert_eq!(saved.len(), 2);

    assert_eq!((saved[0].order, saved[1].order), (0, 1));
    // The closing dead-ball window belongs to the rally it closes.
    assert_eq!((saved[0].start_frame, saved[0].end_frame), (30, 149));
    assert_eq!((saved[1].start_frame, saved[1].end_frame), (150, 269));
    assert_eq!(saved[1].service.as_ref().unwrap().end_index, Some(29));
    assert_rally_invariants(&saved, 270);

    let updates = run.updates();
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0].0, RallyId(1));
    assert_eq!(updates[1].0, RallyId(2));
}

#[tokio::test]
async fn test_ace_keeps_service_offset() {
    let run = scan(&[Service, NoPlay, NoPlay]).await;
    let saved = run.saved();
    assert_eq!(saved.len(), 1);

    let rally = &saved[0];
    assert_eq!((rally.start_frame, rally.end_frame), (0, 89));
    assert_eq!(rally.service.as_ref().unwrap().end_index, Some(29));

    let mut expected = vec![Service; 30];
    expected.extend(vec![NoPlay; 60]);
    assert_eq!(rally.rally_states.decode(), expected);
}

#[tokio::test]
async fn test_service_inside_play_does_not_close() {
    let run = scan(&[Service, Play, Play, Service, Play, NoPlay, NoPlay]).await;
    let saved = run.saved();
    assert_eq!(saved.len(), 1);

    let rally = &saved[0];
    assert_eq!((rally.start_frame, rally.end_frame), (0, 209));
    assert_eq!(rally.service.as_ref().unwrap().end_index, Some(29));

    let runs: Vec<(GameState, u32)> = rally
        .rally_states
        .runs()
        .iter()
        .map(|r| (*r).into())
        .collect();
    assert_eq!(
        runs,
        vec![(Service, 30), (Play, 60), (Service, 30), (Play, 30), (NoPlay, 60)]
    );
    assert_eq!(run.summary.service_inside_play, 1);
    assert_rally_invariants(&saved, 210);
}

#[tokio::test]
async fn test_no_rally() {
    let run = scan(&[NoPlay; 20]).await;
    assert!(run.saved().is_empty());
    assert!(run.updates().is_empty());
    assert!(run.clips().is_empty());
    assert_eq!(run.summary.windows_classified, 20);
    assert_eq!(run.summary, ScanSummary {
        frames_ingested: 600,
        windows_classified: 20,
        ..ScanSummary::default()
    });
}

#[tokio::test]
async fn test_ball_map_covers_every_frame() {
    let run = scan(&[Service, NoPlay, NoPlay]).await;
    let updates = run.updates();
    assert_eq!(updates.len(), 1);

    let balls = &updates[0].1.maps.ball_positions;
    assert_eq!(balls.len(), 90);
    let offsets: Vec<u32> = balls.offsets().map(FrameOffset::get).collect();
    assert_eq!(offsets, (0..90).collect::<Vec<_>>());
    assert!(updates[0].1.service_hitter.is_none());
}

#[tokio::test]
async fn test_repeated_update_is_idempotent_in_store() {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    let match_id = seed_match(&db, "/videos/match.mp4").await.unwrap();
    let store = Arc::new(SqliteGateway::new(db));

    let clips = Arc::new(RecordingClipWriter::default());
    let ctx = context(labels(&[Service, NoPlay, NoPlay]), store.clone(), clips);
    let scanner = MatchScanner::new(Arc::new(ctx));
    let m = store.get_match(match_id).await.unwrap();
    let mut source = MemoryFrameSource::uniform(90, 4, 4, 30.0);
    let summary = scanner.scan_source(&m, &mut source).await.unwrap();
    assert_eq!(summary.rallies_emitted, 1);

    let first = store.list_rallies(match_id).await.unwrap().remove(0);
    assert_eq!(first.detections.ball_positions.len(), 90);
    assert_eq!(first.order, 0);

    let detections = RallyDetections {
        maps: first.detections.clone(),
        ..RallyDetections::default()
    };
    store.update_rally(first.id, &detections).await.unwrap();
    store.update_rally(first.id, &detections).await.unwrap();

    let again = store.list_rallies(match_id).await.unwrap().remove(0);
    assert_eq!(again.detections, first.detections);
    assert_eq!(again.service, first.service);
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_invalid_window_outside_rally_is_skipped() {
    let script = vec![None, Some(Service), Some(Play), Some(NoPlay), Some(NoPlay)];
    let run = scan_with(script, 5 * N, RecordingGateway::default()).await;

    let saved = run.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!((saved[0].start_frame, saved[0].end_frame), (30, 149));
    assert_eq!(run.summary.invalid_windows, 1);
    assert_eq!(run.summary.windows_classified, 4);
}

#[tokio::test]
async fn test_invalid_window_inside_rally_discards_it() {
    let script = vec![Some(Service), None, Some(Play), Some(NoPlay), Some(NoPlay)];
    let run = scan_with(script, 5 * N, RecordingGateway::default()).await;

    assert!(run.saved().is_empty());
    assert!(run.clips().is_empty());
    assert_eq!(run.summary.invalid_windows, 1);
    assert_eq!(run.summary.rallies_discarded, 1);
}

#[tokio::test]
async fn test_rally_open_at_end_is_discarded() {
    let run = scan(&[Service, Play, NoPlay]).await;
    assert!(run.saved().is_empty());
    assert!(run.clips().is_empty());
    assert_eq!(run.summary.rallies_discarded, 1);
}

#[tokio::test]
async fn test_video_shorter_than_window() {
    let run = scan_with(labels(&[Service]), N - 10, RecordingGateway::default()).await;
    assert!(run.saved().is_empty());
    assert_eq!(run.summary.frames_ingested, 20);
    assert_eq!(run.summary.windows_classified, 0);
    assert_eq!(run.summary.rallies_discarded, 0);
}

#[tokio::test]
async fn test_failed_save_loses_rally_but_keeps_clip() {
    let gateway = RecordingGateway {
        fail_saves: true,
        ..RecordingGateway::default()
    };
    let states = [Service, Play, NoPlay, NoPlay, Service, Play, NoPlay, NoPlay];
    let run = scan_with(labels(&states), states.len() * N, gateway).await;

    assert_eq!(run.summary.rallies_lost, 2);
    assert_eq!(run.summary.rallies_emitted, 0);
    assert!(run.updates().is_empty());

    let clips = run.clips();
    assert_eq!(clips.len(), 2);
    assert!(clips[0].path.ends_with("rally_0_start_0.mp4"));
    assert!(clips[1].path.ends_with("rally_1_start_120.mp4"));
    assert_eq!(clips[0].frames, 120);
    assert!(clips[0].overlay);
}

#[tokio::test]
async fn test_overlay_can_be_disabled() {
    let gateway = Arc::new(RecordingGateway::default());
    let clips = Arc::new(RecordingClipWriter::default());
    let ctx = context(labels(&[Service, NoPlay, NoPlay]), gateway, clips.clone()).with_overlay(false);
    let scanner = MatchScanner::new(Arc::new(ctx));
    let mut source = MemoryFrameSource::uniform(90, 4, 4, 30.0);
    scanner.scan_source(&test_match(), &mut source).await.unwrap();

    assert!(!clips.clips.lock().unwrap()[0].overlay);
}

#[tokio::test]
async fn test_cancelled_scan_reads_nothing() {
    let gateway = Arc::new(RecordingGateway::default());
    let clips = Arc::new(RecordingClipWriter::default());
    let ctx = context(labels(&[Service, NoPlay, NoPlay]), gateway.clone(), clips);
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let scanner = MatchScanner::new(Arc::new(ctx)).with_cancel(rx);
    let mut source = MemoryFrameSource::uniform(90, 4, 4, 30.0);
    let summary = scanner.scan_source(&test_match(), &mut source).await.unwrap();

    assert_eq!(summary.frames_ingested, 0);
    assert!(gateway.saved.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_runs_are_deterministic() {
    let states = [NoPlay, Service, Play, NoPlay, NoPlay, Service, NoPlay, NoPlay];
    let first = scan(&states).await;
    let second = scan(&states).await;
    assert_eq!(first.saved(), second.saved());
    assert_eq!(first.updates(), second.updates());
    assert_eq!(first.summary, second.summary);
}

#[tokio::test]
async fn test_unknown_video_is_reported() {
    // No ffmpeg is needed to fail opening a file that does not exist.
    let gateway = Arc::new(RecordingGateway::default());
    let clips = Arc::new(RecordingClipWriter::default());
    let ctx = context(Vec::new(), gateway, clips);
    let err = MatchScanner::new(Arc::new(ctx))
        .scan(MatchId(7))
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 3);
}
