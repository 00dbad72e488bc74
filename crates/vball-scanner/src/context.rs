//! Models, persistence and output settings shared by a scan.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use vball_media::{ClipEncoding, ClipWriter, FfmpegClipWriter};
use vball_models::{CourtZones, ObjectLabel};
use vball_store::PersistenceGateway;
use vball_vision::{
    ActionDetector, BallDetector, DetectorSet, OnnxStateClassifier, PlayerDetector, PoseDetector,
    StateClassifier,
};

use crate::config::{validate_window_size, ModelConfig, SetupConfig};
use crate::error::{ScanError, ScanResult};

/// Command-line values that take precedence over the config files.
#[derive(Debug, Clone, Default)]
pub struct ScanOverrides {
    pub window_size: Option<usize>,
    pub output_dir: Option<PathBuf>,
    pub no_overlay: bool,
}

/// Everything a controller needs. Models are loaded once and shared.
#[derive(Clone)]
pub struct PipelineContext {
    pub classifier: Arc<dyn StateClassifier>,
    pub detectors: DetectorSet,
    pub persistence: Arc<dyn PersistenceGateway>,
    pub clip_writer: Arc<dyn ClipWriter>,
    /// Root of `{series}/{match}/rallies/...`
    pub output_dir: PathBuf,
    /// Frames per classified window (N)
    pub window_size: usize,
    /// Draw state labels on clips
    pub overlay: bool,
    /// Court zones used to split players into teams
    pub court: Option<CourtZones>,
}

impl PipelineContext {
    pub fn new(
        classifier: Arc<dyn StateClassifier>,
        detectors: DetectorSet,
        persistence: Arc<dyn PersistenceGateway>,
        clip_writer: Arc<dyn ClipWriter>,
        output_dir: impl Into<PathBuf>,
        window_size: usize,
    ) -> ScanResult<Self> {
        validate_window_size(window_size)?;
        Ok(Self {
            classifier,
            detectors,
            persistence,
            clip_writer,
            output_dir: output_dir.into(),
            window_size,
            overlay: true,
            court: None,
        })
    }

    pub fn with_overlay(mut self, overlay: bool) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn with_court(mut self, court: Option<CourtZones>) -> Self {
        self.court = court;
        self
    }

    /// Load every configured model and the FFmpeg clip writer.
    pub fn load(
        models: &ModelConfig,
        setup: &SetupConfig,
        persistence: Arc<dyn PersistenceGateway>,
        overrides: &ScanOverrides,
        cancel_rx: Option<watch::Receiver<bool>>,
    ) -> ScanResult<Self> {
        let window_size = overrides
            .window_size
            .unwrap_or(models.state_classifier.window_size);
        let court = setup.court_zones();
        if models.detectors.player.is_some() && court.is_none() {
            return Err(ScanError::invalid_config(
                "detectors.player requires court.zones in the setup config",
            ));
        }

        let classifier = OnnxStateClassifier::new(models.state_classifier.to_classifier_config()?)?;
        let ball = BallDetector::new(models.detectors.ball.to_yolo_config(vec![ObjectLabel::Ball]))?;
        let action = ActionDetector::new(models.detectors.action.to_yolo_config())?;
        let mut detectors = DetectorSet::new(Arc::new(ball), Arc::new(action));

        if let Some(section) = &models.detectors.player {
            let player =
                PlayerDetector::new(section.to_yolo_config(), section.use_segmentation, court.clone())?;
            detectors = detectors.with_player(Arc::new(player));
        }
        if let Some(section) = &models.detectors.pose {
            let pose = PoseDetector::new(section.to_yolo_config(vec![ObjectLabel::Player]))?;
            detectors = detectors.with_pose(Arc::new(pose));
        }

        let mut clip_writer = FfmpegClipWriter::new(ClipEncoding::default());
        if let Some(rx) = cancel_rx {
            clip_writer = clip_writer.with_cancel(rx);
        }

        let output_dir = overrides
            .output_dir
            .clone()
            .unwrap_or_else(|| setup.output.base_dir.clone());

        info!(
            window_size,
            output_dir = %output_dir.display(),
            player = detectors.player.is_some(),
            pose = detectors.pose.is_some(),
            "Models loaded"
        );

        Ok(Self::new(
            Arc::new(classifier),
            detectors,
            persistence,
            Arc::new(clip_writer),
            output_dir,
            window_size,
        )?
        .with_overlay(setup.output.overlay && !overrides.no_overlay)
        .with_court(court))
    }
}
