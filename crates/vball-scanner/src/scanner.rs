//! Match scanning: resolve the match, decode its video, drive the controller.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn, Instrument};
use vball_media::{FfmpegFrameSource, FrameSource};
use vball_models::{Match, MatchId};

use crate::context::PipelineContext;
use crate::controller::{RallyController, RallyTarget, ScanSummary};
use crate::error::{ScanError, ScanResult};
use crate::logging::MatchLogger;

/// Scans whole matches with one shared set of models.
#[derive(Clone)]
pub struct MatchScanner {
    ctx: Arc<PipelineContext>,
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl MatchScanner {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self {
            ctx,
            cancel_rx: None,
        }
    }

    /// Stop between frames once the flag turns true. The rally in progress
    /// is discarded.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Resolve the match and its video, then scan every frame.
    pub async fn scan(&self, match_id: MatchId) -> ScanResult<ScanSummary> {
        let logger = MatchLogger::new(match_id, "scan_match");
        let span = logger.create_span();
        self.scan_match(match_id, &logger).instrument(span).await
    }

    async fn scan_match(&self, match_id: MatchId, logger: &MatchLogger) -> ScanResult<ScanSummary> {
        let m = self.ctx.persistence.get_match(match_id).await?;
        let video = self.ctx.persistence.get_video(m.video_id).await?;
        logger.log_start(&video.path);

        let mut source = FfmpegFrameSource::open(&video.path)
            .await
            .map_err(ScanError::video_open)?;

        let summary = self.scan_source(&m, &mut source).await?;
        logger.log_completion(&format!(
            "{} rallies emitted from {} frames",
            summary.rallies_emitted, summary.frames_ingested
        ));
        Ok(summary)
    }

    /// Scan frames `[0, frame_count)` of an already opened source.
    ///
    /// A failed or short read ends the scan like the end of the video.
    pub async fn scan_source(
        &self,
        m: &Match,
        source: &mut dyn FrameSource,
    ) -> ScanResult<ScanSummary> {
        let info = source.info().clone();
        info!(
            match_id = %m.id,
            frames = info.frame_count,
            fps = info.fps,
            width = info.width,
            height = info.height,
            window_size = self.ctx.window_size,
            "Scanning video"
        );

        let mut controller = RallyController::new(Arc::clone(&self.ctx), RallyTarget::new(m, &info));

        for index in 0..info.frame_count {
            if self.is_cancelled() {
                warn!(match_id = %m.id, frame = index, "Scan cancelled");
                break;
            }
            match source.read(index).await {
                Ok(Some(frame)) => controller.ingest(index, frame).await,
                Ok(None) => {
                    warn!(match_id = %m.id, frame = index, "Video ended before expected frame count");
                    break;
                }
                Err(e) => {
                    warn!(match_id = %m.id, frame = index, error = %e, "Frame read failed, ending scan");
                    break;
                }
            }
        }

        let summary = controller.finish();
        info!(
            match_id = %m.id,
            summary = %serde_json::to_string(&summary).unwrap_or_default(),
            "Scan summary"
        );
        Ok(summary)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_rx.as_ref().is_some_and(|rx| *rx.borrow())
    }
}
