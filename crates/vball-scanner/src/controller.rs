//! Rally segmentation state machine.
//!
//! Frames arrive one at a time. Every `window_size` frames the classifier
//! labels the window, the three state slots shift, and the transition table
//! decides whether the window extends the current rally, closes it, or
//! resets the buffers. Closing a rally writes its clip, saves the row and
//! attaches detections.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use vball_media::{ClipOverlay, Frame, VideoInfo};
use vball_models::{
    GameState, Match, MatchId, NewRally, RallyId, RallyStates, SeriesId, ServiceRecord,
};
use vball_vision::validate_window;

use crate::context::PipelineContext;
use crate::metrics::{self, anomaly};
use crate::projection::project_detections;

/// The last three window labels, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSlots {
    pub before_previous: GameState,
    pub previous: GameState,
    pub current: GameState,
}

impl Default for StateSlots {
    fn default() -> Self {
        Self {
            before_previous: GameState::NoPlay,
            previous: GameState::NoPlay,
            current: GameState::NoPlay,
        }
    }
}

/// What a classified window does to the rally buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Append the window.
    Keep,
    /// Append the window; the service just ended.
    KeepAfterService,
    /// Append a SERVICE window that interrupted play.
    KeepServiceInPlay,
    /// Append the window and emit the rally.
    Close,
    /// Drop the buffer.
    Reset,
}

impl StateSlots {
    pub fn shift(&mut self, label: GameState) {
        self.before_previous = self.previous;
        self.previous = self.current;
        self.current = label;
    }

    pub fn transition(&self) -> Transition {
        use GameState::{NoPlay, Play, Service};
        match (self.current, self.previous, self.before_previous) {
            (Service, Play, _) => Transition::KeepServiceInPlay,
            (Service, _, _) => Transition::Keep,
            (Play, Service, _) => Transition::KeepAfterService,
            (Play, _, _) => Transition::Keep,
            (NoPlay, Service | Play, _) => Transition::Keep,
            (NoPlay, NoPlay, Service | Play) => Transition::Close,
            (NoPlay, NoPlay, NoPlay) => Transition::Reset,
        }
    }
}

/// Counters reported when a scan ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub frames_ingested: u64,
    pub windows_classified: u64,
    pub invalid_windows: u64,
    pub service_inside_play: u64,
    pub rallies_emitted: u64,
    /// Rallies whose row could not be saved
    pub rallies_lost: u64,
    /// Rallies dropped at shutdown or because frames were missing
    pub rallies_discarded: u64,
    pub detection_failures: u64,
    pub update_failures: u64,
    pub clip_failures: u64,
}

/// The match and video a controller segments.
#[derive(Debug, Clone, PartialEq)]
pub struct RallyTarget {
    pub match_id: MatchId,
    pub series_id: SeriesId,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

impl RallyTarget {
    pub fn new(m: &Match, video: &VideoInfo) -> Self {
        Self {
            match_id: m.id,
            series_id: m.series_id,
            fps: video.fps,
            width: video.width,
            height: video.height,
        }
    }
}

/// Accumulated frames of the rally in progress.
#[derive(Debug, Default)]
struct RallyBuffer {
    indices: Vec<u64>,
    frames: Vec<Frame>,
    labels: Vec<GameState>,
}

impl RallyBuffer {
    fn extend(&mut self, indices: Vec<u64>, frames: Vec<Frame>, label: GameState) {
        self.labels.extend(std::iter::repeat(label).take(frames.len()));
        self.indices.extend(indices);
        self.frames.extend(frames);
    }

    fn len(&self) -> usize {
        self.frames.len()
    }

    fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// True when no frame is missing between the first and the last.
    /// A gapped buffer is never emitted; `close` discards it.
    fn is_contiguous(&self) -> bool {
        self.indices.windows(2).all(|w| w[1] == w[0] + 1)
    }
}

/// Turns a stream of frames into persisted rallies.
pub struct RallyController {
    ctx: Arc<PipelineContext>,
    target: RallyTarget,
    slots: StateSlots,
    window_indices: Vec<u64>,
    window_frames: Vec<Frame>,
    rally: RallyBuffer,
    service_last_offset: Option<usize>,
    rally_counter: u32,
    summary: ScanSummary,
}

impl RallyController {
    pub fn new(ctx: Arc<PipelineContext>, target: RallyTarget) -> Self {
        let window_size = ctx.window_size;
        Self {
            ctx,
            target,
            slots: StateSlots::default(),
            window_indices: Vec::with_capacity(window_size),
            window_frames: Vec::with_capacity(window_size),
            rally: RallyBuffer::default(),
            service_last_offset: None,
            rally_counter: 0,
            summary: ScanSummary::default(),
        }
    }

    pub fn slots(&self) -> StateSlots {
        self.slots
    }

    pub fn rally_counter(&self) -> u32 {
        self.rally_counter
    }

    pub fn summary(&self) -> &ScanSummary {
        &self.summary
    }

    /// Feed the next frame.
    pub async fn ingest(&mut self, frame_index: u64, frame: Frame) {
        self.window_indices.push(frame_index);
        self.window_frames.push(frame);
        self.summary.frames_ingested += 1;

        if self.window_frames.len() < self.ctx.window_size {
            return;
        }

        let indices = std::mem::take(&mut self.window_indices);
        let frames = std::mem::take(&mut self.window_frames);

        let Some(label) = self.classify(&indices, &frames).await else {
            return;
        };

        self.slots.shift(label);
        self.summary.windows_classified += 1;
        metrics::record_window(label);

        let transition = self.slots.transition();
        debug!(
            first_frame = indices.first().copied().unwrap_or_default(),
            state = %label,
            ?transition,
            "Window classified"
        );

        match transition {
            Transition::Keep => self.rally.extend(indices, frames, label),
            Transition::KeepAfterService => {
                if self.service_last_offset.is_none() {
                    self.service_last_offset = self.rally.len().checked_sub(1);
                }
                self.rally.extend(indices, frames, label);
            }
            Transition::KeepServiceInPlay => {
                self.summary.service_inside_play += 1;
                metrics::record_anomaly(anomaly::SERVICE_INSIDE_PLAY);
                warn!(
                    match_id = %self.target.match_id,
                    first_frame = indices.first().copied().unwrap_or_default(),
                    "Service window inside play, keeping rally open"
                );
                self.rally.extend(indices, frames, label);
            }
            Transition::Close => {
                self.rally.extend(indices, frames, label);
                self.close().await;
            }
            Transition::Reset => self.reset(),
        }
    }

    /// End of stream. A rally still in progress is discarded.
    pub fn finish(mut self) -> ScanSummary {
        if !self.rally.is_empty() {
            self.summary.rallies_discarded += 1;
            metrics::record_rally("discarded", self.rally.len());
            info!(
                match_id = %self.target.match_id,
                frames = self.rally.len(),
                "Discarding rally in progress at end of scan"
            );
        }
        self.summary
    }

    async fn classify(&mut self, indices: &[u64], frames: &[Frame]) -> Option<GameState> {
        let result = match validate_window(
            frames,
            self.ctx.window_size,
            self.target.width,
            self.target.height,
        ) {
            Ok(()) => self.ctx.classifier.classify(frames).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(label) => Some(label),
            Err(e) => {
                self.summary.invalid_windows += 1;
                metrics::record_anomaly(anomaly::INVALID_WINDOW);
                warn!(
                    match_id = %self.target.match_id,
                    classifier = self.ctx.classifier.name(),
                    first_frame = indices.first().copied().unwrap_or_default(),
                    error = %e,
                    "Window skipped"
                );
                None
            }
        }
    }

    fn reset(&mut self) {
        self.rally = RallyBuffer::default();
        self.service_last_offset = None;
    }

    async fn close(&mut self) {
        let rally = std::mem::take(&mut self.rally);
        let service_offset = self.service_last_offset.take();

        if rally.is_empty() {
            return;
        }
        if !rally.is_contiguous() {
            self.summary.rallies_discarded += 1;
            metrics::record_rally("discarded", rally.len());
            warn!(
                match_id = %self.target.match_id,
                start_frame = rally.indices[0],
                frames = rally.len(),
                "Rally has skipped windows, discarding"
            );
            return;
        }

        let order = self.rally_counter;
        self.emit(rally, service_offset, order).await;
        self.rally_counter += 1;
    }

    /// `{base}/{series}/{match}/rallies/rally_{order}_start_{start}.mp4`
    pub fn clip_path(&self, order: u32, start_frame: u64) -> PathBuf {
        self.ctx
            .output_dir
            .join(self.target.series_id.to_string())
            .join(self.target.match_id.to_string())
            .join("rallies")
            .join(format!("rally_{}_start_{}.mp4", order, start_frame))
    }

    async fn emit(&mut self, rally: RallyBuffer, service_offset: Option<usize>, order: u32) {
        let started = Instant::now();
        let (start_frame, end_frame) = match (rally.indices.first(), rally.indices.last()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => return,
        };

        let rally_states = RallyStates::encode(&rally.labels);
        // Ace or service error: play never followed the service.
        let service_offset =
            service_offset.or_else(|| rally_states.last_offset_of(GameState::Service));

        let clip_path = self.clip_path(order, start_frame);
        let overlay = self.ctx.overlay.then_some(ClipOverlay {
            start_frame,
            states: &rally_states,
        });
        if let Err(e) = self
            .ctx
            .clip_writer
            .write_clip(&clip_path, &rally.frames, self.target.fps, overlay)
            .await
        {
            self.summary.clip_failures += 1;
            metrics::record_anomaly(anomaly::CLIP_FAILURE);
            warn!(
                match_id = %self.target.match_id,
                clip_path = %clip_path.display(),
                error = %e,
                "Clip write failed, saving rally anyway"
            );
        }

        let record = NewRally {
            match_id: self.target.match_id,
            order,
            start_frame,
            end_frame,
            clip_path: clip_path.to_string_lossy().into_owned(),
            rally_states,
            service: service_offset.map(|o| ServiceRecord::ending_at(start_frame, o as u32)),
        };

        let rally_id = match self.ctx.persistence.save_rally(&record).await {
            Ok(id) => id,
            Err(e) => {
                self.summary.rallies_lost += 1;
                metrics::record_rally("lost", rally.len());
                error!(
                    match_id = %self.target.match_id,
                    start_frame,
                    end_frame,
                    error = %e,
                    "Failed to save rally"
                );
                return;
            }
        };
        self.summary.rallies_emitted += 1;
        metrics::record_rally("saved", rally.len());

        self.attach_detections(rally_id, &rally.frames, service_offset)
            .await;

        metrics::record_emit_duration(started.elapsed().as_secs_f64());
        info!(
            match_id = %self.target.match_id,
            rally_id = %rally_id,
            order,
            start_frame,
            end_frame,
            service_end = ?service_offset,
            "Rally emitted"
        );
    }

    async fn attach_detections(
        &mut self,
        rally_id: RallyId,
        frames: &[Frame],
        service_offset: Option<usize>,
    ) {
        let projection = project_detections(
            &self.ctx.detectors,
            frames,
            self.ctx.window_size,
            service_offset,
            self.ctx.court.as_ref(),
        )
        .await;

        for _ in 0..projection.failures {
            metrics::record_anomaly(anomaly::DETECTION_FAILURE);
        }
        self.summary.detection_failures += projection.failures as u64;

        if let Err(e) = self
            .ctx
            .persistence
            .update_rally(rally_id, &projection.detections)
            .await
        {
            self.summary.update_failures += 1;
            metrics::record_anomaly(anomaly::UPDATE_FAILURE);
            error!(
                rally_id = %rally_id,
                error = %e,
                "Failed to attach detections, row kept without them"
            );
        }
    }
}
