//! Rally clip encoding.

use async_trait::async_trait;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use vball_models::RallyStates;

use crate::command::{FfmpegCommand, FfmpegRunner, PipeMode, PIPE};
use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;
use crate::overlay::{build_overlay_filter, OverlayStyle};

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default encoding preset
pub const DEFAULT_PRESET: &str = "fast";
/// Default CRF (Constant Rate Factor)
pub const DEFAULT_CRF: u8 = 20;
/// Default output pixel format, playable everywhere
pub const DEFAULT_PIXEL_FORMAT: &str = "yuv420p";

/// Label overlay drawn onto a clip.
#[derive(Debug, Clone, Copy)]
pub struct ClipOverlay<'a> {
    /// Absolute index of the clip's first frame
    pub start_frame: u64,
    /// One state per clip frame
    pub states: &'a RallyStates,
}

/// Writes a rally's frames to a video file.
#[async_trait]
pub trait ClipWriter: Send + Sync {
    /// Encode `frames` at `fps` into `path`, creating parent directories.
    async fn write_clip(
        &self,
        path: &Path,
        frames: &[Frame],
        fps: f64,
        overlay: Option<ClipOverlay<'_>>,
    ) -> MediaResult<()>;
}

/// Encoder settings for clips.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipEncoding {
    pub codec: String,
    pub preset: String,
    pub crf: u8,
    pub pixel_format: String,
}

impl Default for ClipEncoding {
    fn default() -> Self {
        Self {
            codec: DEFAULT_VIDEO_CODEC.to_string(),
            preset: DEFAULT_PRESET.to_string(),
            crf: DEFAULT_CRF,
            pixel_format: DEFAULT_PIXEL_FORMAT.to_string(),
        }
    }
}

/// Clip writer piping raw frames into an FFmpeg encoder.
#[derive(Debug, Clone, Default)]
pub struct FfmpegClipWriter {
    encoding: ClipEncoding,
    style: OverlayStyle,
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl FfmpegClipWriter {
    pub fn new(encoding: ClipEncoding) -> Self {
        Self {
            encoding,
            ..Self::default()
        }
    }

    pub fn with_style(mut self, style: OverlayStyle) -> Self {
        self.style = style;
        self
    }

    /// Kill the encoder when the flag turns true.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    fn build_command(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: f64,
        overlay: Option<ClipOverlay<'_>>,
    ) -> FfmpegCommand {
        let mut cmd = FfmpegCommand::new(PIPE, path).raw_rgb_input(width, height, fps);

        if let Some(filter) =
            overlay.and_then(|o| build_overlay_filter(o.start_frame, o.states, &self.style))
        {
            cmd = cmd.video_filter(filter);
        }

        cmd.video_codec(&self.encoding.codec)
            .preset(&self.encoding.preset)
            .crf(self.encoding.crf)
            .pixel_format(&self.encoding.pixel_format)
    }

    fn runner(&self) -> FfmpegRunner {
        match &self.cancel_rx {
            Some(rx) => FfmpegRunner::new().with_cancel(rx.clone()),
            None => FfmpegRunner::new(),
        }
    }
}

#[async_trait]
impl ClipWriter for FfmpegClipWriter {
    async fn write_clip(
        &self,
        path: &Path,
        frames: &[Frame],
        fps: f64,
        overlay: Option<ClipOverlay<'_>>,
    ) -> MediaResult<()> {
        let first = frames
            .first()
            .ok_or_else(|| MediaError::internal("Cannot write a clip without frames"))?;
        let (width, height) = (first.width(), first.height());

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let cmd = self.build_command(path, width, height, fps, overlay);
        let runner = self.runner();
        let mut process = runner.spawn(&cmd, PipeMode::Write)?;
        let mut stdin = process
            .child
            .stdin
            .take()
            .ok_or_else(|| MediaError::internal("Failed to capture FFmpeg stdin"))?;

        debug!(path = %path.display(), frames = frames.len(), "Encoding clip");

        let write_result = write_frames(&mut stdin, frames, width, height).await;
        drop(stdin);
        let wait_result = runner.wait(&mut process).await;

        let result = match (write_result, wait_result) {
            (_, Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        };

        match &result {
            Ok(()) => info!(path = %path.display(), frames = frames.len(), "Clip written"),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Clip encoding failed");
                let _ = tokio::fs::remove_file(path).await;
            }
        }
        result
    }
}

async fn write_frames(
    stdin: &mut ChildStdin,
    frames: &[Frame],
    width: u32,
    height: u32,
) -> MediaResult<()> {
    for frame in frames {
        if frame.width() != width || frame.height() != height {
            return Err(MediaError::FrameSize {
                expected: Frame::byte_len(width, height),
                actual: frame.data().len(),
            });
        }
        stdin.write_all(frame.data()).await?;
    }
    stdin.flush().await?;
    Ok(())
}
