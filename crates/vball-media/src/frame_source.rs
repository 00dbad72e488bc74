//! Random-access frame reader over a video file.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tokio::process::ChildStdout;
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegProcess, FfmpegRunner, PipeMode, PIPE};
use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;
use crate::probe::{probe_video, VideoInfo};

/// Source of decoded frames addressed by zero-based index.
#[async_trait]
pub trait FrameSource: Send {
    /// Stream properties, including the frame count bounding all indices.
    fn info(&self) -> &VideoInfo;

    /// Read the frame at `index`; `Ok(None)` means end of stream.
    async fn read(&mut self, index: u64) -> MediaResult<Option<Frame>>;
}

/// Frame source backed by an FFmpeg rawvideo decoder.
///
/// Sequential reads stream from one decoder process. Any other index
/// restarts the decoder at that frame.
pub struct FfmpegFrameSource {
    path: PathBuf,
    info: VideoInfo,
    decoder: Option<Decoder>,
}

struct Decoder {
    process: FfmpegProcess,
    stdout: ChildStdout,
    next_index: u64,
}

impl FfmpegFrameSource {
    /// Probe and open a video for reading.
    pub async fn open(path: impl AsRef<Path>) -> MediaResult<Self> {
        let path = path.as_ref().to_path_buf();
        let info = probe_video(&path).await?;

        info!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            fps = info.fps,
            frame_count = info.frame_count,
            "Opened video"
        );

        Ok(Self {
            path,
            info,
            decoder: None,
        })
    }

    fn start_decoder(&mut self, index: u64) -> MediaResult<()> {
        let mut cmd = FfmpegCommand::new(&self.path, PIPE);
        if index > 0 {
            cmd = cmd.video_filter(seek_filter(index));
        }
        let cmd = cmd.raw_rgb_output();

        let mut process = FfmpegRunner::new().spawn(&cmd, PipeMode::Read)?;
        let stdout = process
            .child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("Failed to capture FFmpeg stdout"))?;

        debug!(index, "Started decoder");
        self.decoder = Some(Decoder {
            process,
            stdout,
            next_index: index,
        });
        Ok(())
    }
}

/// Frame-accurate seek: drop every frame before `index`.
fn seek_filter(index: u64) -> String {
    format!("select=gte(n\\,{})", index)
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    async fn read(&mut self, index: u64) -> MediaResult<Option<Frame>> {
        if index >= self.info.frame_count {
            return Ok(None);
        }

        let sequential = matches!(&self.decoder, Some(d) if d.next_index == index);
        if !sequential {
            self.decoder = None;
            self.start_decoder(index)?;
        }

        let (width, height) = (self.info.width, self.info.height);
        let mut buf = vec![0u8; self.info.frame_bytes()];
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| MediaError::internal("Decoder not running"))?;

        match decoder.stdout.read_exact(&mut buf).await {
            Ok(_) => {
                decoder.next_index += 1;
                Frame::new(width, height, buf).map(Some)
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                debug!(index, "Decoder reached end of stream");
                if let Some(mut finished) = self.decoder.take() {
                    let _ = finished.process.child.kill().await;
                }
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory frame source, used to drive the pipeline without a decoder.
pub struct MemoryFrameSource {
    info: VideoInfo,
    frames: Vec<Frame>,
}

impl MemoryFrameSource {
    /// Build from frames that all share the first frame's size.
    pub fn new(frames: Vec<Frame>, fps: f64) -> Self {
        let (width, height) = frames
            .first()
            .map(|f| (f.width(), f.height()))
            .unwrap_or((0, 0));
        let frame_count = frames.len() as u64;
        Self {
            info: VideoInfo {
                width,
                height,
                fps,
                frame_count,
                duration: if fps > 0.0 { frame_count as f64 / fps } else { 0.0 },
                codec: "rawvideo".to_string(),
            },
            frames,
        }
    }

    /// `count` identical frames.
    pub fn uniform(count: usize, width: u32, height: u32, fps: f64) -> Self {
        let frame = Frame::filled(width, height, [0, 0, 0]);
        Self::new(vec![frame; count], fps)
    }
}

#[async_trait]
impl FrameSource for MemoryFrameSource {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    async fn read(&mut self, index: u64) -> MediaResult<Option<Frame>> {
        Ok(usize::try_from(index)
            .ok()
            .and_then(|i| self.frames.get(i))
            .cloned())
    }
}
