//! FFmpeg CLI wrapper for the rally scanner.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with cancellation
//! - FFprobe stream metadata
//! - A random-access RGB frame source over a video file
//! - Rally clip encoding with per-state label overlays

pub mod clip_writer;
pub mod command;
pub mod error;
pub mod frame;
pub mod frame_source;
pub mod overlay;
pub mod probe;

pub use clip_writer::{ClipEncoding, ClipOverlay, ClipWriter, FfmpegClipWriter};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner, PipeMode};
pub use error::{MediaError, MediaResult};
pub use frame::Frame;
pub use frame_source::{FfmpegFrameSource, FrameSource, MemoryFrameSource};
pub use overlay::{build_overlay_filter, OverlayStyle};
pub use probe::{probe_video, VideoInfo};
