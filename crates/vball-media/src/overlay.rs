//! State label overlays for rally clips.
//!
//! Each run of equal states becomes one `drawtext` filter enabled over the
//! run's frame range, so a clip needs a single encoder pass regardless of
//! how often the state changes.

use std::path::PathBuf;
use vball_models::{GameState, RallyStates};

/// Default overlay font size in pixels.
pub const DEFAULT_FONT_SIZE: u32 = 48;
/// Distance from the top-left corner of the frame.
pub const DEFAULT_MARGIN: u32 = 20;

/// Text styling for clip overlays.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayStyle {
    pub font_size: u32,
    pub margin: u32,
    /// Font file handed to `drawtext`; ffmpeg's fontconfig default otherwise
    pub font_file: Option<PathBuf>,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            font_size: DEFAULT_FONT_SIZE,
            margin: DEFAULT_MARGIN,
            font_file: None,
        }
    }
}

impl OverlayStyle {
    fn font_option(&self) -> String {
        match &self.font_file {
            Some(path) => format!(":fontfile='{}'", escape_value(&path.to_string_lossy())),
            None => String::new(),
        }
    }
}

/// Build the filter chain drawing each frame's state and absolute frame index.
///
/// Returns `None` for an empty state sequence.
pub fn build_overlay_filter(
    start_frame: u64,
    states: &RallyStates,
    style: &OverlayStyle,
) -> Option<String> {
    if states.is_empty() {
        return None;
    }

    let mut filters = Vec::with_capacity(states.runs().len() + 1);
    let mut first = 0u64;
    for run in states.runs() {
        if run.count == 0 {
            continue;
        }
        let last = first + u64::from(run.count) - 1;
        filters.push(state_text(run.state, first, last, style));
        first = last + 1;
    }

    filters.push(frame_counter(start_frame, style));
    Some(filters.join(","))
}

fn state_text(state: GameState, first: u64, last: u64, style: &OverlayStyle) -> String {
    format!(
        "drawtext=text='{}':fontcolor={}:fontsize={}:x={}:y={}{}:enable='between(n,{},{})'",
        state.overlay_text(),
        state.overlay_color(),
        style.font_size,
        style.margin,
        style.margin,
        style.font_option(),
        first,
        last,
    )
}

fn frame_counter(start_frame: u64, style: &OverlayStyle) -> String {
    format!(
        "drawtext=text='%{{eif\\:n+{}\\:d}}':fontcolor=white:fontsize={}:x={}:y={}{}",
        start_frame,
        style.font_size,
        style.margin,
        style.margin * 2 + style.font_size,
        style.font_option(),
    )
}

/// Escape a value placed inside single quotes in a filtergraph.
fn escape_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "'\\''").replace(':', "\\:")
}
