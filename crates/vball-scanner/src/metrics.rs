//! Scanner metrics.
//!
//! Counters mirror the anomalies collected in [`crate::ScanSummary`]. No
//! exporter is installed here; embedders choose one.

use metrics::{counter, histogram};
use vball_models::GameState;

pub mod names {
    /// Windows classified, by state.
    pub const WINDOWS_TOTAL: &str = "scanner_windows_total";

    /// Anomalies by kind.
    pub const ANOMALIES_TOTAL: &str = "scanner_anomalies_total";

    /// Rally outcomes: saved, lost, discarded.
    pub const RALLIES_TOTAL: &str = "scanner_rallies_total";

    /// Frames per emitted rally.
    pub const RALLY_FRAMES: &str = "scanner_rally_frames";

    /// Time spent emitting one rally, clip and detection included.
    pub const EMIT_SECONDS: &str = "scanner_emit_seconds";
}

/// Anomaly kinds.
pub mod anomaly {
    pub const INVALID_WINDOW: &str = "invalid_window";
    pub const SERVICE_INSIDE_PLAY: &str = "service_inside_play";
    pub const DETECTION_FAILURE: &str = "detection_failure";
    pub const UPDATE_FAILURE: &str = "update_failure";
    pub const CLIP_FAILURE: &str = "clip_failure";
}

pub fn record_window(state: GameState) {
    counter!(names::WINDOWS_TOTAL, "state" => state.as_str()).increment(1);
}

pub fn record_anomaly(kind: &'static str) {
    counter!(names::ANOMALIES_TOTAL, "kind" => kind).increment(1);
}

pub fn record_rally(outcome: &'static str, frames: usize) {
    counter!(names::RALLIES_TOTAL, "outcome" => outcome).increment(1);
    if outcome == "saved" {
        histogram!(names::RALLY_FRAMES).record(frames as f64);
    }
}

pub fn record_emit_duration(seconds: f64) {
    histogram!(names::EMIT_SECONDS).record(seconds);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_prefixed() {
        for name in [
            names::WINDOWS_TOTAL,
            names::ANOMALIES_TOTAL,
            names::RALLIES_TOTAL,
            names::RALLY_FRAMES,
            names::EMIT_SECONDS,
        ] {
            assert!(name.starts_with("scanner_"));
        }
    }

    #[test]
    fn test_recording_without_recorder() {
        record_window(GameState::Play);
        record_anomaly(anomaly::INVALID_WINDOW);
        record_rally("saved", 150);
        record_emit_duration(0.5);
    }
}
