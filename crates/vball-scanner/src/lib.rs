//! Volleyball rally segmentation.
//!
//! A [`MatchScanner`] decodes a match video frame by frame and feeds a
//! [`RallyController`], which classifies fixed-size windows into game states
//! and turns each service-to-dead-ball sequence into a persisted rally with
//! its clip and detections.

pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod projection;
pub mod scanner;

pub use config::{ModelConfig, SetupConfig};
pub use context::{PipelineContext, ScanOverrides};
pub use controller::{RallyController, RallyTarget, ScanSummary, StateSlots, Transition};
pub use error::{ScanError, ScanResult};
pub use logging::{init_tracing, LogFormat, MatchLogger};
pub use projection::{project_detections, Projection};
pub use scanner::MatchScanner;
