//! YAML configuration for models and match setup.
//!
//! Two files drive a scan: the model config names the classifier and detector
//! weights, the setup config describes the court and where output goes.
//! Unknown keys are rejected in both.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use vball_models::{CourtPolygon, CourtZones, GameState, ObjectLabel};
use vball_vision::{ClassifierConfig, YoloConfig};

use crate::error::{ScanError, ScanResult};

/// Smallest accepted classifier window.
pub const MIN_WINDOW_SIZE: usize = 8;

/// Environment variable consulted when the setup config has no database URL.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

fn read_yaml<T: for<'de> Deserialize<'de>>(path: &Path) -> ScanResult<T> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ScanError::invalid_config(format!("cannot read {}: {}", path.display(), e))
    })?;
    serde_yaml::from_str(&text)
        .map_err(|e| ScanError::invalid_config(format!("{}: {}", path.display(), e)))
}

// ---------------------------------------------------------------------------
// Model config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    pub state_classifier: ClassifierSection,
    pub detectors: DetectorsSection,
}

impl ModelConfig {
    pub fn load(path: impl AsRef<Path>) -> ScanResult<Self> {
        let config: Self = read_yaml(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> ScanResult<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ScanResult<()> {
        validate_window_size(self.state_classifier.window_size)?;
        self.state_classifier.states()?;
        if self.detectors.action.classes.is_empty() {
            return Err(ScanError::invalid_config("detectors.action.classes is empty"));
        }
        if let Some(label) = self
            .detectors
            .action
            .classes
            .iter()
            .find(|label| !label.is_action())
        {
            return Err(ScanError::invalid_config(format!(
                "detectors.action.classes: {} is not an action",
                label
            )));
        }
        Ok(())
    }
}

pub fn validate_window_size(window_size: usize) -> ScanResult<()> {
    if window_size < MIN_WINDOW_SIZE {
        return Err(ScanError::invalid_config(format!(
            "window size must be at least {}, got {}",
            MIN_WINDOW_SIZE, window_size
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassifierSection {
    pub weights_path: PathBuf,
    /// Frames per classified window (N)
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Frames the model samples from each window
    #[serde(default = "default_num_frames")]
    pub num_frames: usize,
    #[serde(default = "default_classifier_input_size")]
    pub input_size: u32,
    #[serde(default = "default_output_name")]
    pub output_name: String,
    /// State name of each logit
    #[serde(default = "default_state_classes")]
    pub classes: Vec<String>,
}

fn default_window_size() -> usize {
    30
}

fn default_num_frames() -> usize {
    16
}

fn default_classifier_input_size() -> u32 {
    224
}

fn default_output_name() -> String {
    "logits".to_string()
}

fn default_state_classes() -> Vec<String> {
    GameState::ALL.iter().map(|s| s.as_str().to_string()).collect()
}

impl ClassifierSection {
    /// Parse the configured class names.
    pub fn states(&self) -> ScanResult<Vec<GameState>> {
        if self.classes.is_empty() {
            return Err(ScanError::invalid_config("state_classifier.classes is empty"));
        }
        self.classes
            .iter()
            .map(|name| {
                name.parse::<GameState>().map_err(|e| {
                    ScanError::invalid_config(format!("state_classifier.classes: {}", e))
                })
            })
            .collect()
    }

    pub fn to_classifier_config(&self) -> ScanResult<ClassifierConfig> {
        Ok(ClassifierConfig {
            weights_path: self.weights_path.clone(),
            num_frames: self.num_frames,
            input_size: self.input_size,
            output_name: self.output_name.clone(),
            classes: self.states()?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectorsSection {
    pub ball: YoloSection,
    pub action: ActionSection,
    #[serde(default)]
    pub player: Option<PlayerSection>,
    #[serde(default)]
    pub pose: Option<YoloSection>,
}

fn default_confidence() -> f32 {
    0.25
}

fn default_nms() -> f32 {
    0.45
}

fn default_detector_input_size() -> u32 {
    640
}

fn yolo_config(
    weights_path: &Path,
    confidence_threshold: f32,
    nms_threshold: f32,
    input_size: u32,
    classes: Vec<ObjectLabel>,
) -> YoloConfig {
    YoloConfig {
        confidence_threshold,
        nms_threshold,
        input_size,
        ..YoloConfig::new(weights_path, classes)
    }
}

/// Ball and pose detectors.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YoloSection {
    pub weights_path: PathBuf,
    #[serde(default = "default_confidence")]
    pub confidence_threshold: f32,
    #[serde(default = "default_nms")]
    pub nms_threshold: f32,
    #[serde(default = "default_detector_input_size")]
    pub input_size: u32,
}

impl YoloSection {
    pub fn to_yolo_config(&self, classes: Vec<ObjectLabel>) -> YoloConfig {
        yolo_config(
            &self.weights_path,
            self.confidence_threshold,
            self.nms_threshold,
            self.input_size,
            classes,
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionSection {
    pub weights_path: PathBuf,
    #[serde(default = "default_confidence")]
    pub confidence_threshold: f32,
    #[serde(default = "default_nms")]
    pub nms_threshold: f32,
    #[serde(default = "default_detector_input_size")]
    pub input_size: u32,
    /// Label of each model class, by name
    #[serde(default = "default_action_classes")]
    pub classes: Vec<ObjectLabel>,
}

fn default_action_classes() -> Vec<ObjectLabel> {
    ObjectLabel::ACTIONS.to_vec()
}

impl ActionSection {
    pub fn to_yolo_config(&self) -> YoloConfig {
        yolo_config(
            &self.weights_path,
            self.confidence_threshold,
            self.nms_threshold,
            self.input_size,
            self.classes.clone(),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlayerSection {
    pub weights_path: PathBuf,
    #[serde(default = "default_confidence")]
    pub confidence_threshold: f32,
    #[serde(default = "default_nms")]
    pub nms_threshold: f32,
    #[serde(default = "default_detector_input_size")]
    pub input_size: u32,
    /// Report mask-derived boxes from a segmentation model
    #[serde(default)]
    pub use_segmentation: bool,
}

impl PlayerSection {
    pub fn to_yolo_config(&self) -> YoloConfig {
        yolo_config(
            &self.weights_path,
            self.confidence_threshold,
            self.nms_threshold,
            self.input_size,
            vec![ObjectLabel::Player],
        )
    }
}

// ---------------------------------------------------------------------------
// Setup config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetupConfig {
    #[serde(default)]
    pub court: Option<CourtSection>,
    #[serde(default)]
    pub output: OutputSection,
    #[serde(default)]
    pub database: DatabaseSection,
}

impl SetupConfig {
    pub fn load(path: impl AsRef<Path>) -> ScanResult<Self> {
        read_yaml(path.as_ref())
    }

    pub fn from_yaml(text: &str) -> ScanResult<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn court_zones(&self) -> Option<CourtZones> {
        self.court.as_ref().map(|c| CourtZones {
            main: c.zones.main.clone(),
            front: c.zones.front.clone(),
        })
    }

    /// Database URL from the file, falling back to `DATABASE_URL`.
    pub fn database_url(&self) -> ScanResult<String> {
        self.database
            .url
            .clone()
            .or_else(|| std::env::var(DATABASE_URL_ENV).ok())
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                ScanError::invalid_config(format!(
                    "no database.url in setup config and {} is unset",
                    DATABASE_URL_ENV
                ))
            })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CourtSection {
    pub zones: ZonesSection,
}

/// Court zones as four `[x, y]` vertices each.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZonesSection {
    pub main: CourtPolygon,
    pub front: CourtPolygon,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSection {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    /// Draw state labels and frame numbers on clips
    #[serde(default = "default_overlay")]
    pub overlay: bool,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            overlay: default_overlay(),
        }
    }
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_overlay() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSection {
    #[serde(default)]
    pub url: Option<String>,
}
