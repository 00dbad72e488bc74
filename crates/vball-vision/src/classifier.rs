//! Game state classification over a window of frames.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use vball_media::Frame;
use vball_models::GameState;

use crate::error::{VisionError, VisionResult};
use crate::preprocess::{clip_tensor, subsample_indices};
use crate::session::{run_blocking, OnnxModel};

/// Classifies a window of consecutive frames as one game state.
#[async_trait]
pub trait StateClassifier: Send + Sync {
    /// Label the window. Fails with [`VisionError::InvalidWindow`] when the
    /// window cannot be classified.
    async fn classify(&self, window: &[Frame]) -> VisionResult<GameState>;

    /// Classifier name for logging.
    fn name(&self) -> &'static str;
}

/// Check a window against the expected length and the video's frame size.
pub fn validate_window(
    window: &[Frame],
    expected_len: usize,
    width: u32,
    height: u32,
) -> VisionResult<()> {
    if window.len() != expected_len {
        return Err(VisionError::invalid_window(format!(
            "expected {} frames, got {}",
            expected_len,
            window.len()
        )));
    }
    if let Some((i, frame)) = window
        .iter()
        .enumerate()
        .find(|(_, f)| f.width() != width || f.height() != height)
    {
        return Err(VisionError::invalid_window(format!(
            "frame {} is {}x{}, video is {}x{}",
            i,
            frame.width(),
            frame.height(),
            width,
            height
        )));
    }
    Ok(())
}

/// Configuration for the ONNX video classifier.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Path to ONNX model file
    pub weights_path: PathBuf,
    /// Frames the model consumes per clip
    pub num_frames: usize,
    /// Square input side in pixels
    pub input_size: u32,
    /// Name of the logits output
    pub output_name: String,
    /// Game state of each logit, in model order
    pub classes: Vec<GameState>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            weights_path: PathBuf::from("models/state_classifier/videomae.onnx"),
            num_frames: 16,
            input_size: 224,
            output_name: "logits".to_string(),
            classes: vec![GameState::Service, GameState::Play, GameState::NoPlay],
        }
    }
}

struct ClassifierInner {
    model: OnnxModel,
    config: ClassifierConfig,
}

impl ClassifierInner {
    fn classify(&self, window: &[Frame]) -> VisionResult<GameState> {
        let first = window
            .first()
            .ok_or_else(|| VisionError::invalid_window("empty window"))?;
        if window
            .iter()
            .any(|f| f.width() != first.width() || f.height() != first.height())
        {
            return Err(VisionError::invalid_window("frames differ in size"));
        }

        let sampled: Vec<&Frame> = subsample_indices(window.len(), self.config.num_frames)
            .into_iter()
            .map(|i| &window[i])
            .collect();
        let (shape, data) = clip_tensor(&sampled, self.config.input_size)?;

        let logits = self
            .model
            .run(shape, data, &[self.config.output_name.as_str()])
            .map_err(|e| VisionError::invalid_window(e.to_string()))?
            .into_iter()
            .next()
            .map(|t| t.data)
            .unwrap_or_default();

        let index = argmax(&logits).ok_or_else(|| VisionError::invalid_window("empty model output"))?;
        let state = self.config.classes.get(index).copied().ok_or_else(|| {
            VisionError::invalid_window(format!(
                "logit {} has no class among {} configured",
                index,
                self.config.classes.len()
            ))
        })?;

        debug!(state = %state, index, "Window classified");
        Ok(state)
    }
}

/// VideoMAE-style classifier run through ONNX Runtime.
#[derive(Clone)]
pub struct OnnxStateClassifier {
    inner: Arc<ClassifierInner>,
}

impl OnnxStateClassifier {
    pub fn new(config: ClassifierConfig) -> VisionResult<Self> {
        if config.num_frames == 0 || config.input_size == 0 {
            return Err(VisionError::invalid_config(
                "classifier num_frames and input_size must be positive",
            ));
        }
        if config.classes.is_empty() {
            return Err(VisionError::invalid_config("classifier needs at least one class"));
        }
        let model = OnnxModel::load(&config.weights_path)?;
        Ok(Self {
            inner: Arc::new(ClassifierInner { model, config }),
        })
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.inner.config
    }
}

#[async_trait]
impl StateClassifier for OnnxStateClassifier {
    async fn classify(&self, window: &[Frame]) -> VisionResult<GameState> {
        let inner = Arc::clone(&self.inner);
        let window = window.to_vec();
        run_blocking(move || inner.classify(&window)).await
    }

    fn name(&self) -> &'static str {
        "onnx-video-classifier"
    }
}

/// Index of the largest value; the first one wins ties.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}
