//! ONNX Runtime session handling shared by every model.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::{debug, info};

use crate::error::{VisionError, VisionResult};

/// Dense f32 tensor copied out of a session run.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl OutputTensor {
    /// Size of dimension `axis`, or 0 when the tensor has fewer dimensions.
    pub fn dim(&self, axis: usize) -> usize {
        self.shape.get(axis).copied().unwrap_or(0)
    }
}

/// A loaded ONNX model.
///
/// The session is behind a mutex because ORT runs need `&mut Session`.
pub struct OnnxModel {
    session: Mutex<Session>,
    path: PathBuf,
}

impl OnnxModel {
    /// Load a model from disk.
    pub fn load(path: impl AsRef<Path>) -> VisionResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(VisionError::model_not_found(path.display().to_string()));
        }

        let session = create_session(path)?;
        info!(model_path = %path.display(), "ONNX model loaded");

        Ok(Self {
            session: Mutex::new(session),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run the model on one f32 input and copy out the named outputs.
    ///
    /// Failures surface as [`VisionError::DetectionFailure`].
    pub fn run(
        &self,
        shape: Vec<usize>,
        data: Vec<f32>,
        output_names: &[&str],
    ) -> VisionResult<Vec<OutputTensor>> {
        let input: Value = Tensor::<f32>::from_array((shape, data.into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| VisionError::detection_failed(format!("Failed to create tensor: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| VisionError::internal("Session lock poisoned"))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| VisionError::detection_failed(format!("ONNX inference failed: {}", e)))?;

        let mut tensors = Vec::with_capacity(output_names.len());
        for &name in output_names {
            let output = outputs
                .get(name)
                .ok_or_else(|| VisionError::detection_failed(format!("Missing {} tensor", name)))?;

            let (shape, data) = output.try_extract_tensor::<f32>().map_err(|e| {
                VisionError::detection_failed(format!("Failed to extract tensor: {}", e))
            })?;

            tensors.push(OutputTensor {
                shape: shape.iter().map(|&d| d.max(0) as usize).collect(),
                data: data.to_vec(),
            });
        }

        debug!(model = %self.path.display(), outputs = tensors.len(), "Inference completed");
        Ok(tensors)
    }
}

/// Run CPU-bound inference on the blocking pool.
pub async fn run_blocking<T, F>(f: F) -> VisionResult<T>
where
    F: FnOnce() -> VisionResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| VisionError::internal(format!("Blocking task join error: {}", e)))?
}

/// Create an ONNX Runtime session, preferring a hardware execution provider.
fn create_session(model_path: &Path) -> VisionResult<Session> {
    let model_bytes = std::fs::read(model_path)
        .map_err(|e| VisionError::internal(format!("Failed to read model file: {}", e)))?;

    let builder = Session::builder()
        .map_err(|e| VisionError::internal(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| VisionError::internal(format!("Failed to set optimization level: {}", e)))?;

    #[cfg(all(target_os = "linux", feature = "cuda"))]
    {
        use ort::execution_providers::CUDAExecutionProvider;
        if let Ok(cuda_builder) = builder
            .clone()
            .with_execution_providers([CUDAExecutionProvider::default().build()])
        {
            if let Ok(session) = cuda_builder.commit_from_memory(&model_bytes) {
                info!(model_path = %model_path.display(), "Using CUDA execution provider");
                return Ok(session);
            }
        }
        debug!("CUDA execution provider not available, trying alternatives");
    }

    #[cfg(target_os = "macos")]
    {
        use ort::execution_providers::CoreMLExecutionProvider;
        if let Ok(coreml_builder) = builder
            .clone()
            .with_execution_providers([CoreMLExecutionProvider::default().build()])
        {
            if let Ok(session) = coreml_builder.commit_from_memory(&model_bytes) {
                info!(model_path = %model_path.display(), "Using CoreML execution provider");
                return Ok(session);
            }
        }
        debug!("CoreML execution provider not available, using CPU");
    }

    debug!(model_path = %model_path.display(), "Using CPU execution provider");
    builder
        .commit_from_memory(&model_bytes)
        .map_err(|e| VisionError::invalid_config(format!("Failed to load ONNX model: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model() {
        let err = OnnxModel::load("/nonexistent/yolov8n.onnx").err().unwrap();
        assert!(matches!(err, VisionError::ModelNotFound(_)));
        assert!(err.is_load_error());
    }

    #[test]
    fn test_output_dim() {
        let t = OutputTensor {
            shape: vec![1, 84, 8400],
            data: Vec::new(),
        };
        assert_eq!(t.dim(1), 84);
        assert_eq!(t.dim(3), 0);
    }
}
