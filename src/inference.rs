//! Inference backend abstraction and the shared model handle

use crate::config::MatteConfig;
use crate::error::{MatteError, Result};
use crate::models::{ModelArtifact, ModelInfo, MODEL_INPUT_SHAPE, MODEL_OUTPUT_SHAPE};
use ndarray::Array4;
use std::sync::Arc;
use tokio::sync::Mutex;

// Use instant crate for cross-platform time compatibility
use instant::Duration;

/// Trait for inference backends
///
/// Backends are synchronous. [`ModelHandle`] moves calls onto a blocking
/// task so async callers are never stalled by a running model.
pub trait InferenceBackend: Send {
    /// Short backend identifier used in logs
    fn name(&self) -> &'static str;

    /// Initialize the backend from serialized model bytes
    ///
    /// Returns the time spent building the session when the backend measures it.
    ///
    /// # Errors
    /// - Model parsing or validation errors
    /// - Execution provider setup failures
    fn initialize(&mut self, artifact: &ModelArtifact, config: &MatteConfig)
        -> Result<Option<Duration>>;

    /// Run inference on the input tensor
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Model inference failures
    /// - Tensor conversion errors
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Get the expected input shape for this backend
    fn input_shape(&self) -> (usize, usize, usize, usize) {
        MODEL_INPUT_SHAPE
    }

    /// Get the expected output shape for this backend
    fn output_shape(&self) -> (usize, usize, usize, usize) {
        MODEL_OUTPUT_SHAPE
    }

    /// Get model information for this backend
    ///
    /// # Errors
    /// - Backend not initialized
    fn model_info(&self) -> Result<ModelInfo>;

    /// Check if backend is initialized
    fn is_initialized(&self) -> bool;
}

/// Long-lived handle to an initialized backend
///
/// Cloning is cheap and every clone refers to the same backend. Inference
/// calls are serialized; at most one runs at a time.
#[derive(Clone)]
pub struct ModelHandle {
    backend: Arc<Mutex<Box<dyn InferenceBackend>>>,
    backend_name: &'static str,
    info: ModelInfo,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("backend", &self.backend_name)
            .field("info", &self.info)
            .finish()
    }
}

impl ModelHandle {
    /// Wrap an initialized backend
    ///
    /// # Errors
    /// - Backend has not been initialized
    pub fn new(backend: Box<dyn InferenceBackend>) -> Result<Self> {
        if !backend.is_initialized() {
            return Err(MatteError::model_not_ready(format!(
                "{} backend has not been initialized",
                backend.name()
            )));
        }

        let backend_name = backend.name();
        let info = backend.model_info()?;

        Ok(Self {
            backend: Arc::new(Mutex::new(backend)),
            backend_name,
            info,
        })
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend_name
    }

    #[must_use]
    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    /// Run the model on a `1x3x1024x1024` tensor
    ///
    /// The returned mask always has shape `1x1x1024x1024`. There is no
    /// timeout; once started the call runs to completion even if the
    /// awaiting future is dropped.
    ///
    /// # Errors
    /// - Input tensor with the wrong shape
    /// - Backend failure or panic
    /// - Output whose element count is not `1024 * 1024`
    pub async fn infer(&self, input: Array4<f32>) -> Result<Array4<f32>> {
        if input.dim() != MODEL_INPUT_SHAPE {
            return Err(MatteError::inference(format!(
                "Expected input tensor of shape {:?}, got {:?}",
                MODEL_INPUT_SHAPE,
                input.dim()
            )));
        }

        let backend = Arc::clone(&self.backend);
        let output = tokio::task::spawn_blocking(move || {
            let mut backend = backend.blocking_lock();
            backend.infer(&input)
        })
        .await
        .map_err(|e| MatteError::inference(format!("Inference task failed: {e}")))??;

        normalize_output(output)
    }
}

/// Reshape a raw model output to `1x1x1024x1024`
///
/// Any layout holding exactly `1024 * 1024` values is accepted, e.g.
/// `1x1x1024x1024`, `1x1024x1024` squeezed into four dimensions, or
/// `1024x1024x1x1`.
///
/// # Errors
/// - Element count differs from `1024 * 1024`
pub fn normalize_output(output: Array4<f32>) -> Result<Array4<f32>> {
    if output.dim() == MODEL_OUTPUT_SHAPE {
        return Ok(output);
    }

    let (n, c, h, w) = MODEL_OUTPUT_SHAPE;
    let expected = n * c * h * w;
    if output.len() != expected {
        return Err(MatteError::inference(format!(
            "Model output of shape {:?} holds {} values, expected {}",
            output.dim(),
            output.len(),
            expected
        )));
    }

    let values: Vec<f32> = output.iter().copied().collect();
    Array4::from_shape_vec(MODEL_OUTPUT_SHAPE, values)
        .map_err(|e| MatteError::inference(format!("Failed to reshape model output: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{MockBackend, MockMask};

    fn input() -> Array4<f32> {
        Array4::zeros(MODEL_INPUT_SHAPE)
    }

    #[test]
    fn test_handle_requires_initialized_backend() {
        let result = ModelHandle::new(Box::new(MockBackend::new(MockMask::Constant(0.5))));
        assert!(matches!(result, Err(MatteError::ModelNotReady(_))));
    }

    #[tokio::test]
    async fn test_handle_runs_backend() {
        let handle =
            ModelHandle::new(Box::new(MockBackend::ready(MockMask::Constant(0.25)))).unwrap();
        assert_eq!(handle.backend_name(), "mock");

        let output = handle.infer(input()).await.unwrap();
        assert_eq!(output.dim(), (1, 1, 1024, 1024));
        assert!(output.iter().all(|&v| (v - 0.25).abs() < f32::EPSILON));
    }

    #[tokio::test]
    async fn test_handle_rejects_wrong_input_shape() {
        let handle =
            ModelHandle::new(Box::new(MockBackend::ready(MockMask::Constant(0.5)))).unwrap();
        let result = handle.infer(Array4::zeros((1, 3, 320, 320))).await;
        assert!(matches!(result, Err(MatteError::Inference(_))));
    }

    #[tokio::test]
    async fn test_clones_share_backend() {
        let backend = MockBackend::ready(MockMask::Constant(0.5));
        let calls = backend.call_counter();
        let handle = ModelHandle::new(Box::new(backend)).unwrap();
        let clone = handle.clone();

        handle.infer(input()).await.unwrap();
        clone.infer(input()).await.unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn test_normalize_output_reshapes_compatible_layouts() {
        let squeezed = Array4::from_elem((1024, 1024, 1, 1), 0.5_f32);
        let normalized = normalize_output(squeezed).unwrap();
        assert_eq!(normalized.dim(), (1, 1, 1024, 1024));

        let mut ordered = Array4::<f32>::zeros((1, 1024, 1024, 1));
        ordered[[0, 3, 7, 0]] = 1.0;
        let normalized = normalize_output(ordered).unwrap();
        assert!((normalized[[0, 0, 3, 7]] - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_normalize_output_rejects_wrong_size() {
        let result = normalize_output(Array4::zeros((1, 1, 512, 512)));
        assert!(matches!(result, Err(MatteError::Inference(_))));
    }
}
