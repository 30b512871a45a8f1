//! Deterministic mock backend for tests, benchmarks and offline debugging

use crate::config::{BackendType, MatteConfig};
use crate::error::{MatteError, Result};
use crate::inference::InferenceBackend;
use crate::loader::BackendFactory;
use crate::models::{ModelArtifact, ModelInfo, MODEL_INPUT_SHAPE, MODEL_OUTPUT_SHAPE};
use ndarray::Array4;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Mask produced by [`MockBackend`]
#[derive(Debug, Clone)]
pub enum MockMask {
    /// Every value equal
    Constant(f32),
    /// 1.0 at the centre falling linearly to 0.0 at the corners
    Radial,
    /// First tensor channel shifted back into `[0, 1]`
    EchoInput,
    /// Returned as-is, whatever its shape
    Raw(Array4<f32>),
}

/// Mock backend
///
/// Produces masks without a model file. Failures can be injected at
/// initialization or inference time.
#[derive(Debug)]
pub struct MockBackend {
    mask: MockMask,
    initialized: bool,
    fail_initialize: bool,
    fail_inference: bool,
    calls: Arc<AtomicUsize>,
}

impl MockBackend {
    /// Create an uninitialized mock backend
    #[must_use]
    pub fn new(mask: MockMask) -> Self {
        Self {
            mask,
            initialized: false,
            fail_initialize: false,
            fail_inference: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a mock backend that is already initialized
    #[must_use]
    pub fn ready(mask: MockMask) -> Self {
        let mut backend = Self::new(mask);
        backend.initialized = true;
        backend
    }

    /// Make `initialize` fail with a model load error
    #[must_use]
    pub fn with_initialize_failure(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    /// Make `infer` fail with an inference error
    #[must_use]
    pub fn with_inference_failure(mut self) -> Self {
        self.fail_inference = true;
        self
    }

    /// Counter of `infer` calls, shared with the backend
    #[must_use]
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    fn radial() -> Array4<f32> {
        let (_, _, h, w) = MODEL_OUTPUT_SHAPE;
        let cy = (h as f32 - 1.0) / 2.0;
        let cx = (w as f32 - 1.0) / 2.0;
        let max_distance = (cx * cx + cy * cy).sqrt();

        Array4::from_shape_fn(MODEL_OUTPUT_SHAPE, |(_, _, y, x)| {
            let dy = y as f32 - cy;
            let dx = x as f32 - cx;
            1.0 - (dx * dx + dy * dy).sqrt() / max_distance
        })
    }
}

impl InferenceBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn initialize(
        &mut self,
        artifact: &ModelArtifact,
        _config: &MatteConfig,
    ) -> Result<Option<std::time::Duration>> {
        if self.fail_initialize {
            return Err(MatteError::model_load(format!(
                "Mock backend refused artifact '{}'",
                artifact.name()
            )));
        }
        self.initialized = true;
        Ok(None)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        if !self.initialized {
            return Err(MatteError::model_not_ready("Mock backend not initialized"));
        }

        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_inference {
            return Err(MatteError::inference("Mock backend inference failure"));
        }

        let output = match &self.mask {
            MockMask::Constant(value) => Array4::from_elem(MODEL_OUTPUT_SHAPE, *value),
            MockMask::Radial => Self::radial(),
            MockMask::EchoInput => {
                let (n, _, h, w) = input.dim();
                Array4::from_shape_fn((n, 1, h, w), |(b, _, y, x)| {
                    input.get([b, 0, y, x]).map_or(0.0, |v| v + 0.5)
                })
            },
            MockMask::Raw(output) => output.clone(),
        };

        Ok(output)
    }

    fn model_info(&self) -> Result<ModelInfo> {
        Ok(ModelInfo {
            name: "Mock Backend".to_string(),
            size_bytes: 0,
            input_shape: MODEL_INPUT_SHAPE,
            output_shape: MODEL_OUTPUT_SHAPE,
        })
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// Backend factory handing out [`MockBackend`]s regardless of the requested type
#[derive(Debug, Clone)]
pub struct MockBackendFactory {
    mask: MockMask,
    fail_initialize: bool,
    fail_inference: bool,
}

impl MockBackendFactory {
    #[must_use]
    pub fn new(mask: MockMask) -> Self {
        Self {
            mask,
            fail_initialize: false,
            fail_inference: false,
        }
    }

    /// Created backends fail to initialize
    #[must_use]
    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    /// Created backends fail every inference
    #[must_use]
    pub fn failing_inference(mut self) -> Self {
        self.fail_inference = true;
        self
    }
}

impl BackendFactory for MockBackendFactory {
    fn create_backend(&self, _backend_type: BackendType) -> Result<Box<dyn InferenceBackend>> {
        let mut backend = MockBackend::new(self.mask.clone());
        backend.fail_initialize = self.fail_initialize;
        backend.fail_inference = self.fail_inference;
        Ok(Box::new(backend))
    }

    fn available_backends(&self) -> Vec<BackendType> {
        vec![BackendType::Onnx, BackendType::Tract]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact() -> ModelArtifact {
        ModelArtifact::new("mock.onnx", vec![1, 2, 3])
    }

    #[test]
    fn test_initialize_and_infer() {
        let mut backend = MockBackend::new(MockMask::Constant(0.5));
        let input = Array4::zeros(MODEL_INPUT_SHAPE);
        assert!(backend.infer(&input).is_err());

        backend.initialize(&artifact(), &MatteConfig::default()).unwrap();
        let output = backend.infer(&input).unwrap();
        assert_eq!(output.dim(), MODEL_OUTPUT_SHAPE);
        assert_eq!(backend.call_counter().load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_injected_failures() {
        let mut backend = MockBackend::new(MockMask::Radial).with_initialize_failure();
        let result = backend.initialize(&artifact(), &MatteConfig::default());
        assert!(matches!(result, Err(MatteError::ModelLoad(_))));

        let mut backend = MockBackend::ready(MockMask::Radial).with_inference_failure();
        let result = backend.infer(&Array4::zeros(MODEL_INPUT_SHAPE));
        assert!(matches!(result, Err(MatteError::Inference(_))));
    }

    #[test]
    fn test_radial_mask_range() {
        let mask = MockBackend::radial();
        let max = mask.iter().copied().fold(f32::MIN, f32::max);
        let min = mask.iter().copied().fold(f32::MAX, f32::min);
        assert!(max <= 1.0 && max > 0.99);
        assert!(min.abs() < 1e-5);
    }

    #[test]
    fn test_echo_input() {
        let mut backend = MockBackend::ready(MockMask::EchoInput);
        let mut input = Array4::from_elem(MODEL_INPUT_SHAPE, -0.5_f32);
        input[[0, 0, 10, 20]] = 0.5;

        let output = backend.infer(&input).unwrap();
        assert!((output[[0, 0, 10, 20]] - 1.0).abs() < f32::EPSILON);
        assert!(output[[0, 0, 0, 0]].abs() < f32::EPSILON);
    }
}
