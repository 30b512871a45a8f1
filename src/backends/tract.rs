//! Tract backend
//!
//! Pure Rust inference with no native runtime to install. CPU only.

use crate::config::MatteConfig;
use crate::error::{MatteError, Result};
use crate::inference::InferenceBackend;
use crate::models::{ModelArtifact, ModelInfo, MODEL_INPUT_SHAPE, MODEL_OUTPUT_SHAPE};
use ndarray::Array4;
use tract_onnx::prelude::*;

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

// Use instant crate for cross-platform time compatibility
use instant::{Duration, Instant};

/// Tract backend for running the matting model
#[derive(Debug, Default)]
pub struct TractBackend {
    model: Option<TractModel>,
    info: Option<ModelInfo>,
}

impl TractBackend {
    /// List Tract execution providers with availability status and descriptions
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!(
            "Tract on {os}/{arch}",
            os = std::env::consts::OS,
            arch = std::env::consts::ARCH
        );

        vec![(
            "CPU".to_string(),
            true,
            "Pure Rust CPU inference with no external dependencies".to_string(),
        )]
    }

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn load_model(&mut self, artifact: &ModelArtifact) -> Result<Duration> {
        let model_load_start = Instant::now();

        log::info!("🚀 Initializing Tract Backend");
        log::info!(
            "🧠 Model: {} ({:.2} MB)",
            artifact.name(),
            artifact.len() as f64 / (1024.0 * 1024.0)
        );

        let (n, c, h, w) = MODEL_INPUT_SHAPE;
        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(artifact.bytes()))
            .map_err(|e| MatteError::model_load(format!("Failed to load ONNX model: {e}")))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(n, c, h, w)))
            .map_err(|e| MatteError::model_load(format!("Failed to pin input shape: {e}")))?
            .into_optimized()
            .map_err(|e| MatteError::model_load(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| MatteError::model_load(format!("Failed to create runnable model: {e}")))?;

        self.model = Some(model);
        self.info = Some(artifact.info());

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "✅ Tract backend initialized in {}ms",
            model_load_time.as_millis()
        );

        Ok(model_load_time)
    }
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn initialize(
        &mut self,
        artifact: &ModelArtifact,
        _config: &MatteConfig,
    ) -> Result<Option<Duration>> {
        if self.is_initialized() {
            return Ok(None);
        }

        let model_load_time = self.load_model(artifact)?;
        Ok(Some(model_load_time))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| MatteError::model_not_ready("Tract model not initialized"))?;

        log::debug!("🔮 Running Tract inference on {:?}", input.shape());
        let inference_start = Instant::now();

        let input_tensor = Tensor::from(input.clone());
        let outputs = model
            .run(tvec![input_tensor.into()])
            .map_err(|e| MatteError::inference(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| MatteError::inference("No output tensor found"))?
            .into_arc_tensor();

        let output_data = output_tensor.to_array_view::<f32>().map_err(|e| {
            MatteError::inference(format!("Failed to convert output tensor: {e}"))
        })?;

        let shape = output_data.shape().to_vec();
        let values: Vec<f32> = output_data.iter().copied().collect();
        let output_array = match shape.as_slice() {
            [n, c, h, w] => Array4::from_shape_vec((*n, *c, *h, *w), values),
            _ => Array4::from_shape_vec(MODEL_OUTPUT_SHAPE, values),
        }
        .map_err(|e| {
            MatteError::inference(format!("Failed to reshape output tensor {shape:?}: {e}"))
        })?;

        log::debug!(
            "✅ Tract inference completed in {}ms",
            inference_start.elapsed().as_millis()
        );

        Ok(output_array)
    }

    fn model_info(&self) -> Result<ModelInfo> {
        self.info
            .clone()
            .ok_or_else(|| MatteError::model_not_ready("Tract backend not initialized"))
    }

    fn is_initialized(&self) -> bool {
        self.model.is_some()
    }
}
