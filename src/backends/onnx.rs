//! ONNX Runtime backend
//!
//! Runs the matting network with ONNX Runtime, using CUDA or `CoreML` when
//! they are available and requested.

use crate::config::{ExecutionProvider, MatteConfig};
use crate::error::{MatteError, Result};
use crate::inference::InferenceBackend;
use crate::models::{ModelArtifact, ModelInfo, MODEL_OUTPUT_SHAPE};
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
    ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::{self, value::Value};

/// ONNX Runtime backend for the matting model
#[derive(Debug, Default)]
pub struct OnnxBackend {
    session: Option<Session>,
    info: Option<ModelInfo>,
}

impl OnnxBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// List ONNX Runtime execution providers with availability status and descriptions
    ///
    /// # Examples
    /// ```rust
    /// use dis_matte::backends::OnnxBackend;
    ///
    /// for (name, available, description) in OnnxBackend::list_providers() {
    ///     println!("{}: {} - {}", name, if available { "yes" } else { "no" }, description);
    /// }
    /// ```
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!(
            "Platform: {os}/{arch}, {cores} CPU cores",
            os = std::env::consts::OS,
            arch = std::env::consts::ARCH,
            cores = available_cores()
        );

        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                cuda_available(),
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                coreml_available(),
                "Apple Silicon GPU acceleration (macOS only)".to_string(),
            ),
        ]
    }

    /// Execution providers to register for the requested provider, in priority order
    fn select_providers(requested: ExecutionProvider) -> Vec<ExecutionProviderDispatch> {
        match requested {
            ExecutionProvider::Auto => {
                let mut providers = Vec::new();
                if cuda_available() {
                    log::info!("🚀 CUDA execution provider is available and will be used");
                    providers.push(CUDAExecutionProvider::default().build());
                }
                if coreml_available() {
                    log::info!("🍎 CoreML execution provider is available and will be used");
                    providers.push(CoreMLExecutionProvider::default().with_subgraphs(true).build());
                }
                if providers.is_empty() {
                    log::info!("No hardware acceleration available, using CPU");
                }
                providers
            },
            ExecutionProvider::Cpu => {
                log::info!("Using CPU execution provider");
                Vec::new()
            },
            ExecutionProvider::Cuda => {
                if cuda_available() {
                    log::info!("Using CUDA execution provider");
                    vec![CUDAExecutionProvider::default().build()]
                } else {
                    log::warn!(
                        "CUDA execution provider requested but not available, falling back to CPU"
                    );
                    Vec::new()
                }
            },
            ExecutionProvider::CoreMl => {
                if coreml_available() {
                    log::info!("🍎 Using CoreML execution provider (explicitly requested)");
                    vec![CoreMLExecutionProvider::default().with_subgraphs(true).build()]
                } else {
                    log::warn!(
                        "CoreML execution provider requested but not available, falling back to CPU"
                    );
                    Vec::new()
                }
            },
        }
    }

    fn load_model(
        &mut self,
        artifact: &ModelArtifact,
        config: &MatteConfig,
    ) -> Result<std::time::Duration> {
        let model_load_start = std::time::Instant::now();

        let mut session_builder = Session::builder()
            .map_err(|e| MatteError::model_load(format!("Failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                MatteError::model_load(format!("Failed to set optimization level: {e}"))
            })?;

        let providers = Self::select_providers(config.execution_provider);
        if !providers.is_empty() {
            session_builder = session_builder
                .with_execution_providers(providers)
                .map_err(|e| {
                    MatteError::model_load(format!(
                        "Failed to set {} execution provider: {e}",
                        config.execution_provider
                    ))
                })?;
        }

        let intra_threads = if config.intra_threads > 0 {
            config.intra_threads
        } else {
            available_cores()
        };

        let inter_threads = if config.inter_threads > 0 {
            config.inter_threads
        } else {
            (available_cores() / 4).max(1)
        };

        let session = session_builder
            .with_parallel_execution(true)
            .map_err(|e| MatteError::model_load(format!("Failed to enable parallel execution: {e}")))?
            .with_intra_threads(intra_threads)
            .map_err(|e| MatteError::model_load(format!("Failed to set intra threads: {e}")))?
            .with_inter_threads(inter_threads)
            .map_err(|e| MatteError::model_load(format!("Failed to set inter threads: {e}")))?
            .commit_from_memory(artifact.bytes())
            .map_err(|e| {
                MatteError::model_load(format!(
                    "Failed to create session from '{}': {e}",
                    artifact.name()
                ))
            })?;

        if session.inputs.len() != 1 || session.outputs.is_empty() {
            return Err(MatteError::model_load(format!(
                "Expected a model with one input and at least one output, found {} input(s) and {} output(s)",
                session.inputs.len(),
                session.outputs.len()
            )));
        }

        log::debug!("✅ ONNX Runtime session created successfully");
        log::debug!("  - Requested provider: {}", config.execution_provider);
        log::debug!(
            "  - Threading: {intra_threads} intra-op threads, {inter_threads} inter-op threads"
        );
        log::debug!(
            "  - Model: {} ({:.2} MB)",
            artifact.name(),
            artifact.len() as f64 / (1024.0 * 1024.0)
        );

        self.session = Some(session);
        self.info = Some(artifact.info());

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "📊 Model loading complete: {:.0}ms",
            model_load_time.as_secs_f64() * 1000.0
        );

        Ok(model_load_time)
    }
}

impl InferenceBackend for OnnxBackend {
    fn name(&self) -> &'static str {
        "onnx"
    }

    fn initialize(
        &mut self,
        artifact: &ModelArtifact,
        config: &MatteConfig,
    ) -> Result<Option<std::time::Duration>> {
        if self.is_initialized() {
            return Ok(None);
        }

        let model_load_time = self.load_model(artifact, config)?;
        Ok(Some(model_load_time))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        use std::time::Instant;

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| MatteError::model_not_ready("ONNX session not initialized"))?;

        let inference_start = Instant::now();
        log::debug!("🚀 Starting inference with input shape: {:?}", input.dim());

        let input_value = Value::from_array(input.clone()).map_err(|e| {
            MatteError::inference(format!("Failed to convert input tensor: {e}"))
        })?;

        // Positional input and output: the artifact has exactly one of each that matters
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| MatteError::inference(format!("ONNX inference failed: {e}")))?;
        let core_inference_time = inference_start.elapsed();

        let first_key = outputs
            .keys()
            .next()
            .ok_or_else(|| MatteError::inference("No output tensors found"))?;
        let output_tensor = outputs
            .get(first_key)
            .ok_or_else(|| MatteError::inference("First output tensor not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| MatteError::inference(format!("Failed to extract output tensor: {e}")))?;

        let shape = output_tensor.shape().to_vec();
        let values: Vec<f32> = output_tensor.iter().copied().collect();
        let result = match shape.as_slice() {
            [n, c, h, w] => Array4::from_shape_vec((*n, *c, *h, *w), values),
            _ => Array4::from_shape_vec(MODEL_OUTPUT_SHAPE, values),
        }
        .map_err(|e| {
            MatteError::inference(format!("Failed to reshape output tensor {shape:?}: {e}"))
        })?;

        let total_inference_time = inference_start.elapsed();
        log::debug!(
            "  ⚡ Core inference: {:.2}ms",
            core_inference_time.as_secs_f64() * 1000.0
        );
        log::info!(
            "📊 Inference complete: {:.2}ms total",
            total_inference_time.as_secs_f64() * 1000.0
        );

        Ok(result)
    }

    fn model_info(&self) -> Result<ModelInfo> {
        self.info
            .clone()
            .ok_or_else(|| MatteError::model_not_ready("ONNX backend not initialized"))
    }

    fn is_initialized(&self) -> bool {
        self.session.is_some()
    }
}

fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(8)
}

fn cuda_available() -> bool {
    OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false)
}

fn coreml_available() -> bool {
    OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default()).unwrap_or(false)
}
