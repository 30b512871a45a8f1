//! Model loading
//!
//! Fetches the artifact, builds a backend for it and hands back a
//! [`ModelHandle`]. Every failure on the way is a model load failure.

use crate::config::{BackendType, MatteConfig};
use crate::error::{MatteError, Result};
use crate::inference::{InferenceBackend, ModelHandle};
use crate::models::ArtifactSource;
use instant::Instant;
use std::sync::Arc;
use tracing::{info, instrument};

/// Factory trait for creating inference backends
pub trait BackendFactory: Send + Sync {
    /// Create an uninitialized backend of the given type
    ///
    /// # Errors
    /// - Backend type not compiled in or not supported by this factory
    fn create_backend(&self, backend_type: BackendType) -> Result<Box<dyn InferenceBackend>>;

    /// Backend types this factory can create
    fn available_backends(&self) -> Vec<BackendType>;
}

/// Creates the backends enabled by crate features
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    fn create_backend(&self, backend_type: BackendType) -> Result<Box<dyn InferenceBackend>> {
        match backend_type {
            #[cfg(feature = "onnx")]
            BackendType::Onnx => Ok(Box::new(crate::backends::OnnxBackend::new())),
            #[cfg(feature = "tract")]
            BackendType::Tract => Ok(Box::new(crate::backends::TractBackend::new())),
            #[allow(unreachable_patterns)]
            other => Err(MatteError::invalid_config(format!(
                "Backend '{other}' is not available in this build"
            ))),
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        let mut backends = Vec::new();
        #[cfg(feature = "onnx")]
        backends.push(BackendType::Onnx);
        #[cfg(feature = "tract")]
        backends.push(BackendType::Tract);
        backends
    }
}

/// Loads model artifacts into ready-to-use handles
#[derive(Clone)]
pub struct ModelLoader {
    config: MatteConfig,
    factory: Arc<dyn BackendFactory>,
}

impl std::fmt::Debug for ModelLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelLoader")
            .field("config", &self.config)
            .field("backends", &self.factory.available_backends())
            .finish()
    }
}

impl ModelLoader {
    /// Loader using the backends enabled by crate features
    #[must_use]
    pub fn new(config: MatteConfig) -> Self {
        Self::with_factory(config, Arc::new(DefaultBackendFactory))
    }

    #[must_use]
    pub fn with_factory(config: MatteConfig, factory: Arc<dyn BackendFactory>) -> Self {
        Self { config, factory }
    }

    #[must_use]
    pub fn config(&self) -> &MatteConfig {
        &self.config
    }

    /// Fetch the artifact and initialize a backend for it
    ///
    /// Initialization runs on a blocking thread. There is no retry.
    ///
    /// # Errors
    /// - [`MatteError::ModelLoad`] for any failure: fetch, backend creation
    ///   or backend initialization
    #[instrument(skip(self, source), fields(source = %source.describe(), backend = %self.config.backend))]
    pub async fn load(&self, source: &dyn ArtifactSource) -> Result<ModelHandle> {
        let start = Instant::now();

        let artifact = source.fetch().await.map_err(|e| {
            as_load_failure(e, &format!("Failed to fetch model from {}", source.describe()))
        })?;

        let mut backend = self
            .factory
            .create_backend(self.config.backend)
            .map_err(|e| as_load_failure(e, "Failed to create backend"))?;

        let config = self.config.clone();
        let backend = tokio::task::spawn_blocking(move || {
            let load_time = backend.initialize(&artifact, &config)?;
            if let Some(load_time) = load_time {
                log::debug!("Backend session built in {}ms", load_time.as_millis());
            }
            Ok::<_, MatteError>(backend)
        })
        .await
        .map_err(|e| MatteError::model_load(format!("Model initialization task failed: {e}")))?
        .map_err(|e| as_load_failure(e, "Failed to initialize backend"))?;

        let handle = ModelHandle::new(backend).map_err(|e| as_load_failure(e, "Backend not ready"))?;

        info!(
            backend = handle.backend_name(),
            model = %handle.info().name,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Model loaded"
        );

        Ok(handle)
    }
}

fn as_load_failure(error: MatteError, context: &str) -> MatteError {
    match error {
        MatteError::ModelLoad(_) => error,
        other => MatteError::model_load(format!("{context}: {other}")),
    }
}
