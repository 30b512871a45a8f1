#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # DIS Matte
//!
//! Background removal with a dichotomous image segmentation (DIS) network,
//! run through ONNX Runtime or Tract.
//!
//! The pipeline is fixed: the image is resized to `1024x1024`, normalised
//! into a BGR-ordered NCHW tensor, passed through the model, and the
//! predicted mask is resized back, min-max stretched to `0..=255` and
//! written into the alpha channel of the original image.
//!
//! ## Features
//!
//! - **Multiple Backends**: ONNX Runtime (GPU acceleration) and Tract (Pure Rust)
//! - **Hardware Acceleration**: CUDA, `CoreML`, and CPU execution providers
//! - **Model Retrieval**: local files or HTTP(S) downloads with SHA-256 verification
//! - **Session Surface**: [`MattingSession`] models an interactive front end
//!   (select, infer, reset, save) with derived control state
//! - **CLI Integration**: Optional command-line interface (enable with `cli` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dis_matte::{load_model, remove_background_from_bytes, MatteConfig};
//!
//! # async fn example(upload_bytes: Vec<u8>) -> anyhow::Result<()> {
//! let config = MatteConfig::default(); // reads DIS-inference.onnx
//! let model = load_model(&config).await?;
//!
//! let result = remove_background_from_bytes(&model, &config, &upload_bytes).await?;
//! result.save_png("output.png")?;
//! # Ok(())
//! # }
//! ```
//!
//! The model handle is loaded once and passed explicitly to every call; it
//! is cheap to clone and safe to share between tasks.
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with GPU acceleration support
//! - `tract` (default): Pure Rust backend
//! - `cli` (default): Command-line interface, progress and tracing setup
//! - `tracing-json`, `tracing-files`: extra log outputs for the CLI

pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod loader;
pub mod models;
pub mod postprocessing;
pub mod preprocessing;
pub mod processor;
pub mod services;
pub mod session;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;

use tokio::io::AsyncRead;

// Public API exports
pub use backends::*;
pub use config::{BackendType, ExecutionProvider, MatteConfig, MatteConfigBuilder, UniformMaskPolicy};
pub use download::{validate_model_url, ModelDownloader};
pub use error::{MatteError, Result};
pub use inference::{InferenceBackend, ModelHandle};
pub use loader::{BackendFactory, DefaultBackendFactory, ModelLoader};
pub use models::{
    ArtifactSource, FileArtifactSource, InMemoryArtifactSource, ModelArtifact, ModelInfo,
    ModelSource, ModelSpec, RemoteArtifactSource,
};
pub use postprocessing::MaskPostprocessor;
pub use preprocessing::ImagePreprocessor;
pub use processor::MattingProcessor;
pub use services::ImageIOService;
pub use session::{
    ControlState, ExportedImage, LoadingGuard, LoadingIndicator, MattingSession, SessionSnapshot,
};
pub use types::{MatteResult, ProcessingMetadata, ProcessingTimings, SegmentationMask};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, spans, TracingConfig, TracingFormat, TracingOutput};

/// Load the model named by `config.model` with the backend it selects
///
/// # Errors
/// - [`MatteError::ModelLoad`] for any retrieval or initialization failure
pub async fn load_model(config: &MatteConfig) -> Result<ModelHandle> {
    config.validate()?;
    let source = config.model.artifact_source(false);
    ModelLoader::new(config.clone()).load(source.as_ref()).await
}

/// Remove the background from a decoded image
///
/// # Examples
/// ```rust,no_run
/// use dis_matte::{load_model, remove_background_from_image, MatteConfig};
///
/// # async fn example(img: image::DynamicImage) -> anyhow::Result<()> {
/// let config = MatteConfig::default();
/// let model = load_model(&config).await?;
/// let result = remove_background_from_image(&model, &config, &img).await?;
/// result.save_png("output.png")?;
/// # Ok(())
/// # }
/// ```
pub async fn remove_background_from_image(
    model: &ModelHandle,
    config: &MatteConfig,
    image: &image::DynamicImage,
) -> Result<MatteResult> {
    MattingProcessor::new(model.clone(), config)
        .process_image(image)
        .await
}

/// Remove the background from encoded image bytes (JPEG, PNG, WebP, BMP, TIFF)
pub async fn remove_background_from_bytes(
    model: &ModelHandle,
    config: &MatteConfig,
    image_bytes: &[u8],
) -> Result<MatteResult> {
    MattingProcessor::new(model.clone(), config)
        .process_bytes(image_bytes)
        .await
}

/// Remove the background from an async reader stream
///
/// The stream is read to the end before decoding.
pub async fn remove_background_from_reader<R: AsyncRead + Unpin>(
    model: &ModelHandle,
    config: &MatteConfig,
    mut reader: R,
) -> Result<MatteResult> {
    let mut buffer = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buffer)
        .await
        .map_err(|e| MatteError::processing(format!("Failed to read from stream: {}", e)))?;

    remove_background_from_bytes(model, config, &buffer).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};

    fn mock_model() -> ModelHandle {
        ModelHandle::new(Box::new(MockBackend::ready(MockMask::Radial))).unwrap()
    }

    #[tokio::test]
    async fn test_load_model_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = MatteConfig::builder()
            .model(ModelSpec {
                source: ModelSource::External(dir.path().join("absent.onnx")),
                sha256: None,
            })
            .build()
            .unwrap();

        let error = load_model(&config).await.unwrap_err();
        assert!(error.is_model_failure());
    }

    #[tokio::test]
    async fn test_reader_api() {
        let image = RgbImage::from_pixel(24, 16, Rgb([200, 100, 50]));
        let png = ImageIOService::encode_png(&image).unwrap();

        let result = remove_background_from_reader(
            &mock_model(),
            &MatteConfig::default(),
            std::io::Cursor::new(png),
        )
        .await
        .unwrap();
        assert_eq!(result.dimensions(), (24, 16));
    }

    #[tokio::test]
    async fn test_image_api() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(8, 8));
        let result = remove_background_from_image(&mock_model(), &MatteConfig::default(), &image)
            .await
            .unwrap();
        assert_eq!(result.mask.dimensions, (8, 8));
    }
}
