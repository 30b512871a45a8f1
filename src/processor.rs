//! Matting pipeline
//!
//! [`MattingProcessor`] owns a [`ModelHandle`] handed to it at construction
//! and runs preprocess, inference and postprocess for one image at a time.

use crate::config::{MatteConfig, UniformMaskPolicy};
use crate::error::Result;
use crate::inference::ModelHandle;
use crate::postprocessing::MaskPostprocessor;
use crate::preprocessing::ImagePreprocessor;
use crate::services::ImageIOService;
use crate::types::{MatteResult, ProcessingMetadata, ProcessingTimings};
use image::DynamicImage;
use instant::Instant;
use std::path::Path;
use tracing::{debug, info, instrument, span, Level};

/// Runs the matting pipeline against an injected model handle
#[derive(Debug, Clone)]
pub struct MattingProcessor {
    handle: ModelHandle,
    postprocessor: MaskPostprocessor,
    debug: bool,
}

impl MattingProcessor {
    /// Create a processor using the uniform mask policy from `config`
    #[must_use]
    pub fn new(handle: ModelHandle, config: &MatteConfig) -> Self {
        Self::with_policy(handle, config.uniform_mask).with_debug(config.debug)
    }

    #[must_use]
    pub fn with_policy(handle: ModelHandle, uniform_policy: UniformMaskPolicy) -> Self {
        Self {
            handle,
            postprocessor: MaskPostprocessor::new(uniform_policy),
            debug: false,
        }
    }

    /// Attach mask statistics to every result's metadata
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub fn handle(&self) -> &ModelHandle {
        &self.handle
    }

    /// Matte a decoded image
    ///
    /// # Errors
    /// - Empty image
    /// - Backend failure or malformed model output
    /// - Non-finite mask values
    #[instrument(
        skip(self, image),
        fields(
            backend = self.handle.backend_name(),
            dimensions = %format!("{}x{}", image.width(), image.height())
        )
    )]
    pub async fn process_image(&self, image: &DynamicImage) -> Result<MatteResult> {
        let mut timings = ProcessingTimings::default();
        self.run(image, &mut timings, Instant::now()).await
    }

    /// Decode and matte in-memory image bytes
    ///
    /// # Errors
    /// - Undecodable image data
    /// - Any failure of [`Self::process_image`]
    pub async fn process_bytes(&self, bytes: &[u8]) -> Result<MatteResult> {
        let total_start = Instant::now();
        let decode_start = Instant::now();
        let image = ImageIOService::decode_bytes(bytes)?;

        let mut timings = ProcessingTimings {
            image_decode_ms: decode_start.elapsed().as_millis() as u64,
            ..ProcessingTimings::default()
        };
        self.run(&image, &mut timings, total_start).await
    }

    /// Load and matte an image file
    ///
    /// # Errors
    /// - File missing or undecodable
    /// - Any failure of [`Self::process_image`]
    pub async fn process_file<P: AsRef<Path>>(&self, path: P) -> Result<MatteResult> {
        let total_start = Instant::now();
        let decode_start = Instant::now();
        let image = ImageIOService::load_image(path)?;

        let mut timings = ProcessingTimings {
            image_decode_ms: decode_start.elapsed().as_millis() as u64,
            ..ProcessingTimings::default()
        };
        self.run(&image, &mut timings, total_start).await
    }

    async fn run(
        &self,
        image: &DynamicImage,
        timings: &mut ProcessingTimings,
        total_start: Instant,
    ) -> Result<MatteResult> {
        let (width, height) = (image.width(), image.height());

        let input = {
            let _span = span!(Level::DEBUG, "preprocessing", width, height).entered();
            let start = Instant::now();
            let tensor = ImagePreprocessor::preprocess(image)?;
            timings.preprocessing_ms = start.elapsed().as_millis() as u64;
            tensor
        };

        let inference_start = Instant::now();
        let output = self.handle.infer(input).await?;
        timings.inference_ms = inference_start.elapsed().as_millis() as u64;
        debug!(elapsed_ms = timings.inference_ms, "Inference finished");

        let (processed, rgba) = {
            let _span = span!(Level::DEBUG, "postprocessing", width, height).entered();
            let start = Instant::now();
            let processed = self.postprocessor.process(&output, width, height)?;
            let rgba = MaskPostprocessor::composite(image, &processed.mask)?;
            timings.postprocessing_ms = start.elapsed().as_millis() as u64;
            (processed, rgba)
        };

        timings.total_ms = total_start.elapsed().as_millis() as u64;

        let mut metadata =
            ProcessingMetadata::new(self.handle.backend_name(), self.handle.info().name.clone());
        metadata.timings = timings.clone();
        metadata.uniform_mask = processed.uniform;
        if self.debug {
            let stats = processed.mask.statistics();
            debug!(
                foreground_pixels = stats.foreground_pixels,
                background_pixels = stats.background_pixels,
                foreground_ratio = stats.foreground_ratio,
                "Mask statistics"
            );
            metadata.mask_statistics = Some(stats);
        }

        info!(
            total_ms = timings.total_ms,
            inference_ms = timings.inference_ms,
            uniform_mask = processed.uniform,
            "Matting complete"
        );

        Ok(MatteResult::new(rgba, processed.mask, (width, height), metadata))
    }
}
