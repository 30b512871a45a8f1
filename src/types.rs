//! Result, mask and timing types

use crate::error::{MatteError, Result};
use crate::services::io::ImageIOService;
use chrono::{DateTime, Utc};
use image::{GrayImage, ImageBuffer, RgbaImage};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Result of matting one image
#[derive(Debug, Clone)]
pub struct MatteResult {
    /// Original colour channels with the predicted alpha channel
    pub image: RgbaImage,

    /// The 8-bit alpha matte
    pub mask: SegmentationMask,

    /// Dimensions of the source image
    pub original_dimensions: (u32, u32),

    pub metadata: ProcessingMetadata,
}

impl MatteResult {
    #[must_use]
    pub fn new(
        image: RgbaImage,
        mask: SegmentationMask,
        original_dimensions: (u32, u32),
        metadata: ProcessingMetadata,
    ) -> Self {
        Self {
            image,
            mask,
            original_dimensions,
            metadata,
        }
    }

    /// Encode the RGBA result as PNG
    ///
    /// # Errors
    /// - PNG encoding failure
    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        ImageIOService::encode_png(&self.image)
    }

    /// Save the RGBA result as PNG
    ///
    /// # Errors
    /// - File creation or encoding failure
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        ImageIOService::save_png(&self.image, path)
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    #[must_use]
    pub fn timings(&self) -> &ProcessingTimings {
        &self.metadata.timings
    }

    /// One-line timing summary for logs
    #[must_use]
    pub fn timing_summary(&self) -> String {
        let t = &self.metadata.timings;
        format!(
            "Total: {}ms | Preprocess: {}ms | Inference: {}ms | Postprocess: {}ms",
            t.total_ms, t.preprocessing_ms, t.inference_ms, t.postprocessing_ms
        )
    }
}

/// 8-bit alpha matte
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentationMask {
    /// Mask data as grayscale values (0-255), row-major
    pub data: Vec<u8>,

    /// Mask dimensions (width, height)
    pub dimensions: (u32, u32),
}

impl SegmentationMask {
    #[must_use]
    pub fn new(data: Vec<u8>, dimensions: (u32, u32)) -> Self {
        Self { data, dimensions }
    }

    /// Create mask from a grayscale image
    #[must_use]
    pub fn from_image(image: &GrayImage) -> Self {
        Self::new(image.as_raw().clone(), image.dimensions())
    }

    /// Convert mask to a grayscale image
    ///
    /// # Errors
    /// - Data length does not match the dimensions
    pub fn to_image(&self) -> Result<GrayImage> {
        let (width, height) = self.dimensions;
        ImageBuffer::from_raw(width, height, self.data.clone())
            .ok_or_else(|| MatteError::processing("Failed to create image from mask data"))
    }

    /// Overwrite the alpha channel of `image` with this mask, leaving RGB untouched
    ///
    /// # Errors
    /// - Image and mask dimensions differ
    pub fn apply_to_image(&self, image: &mut RgbaImage) -> Result<()> {
        if image.dimensions() != self.dimensions {
            return Err(MatteError::processing_stage_error(
                "alpha composite",
                "image and mask dimensions do not match",
                Some(&format!(
                    "image {:?}, mask {:?}",
                    image.dimensions(),
                    self.dimensions
                )),
            ));
        }

        for (pixel, &alpha) in image.pixels_mut().zip(self.data.iter()) {
            pixel.0[3] = alpha;
        }

        Ok(())
    }

    /// Smallest and largest value, `None` for an empty mask
    #[must_use]
    pub fn range(&self) -> Option<(u8, u8)> {
        let min = self.data.iter().copied().min()?;
        let max = self.data.iter().copied().max()?;
        Some((min, max))
    }

    #[must_use]
    pub fn statistics(&self) -> MaskStatistics {
        let total_pixels = self.data.len();
        let foreground_pixels = self.data.iter().filter(|&&x| x > 127).count();
        let foreground_ratio = if total_pixels == 0 {
            0.0
        } else {
            foreground_pixels as f32 / total_pixels as f32
        };

        MaskStatistics {
            total_pixels,
            foreground_pixels,
            background_pixels: total_pixels - foreground_pixels,
            foreground_ratio,
        }
    }

    /// Save mask as grayscale PNG
    ///
    /// # Errors
    /// - File creation or encoding failure
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let image = self.to_image()?;
        ImageIOService::save_png(&image, path)
    }
}

/// Statistics about a segmentation mask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskStatistics {
    pub total_pixels: usize,
    pub foreground_pixels: usize,
    pub background_pixels: usize,
    pub foreground_ratio: f32,
}

/// Timing breakdown for one matting call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    /// Image decoding, when the pipeline decoded the input itself
    pub image_decode_ms: u64,

    /// Resize and normalisation into the input tensor
    pub preprocessing_ms: u64,

    /// Model execution
    pub inference_ms: u64,

    /// Mask resize, stretch and alpha composite
    pub postprocessing_ms: u64,

    /// End-to-end time
    pub total_ms: u64,
}

impl ProcessingTimings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Share of total time spent in the model
    #[must_use]
    pub fn inference_ratio(&self) -> f64 {
        if self.total_ms == 0 {
            0.0
        } else {
            self.inference_ms as f64 / self.total_ms as f64
        }
    }

    /// Time not attributed to any stage
    #[must_use]
    pub fn other_overhead_ms(&self) -> u64 {
        let measured = self.image_decode_ms
            + self.preprocessing_ms
            + self.inference_ms
            + self.postprocessing_ms;
        self.total_ms.saturating_sub(measured)
    }
}

/// Metadata about the processing operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    pub timings: ProcessingTimings,

    /// Backend that ran the model
    pub backend: String,

    /// Model artifact name
    pub model_name: String,

    /// Whether the predicted mask had no contrast and the uniform policy was applied
    pub uniform_mask: bool,

    /// Mask coverage, recorded in debug mode only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_statistics: Option<MaskStatistics>,

    /// When processing finished
    pub completed_at: DateTime<Utc>,
}

impl ProcessingMetadata {
    #[must_use]
    pub fn new<B: Into<String>, M: Into<String>>(backend: B, model_name: M) -> Self {
        Self {
            timings: ProcessingTimings::new(),
            backend: backend.into(),
            model_name: model_name.into(),
            uniform_mask: false,
            mask_statistics: None,
            completed_at: Utc::now(),
        }
    }
}
