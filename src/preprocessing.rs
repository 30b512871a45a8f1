//! Image to tensor conversion
//!
//! The network expects a `1x3x1024x1024` NCHW tensor. Channels are stored
//! in reverse order relative to RGB (`B, G, R`) and every value is
//! `byte / 255 - 0.5`, so the full byte range maps onto `[-0.5, 0.5]`.

use crate::error::{MatteError, Result};
use crate::models::{MODEL_INPUT_SHAPE, MODEL_INPUT_SIZE};
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use ndarray::Array4;

/// Converts decoded images into model input tensors
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Resize to `1024x1024` with bilinear filtering and normalise into a tensor
    ///
    /// Aspect ratio is not preserved; the mask is stretched back to the
    /// original dimensions after inference.
    ///
    /// # Errors
    /// - Image with a zero width or height
    pub fn preprocess(image: &DynamicImage) -> Result<Array4<f32>> {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(MatteError::processing_stage_error(
                "preprocessing",
                "image has no pixels",
                Some(&format!("{width}x{height}")),
            ));
        }

        let rgb = image.to_rgb8();
        let resized = if (width, height) == (MODEL_INPUT_SIZE, MODEL_INPUT_SIZE) {
            rgb
        } else {
            imageops::resize(&rgb, MODEL_INPUT_SIZE, MODEL_INPUT_SIZE, FilterType::Triangle)
        };

        Ok(Self::rgb_to_tensor(&resized))
    }

    /// Normalise an already `1024x1024` RGB image into a tensor
    #[must_use]
    pub fn rgb_to_tensor(rgb: &RgbImage) -> Array4<f32> {
        let mut tensor = Array4::<f32>::zeros(MODEL_INPUT_SHAPE);

        for (x, y, pixel) in rgb.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                let byte = pixel.0.get(2 - c).copied().unwrap_or(0);
                if let Some(value) = tensor.get_mut([0, c, y, x]) {
                    *value = f32::from(byte) / 255.0 - 0.5;
                }
            }
        }

        tensor
    }
}
