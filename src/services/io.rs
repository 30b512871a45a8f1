//! Image I/O operations service
//!
//! Decoding and PNG encoding live here so the pipeline and the session
//! never touch the filesystem or codecs directly.

use crate::error::{MatteError, Result};
use image::{DynamicImage, EncodableLayout, ImageBuffer, ImageFormat, PixelWithColorType};
use std::io::Cursor;
use std::path::Path;

/// Service for handling image file input/output operations
pub struct ImageIOService;

impl ImageIOService {
    /// Load an image from a file path
    ///
    /// Falls back to content sniffing when the extension does not match the data.
    ///
    /// # Examples
    /// ```rust,no_run
    /// use dis_matte::services::ImageIOService;
    ///
    /// let image = ImageIOService::load_image("input.jpg")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    ///
    /// # Errors
    /// - File missing or unreadable
    /// - Data is not a supported image format
    pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(MatteError::file_io_error(
                "read image file",
                path_ref,
                &std::io::Error::new(std::io::ErrorKind::NotFound, "file does not exist"),
            ));
        }

        match image::open(path_ref) {
            Ok(img) => Ok(img),
            Err(e) => {
                log::debug!(
                    "Extension-based loading failed for {}: {}. Attempting content-based detection.",
                    path_ref.display(),
                    e
                );

                let data = std::fs::read(path_ref)
                    .map_err(|io_err| MatteError::file_io_error("read image data", path_ref, &io_err))?;

                image::load_from_memory(&data).map_err(|content_err| {
                    MatteError::processing_stage_error(
                        "image loading",
                        &format!("Extension error: {e}. Content error: {content_err}"),
                        Some(&format!(
                            "path: {}, size: {} bytes",
                            path_ref.display(),
                            data.len()
                        )),
                    )
                })
            },
        }
    }

    /// Decode an in-memory image, guessing the format from its content
    ///
    /// # Errors
    /// - Data is not a supported image format
    pub fn decode_bytes(bytes: &[u8]) -> Result<DynamicImage> {
        Ok(image::load_from_memory(bytes)?)
    }

    /// Encode an image buffer as PNG
    ///
    /// # Errors
    /// - Encoder failure
    pub fn encode_png<P>(image: &ImageBuffer<P, Vec<P::Subpixel>>) -> Result<Vec<u8>>
    where
        P: PixelWithColorType,
        [P::Subpixel]: EncodableLayout,
    {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Png)?;
        Ok(buffer.into_inner())
    }

    /// Encode an image buffer as PNG and write it, creating parent directories
    ///
    /// # Errors
    /// - Directory creation or write failure
    /// - Encoder failure
    pub fn save_png<P, Q>(image: &ImageBuffer<P, Vec<P::Subpixel>>, path: Q) -> Result<()>
    where
        P: PixelWithColorType,
        [P::Subpixel]: EncodableLayout,
        Q: AsRef<Path>,
    {
        let bytes = Self::encode_png(image)?;
        Self::write_bytes(&bytes, path)
    }

    /// Write encoded bytes, creating parent directories
    ///
    /// # Errors
    /// - Directory creation or write failure
    pub fn write_bytes<Q: AsRef<Path>>(bytes: &[u8], path: Q) -> Result<()> {
        let path_ref = path.as_ref();

        if let Some(parent) = path_ref.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| MatteError::file_io_error("create output directory", parent, &e))?;
        }

        std::fs::write(path_ref, bytes)
            .map_err(|e| MatteError::file_io_error("write image", path_ref, &e))
    }
}
