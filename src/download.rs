//! Model downloading
//!
//! Streams a single model file over HTTP(S) into the model directory with
//! progress reporting, optional SHA-256 verification and an atomic rename
//! into place.

use crate::error::{MatteError, Result};
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;

/// Model downloader with progress reporting
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
}

/// Progress bar abstraction that works with and without CLI features
#[derive(Debug)]
pub enum ProgressIndicator {
    #[cfg(feature = "cli")]
    Indicatif(ProgressBar),
    NoOp,
}

impl ProgressIndicator {
    /// Set message for progress indicator
    pub fn set_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_message(msg),
            Self::NoOp => {
                let _ = msg;
            },
        }
    }

    /// Set length for progress indicator
    pub fn set_length(&self, len: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_length(len),
            Self::NoOp => {
                let _ = len;
            },
        }
    }

    /// Set position for progress indicator
    pub fn set_position(&self, pos: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_position(pos),
            Self::NoOp => {
                let _ = pos;
            },
        }
    }

    /// Finish progress indicator with message
    pub fn finish_with_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.finish_with_message(msg),
            Self::NoOp => {
                let _ = msg;
            },
        }
    }

    fn create(show_progress: bool) -> Self {
        #[cfg(feature = "cli")]
        {
            if show_progress {
                let pb = ProgressBar::new(0);
                if let Ok(style) = ProgressStyle::default_bar().template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
                ) {
                    pb.set_style(style.progress_chars("#>-"));
                }
                return Self::Indicatif(pb);
            }
        }
        let _ = show_progress;
        Self::NoOp
    }
}

impl ModelDownloader {
    /// Create a new model downloader
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| MatteError::network_error("Failed to create HTTP client", e))?;

        Ok(Self { client })
    }

    /// Download `url` to `destination`
    ///
    /// The body is streamed into a temporary file next to the destination,
    /// verified against `expected_sha256` when given, and then renamed into
    /// place. A failed or mismatching download leaves nothing behind.
    ///
    /// # Errors
    /// - Unsupported URL
    /// - Network errors or non-success HTTP status
    /// - File system errors
    /// - Checksum mismatch
    pub async fn download_file(
        &self,
        url: &str,
        destination: &Path,
        expected_sha256: Option<&str>,
        show_progress: bool,
    ) -> Result<()> {
        validate_model_url(url)?;
        log::info!("Downloading model from: {}", url);

        let parent = destination
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)
            .map_err(|e| MatteError::file_io_error("create model directory", parent, &e))?;

        let progress = ProgressIndicator::create(show_progress);
        progress.set_message(format!("Downloading {}", file_name_for_url(url)));

        let mut staging = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| MatteError::file_io_error("create temporary file in", parent, &e))?;

        match self.stream_into(url, staging.as_file_mut(), &progress).await {
            Ok(downloaded) => {
                log::debug!("Downloaded {} bytes from {}", downloaded, url);
            },
            Err(e) => {
                progress.finish_with_message("Download failed".to_string());
                return Err(e);
            },
        }

        if !verify_file_integrity(staging.path(), expected_sha256)? {
            progress.finish_with_message("Checksum mismatch".to_string());
            return Err(MatteError::network_error(
                format!("Checksum mismatch for {url}"),
                "downloaded file does not match the expected sha256",
            ));
        }

        staging.persist(destination).map_err(|e| {
            MatteError::file_io_error("move downloaded model to", destination, &e.error)
        })?;

        progress.finish_with_message(format!("Downloaded {}", file_name_for_url(url)));
        log::info!("Model stored at {}", destination.display());
        Ok(())
    }

    async fn stream_into(
        &self,
        url: &str,
        file: &mut fs::File,
        progress: &ProgressIndicator,
    ) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MatteError::network_error(format!("Failed to download {url}"), e))?;

        if !response.status().is_success() {
            return Err(MatteError::network_error(
                format!("HTTP error {} for {}", response.status(), url),
                "request was not successful",
            ));
        }

        let total_size = response.content_length();
        if let Some(total) = total_size {
            progress.set_length(total);
        }

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut downloaded = 0u64;
        let mut buffer = vec![0; 8192];

        loop {
            let bytes_read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| MatteError::network_error("Failed to read download stream", e))?;

            if bytes_read == 0 {
                break;
            }

            file.write_all(buffer.get(..bytes_read).unwrap_or(&[]))
                .map_err(MatteError::Io)?;

            downloaded += bytes_read as u64;
            if total_size.is_some() {
                progress.set_position(downloaded);
            } else {
                progress.set_message(format!(
                    "Downloaded {:.1} MB",
                    downloaded as f64 / 1_048_576.0
                ));
            }
        }

        file.flush().map_err(MatteError::Io)?;
        Ok(downloaded)
    }
}

/// Lowercase hex SHA-256 digest of `bytes`
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Verify the integrity of a file using SHA-256
///
/// Returns `Ok(true)` when no hash is expected.
///
/// # Errors
/// - File cannot be read
pub fn verify_file_integrity(file_path: &Path, expected_hash: Option<&str>) -> Result<bool> {
    let Some(expected) = expected_hash else {
        return Ok(true);
    };

    let contents = fs::read(file_path)
        .map_err(|e| MatteError::file_io_error("read file for verification", file_path, &e))?;
    let actual_hash = sha256_hex(&contents);

    if actual_hash.eq_ignore_ascii_case(expected) {
        Ok(true)
    } else {
        log::warn!(
            "File integrity check failed for {}: expected {}, got {}",
            file_path.display(),
            expected,
            actual_hash
        );
        Ok(false)
    }
}

/// Validate that a model URL can be downloaded
///
/// # Errors
/// - Empty URL
/// - Scheme other than `http` or `https`
pub fn validate_model_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(MatteError::invalid_config("Model URL cannot be empty"));
    }

    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| {
            MatteError::invalid_config(format!(
                "Unsupported URL format: {url}. Only http:// and https:// are supported"
            ))
        })?;

    if rest.split('/').next().unwrap_or_default().is_empty() {
        return Err(MatteError::invalid_config(format!(
            "Model URL has no host: {url}"
        )));
    }

    Ok(())
}

/// File name a downloaded model is stored under
///
/// The last path segment when it names an `.onnx` file, otherwise a short
/// hash of the URL.
#[must_use]
pub fn file_name_for_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.trim_end_matches('/').rsplit('/').next().unwrap_or_default();

    if last.to_ascii_lowercase().ends_with(".onnx") && !last.contains(':') {
        return last.to_string();
    }

    let hash = sha256_hex(url.as_bytes());
    format!("model-{}.onnx", hash.get(..16).unwrap_or(&hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_model_url() {
        assert!(validate_model_url("https://example.com/isnet.onnx").is_ok());
        assert!(validate_model_url("http://localhost:8080/model.onnx").is_ok());

        assert!(validate_model_url("").is_err());
        assert!(validate_model_url("ftp://example.com/model.onnx").is_err());
        assert!(validate_model_url("https:///model.onnx").is_err());
        assert!(validate_model_url("models/isnet.onnx").is_err());
    }

    #[test]
    fn test_file_name_for_url() {
        assert_eq!(
            file_name_for_url("https://example.com/models/isnet-general-use.onnx"),
            "isnet-general-use.onnx"
        );
        assert_eq!(
            file_name_for_url("https://example.com/isnet.onnx?download=true"),
            "isnet.onnx"
        );

        let hashed = file_name_for_url("https://example.com/model?id=42");
        assert!(hashed.starts_with("model-"));
        assert!(hashed.ends_with(".onnx"));
        assert_eq!(hashed.len(), "model-".len() + 16 + ".onnx".len());
        assert_eq!(hashed, file_name_for_url("https://example.com/model?id=42"));
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_verify_file_integrity() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.onnx");
        fs::write(&file_path, b"model weights").unwrap();

        assert!(verify_file_integrity(&file_path, None).unwrap());

        let expected = sha256_hex(b"model weights");
        assert!(verify_file_integrity(&file_path, Some(&expected)).unwrap());
        assert!(verify_file_integrity(&file_path, Some(&expected.to_uppercase())).unwrap());
        assert!(!verify_file_integrity(&file_path, Some(&"0".repeat(64))).unwrap());

        let missing = verify_file_integrity(&temp_dir.path().join("absent"), Some(&expected));
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn test_download_rejects_bad_url_without_touching_disk() {
        let temp_dir = TempDir::new().unwrap();
        let destination = temp_dir.path().join("model.onnx");
        let downloader = ModelDownloader::new().unwrap();

        let result = downloader
            .download_file("ftp://example.com/model.onnx", &destination, None, false)
            .await;

        assert!(matches!(result, Err(MatteError::InvalidConfig(_))));
        assert!(!destination.exists());
    }
}
