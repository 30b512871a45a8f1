//! Model artifact location and retrieval
//!
//! The matting network is a single ONNX file with one input of shape
//! `1x3x1024x1024` and one output reshape-compatible with `1024x1024`.
//! A [`ModelSpec`] names where that file lives; an [`ArtifactSource`]
//! turns it into bytes the loader can hand to a backend.

use crate::download::{self, ModelDownloader};
use crate::error::{MatteError, Result};
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};

/// Relative path the model is read from when nothing else is configured
pub const DEFAULT_MODEL_PATH: &str = "DIS-inference.onnx";

/// Side length of the square model input
pub const MODEL_INPUT_SIZE: u32 = 1024;

/// NCHW shape of the model input tensor
pub const MODEL_INPUT_SHAPE: (usize, usize, usize, usize) = (1, 3, 1024, 1024);

/// NCHW shape the model output is reshaped to
pub const MODEL_OUTPUT_SHAPE: (usize, usize, usize, usize) = (1, 1, 1024, 1024);

/// Environment variable overriding the model directory
pub const MODEL_DIR_ENV: &str = "DIS_CONFIG_DIR";

const APP_DIR_NAME: &str = "dis-matte";

/// Model source specification
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ModelSource {
    /// Model file on the local filesystem
    External(PathBuf),
    /// Model file downloaded over HTTP(S) into the model directory
    Url(String),
}

impl ModelSource {
    /// Get a display name for tracing and logging
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            ModelSource::External(path) => {
                format!(
                    "external:{}",
                    path.file_name().unwrap_or_default().to_string_lossy()
                )
            },
            ModelSource::Url(url) => format!("url:{}", download::file_name_for_url(url)),
        }
    }

    /// Interpret a CLI argument: `http://` and `https://` prefixes mean a URL,
    /// anything else is a path
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value.starts_with("http://") || value.starts_with("https://") {
            Self::Url(value.to_string())
        } else {
            Self::External(PathBuf::from(value))
        }
    }
}

/// Where to find the model and, optionally, the checksum it must match
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ModelSpec {
    pub source: ModelSource,
    /// Lowercase hex SHA-256 of the artifact
    #[serde(default)]
    pub sha256: Option<String>,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            source: ModelSource::External(PathBuf::from(DEFAULT_MODEL_PATH)),
            sha256: None,
        }
    }
}

impl ModelSpec {
    /// Validate the source and checksum format
    ///
    /// # Errors
    /// - Empty path or URL
    /// - URL that is not HTTP(S)
    /// - Checksum that is not 64 hex digits
    pub fn validate(&self) -> Result<()> {
        match &self.source {
            ModelSource::External(path) if path.as_os_str().is_empty() => {
                return Err(MatteError::invalid_config("Model path cannot be empty"));
            },
            ModelSource::External(_) => {},
            ModelSource::Url(url) => download::validate_model_url(url)?,
        }

        if let Some(hash) = &self.sha256 {
            if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(MatteError::invalid_config(format!(
                    "Invalid model sha256 '{hash}': expected 64 hexadecimal characters"
                )));
            }
        }

        Ok(())
    }

    /// Build the artifact source matching this specification
    #[must_use]
    pub fn artifact_source(&self, show_progress: bool) -> Box<dyn ArtifactSource> {
        match &self.source {
            ModelSource::External(path) => Box::new(
                FileArtifactSource::new(path).with_sha256(self.sha256.clone()),
            ),
            ModelSource::Url(url) => Box::new(
                RemoteArtifactSource::new(url.clone(), model_dir())
                    .with_sha256(self.sha256.clone())
                    .with_progress(show_progress),
            ),
        }
    }
}

/// Model information and metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: String,
    pub size_bytes: usize,
    pub input_shape: (usize, usize, usize, usize),
    pub output_shape: (usize, usize, usize, usize),
}

/// Serialized model bytes plus where they came from
#[derive(Clone)]
pub struct ModelArtifact {
    name: String,
    bytes: Vec<u8>,
}

impl std::fmt::Debug for ModelArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelArtifact")
            .field("name", &self.name)
            .field("size_bytes", &self.bytes.len())
            .finish()
    }
}

impl ModelArtifact {
    #[must_use]
    pub fn new<S: Into<String>>(name: S, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Metadata for a model with the fixed matting shapes
    #[must_use]
    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            name: self.name.clone(),
            size_bytes: self.bytes.len(),
            input_shape: MODEL_INPUT_SHAPE,
            output_shape: MODEL_OUTPUT_SHAPE,
        }
    }
}

/// Asynchronous provider of model bytes
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Human readable origin used in logs and error messages
    fn describe(&self) -> String;

    /// Fetch the artifact
    ///
    /// # Errors
    /// - Artifact missing, unreadable or empty
    /// - Download failure
    /// - Checksum mismatch
    async fn fetch(&self) -> Result<ModelArtifact>;
}

/// Reads the model from a local file
#[derive(Debug, Clone)]
pub struct FileArtifactSource {
    path: PathBuf,
    sha256: Option<String>,
}

impl FileArtifactSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            sha256: None,
        }
    }

    #[must_use]
    pub fn with_sha256(mut self, sha256: Option<String>) -> Self {
        self.sha256 = sha256;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ArtifactSource for FileArtifactSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn fetch(&self) -> Result<ModelArtifact> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| MatteError::file_io_error("read model artifact", &self.path, &e))?;

        let name = self
            .path
            .file_name()
            .map_or_else(|| self.describe(), |n| n.to_string_lossy().into_owned());

        finish_artifact(name, bytes, self.sha256.as_deref())
    }
}

/// Downloads the model once into a directory and reuses the file afterwards
#[derive(Debug, Clone)]
pub struct RemoteArtifactSource {
    url: String,
    dir: PathBuf,
    sha256: Option<String>,
    show_progress: bool,
}

impl RemoteArtifactSource {
    pub fn new<S: Into<String>, P: Into<PathBuf>>(url: S, dir: P) -> Self {
        Self {
            url: url.into(),
            dir: dir.into(),
            sha256: None,
            show_progress: false,
        }
    }

    #[must_use]
    pub fn with_sha256(mut self, sha256: Option<String>) -> Self {
        self.sha256 = sha256;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Local path the artifact is stored at
    #[must_use]
    pub fn local_path(&self) -> PathBuf {
        self.dir.join(download::file_name_for_url(&self.url))
    }

    /// Download the artifact unless a copy is already present
    ///
    /// # Errors
    /// - Network or filesystem failure
    /// - Checksum mismatch on the downloaded file
    pub async fn ensure_local(&self) -> Result<PathBuf> {
        let path = self.local_path();
        if path.is_file() {
            log::info!("Using previously downloaded model: {}", path.display());
            return Ok(path);
        }

        let downloader = ModelDownloader::new()?;
        downloader
            .download_file(&self.url, &path, self.sha256.as_deref(), self.show_progress)
            .await?;
        Ok(path)
    }
}

#[async_trait]
impl ArtifactSource for RemoteArtifactSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn fetch(&self) -> Result<ModelArtifact> {
        let path = self.ensure_local().await?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| MatteError::file_io_error("read model artifact", &path, &e))?;
        finish_artifact(download::file_name_for_url(&self.url), bytes, self.sha256.as_deref())
    }
}

/// Serves bytes already held in memory
#[derive(Debug, Clone)]
pub struct InMemoryArtifactSource {
    artifact: ModelArtifact,
}

impl InMemoryArtifactSource {
    #[must_use]
    pub fn new(artifact: ModelArtifact) -> Self {
        Self { artifact }
    }
}

#[async_trait]
impl ArtifactSource for InMemoryArtifactSource {
    fn describe(&self) -> String {
        format!("memory:{}", self.artifact.name())
    }

    async fn fetch(&self) -> Result<ModelArtifact> {
        if self.artifact.is_empty() {
            return Err(MatteError::model_load(format!(
                "Model artifact '{}' is empty",
                self.artifact.name()
            )));
        }
        Ok(self.artifact.clone())
    }
}

fn finish_artifact(name: String, bytes: Vec<u8>, sha256: Option<&str>) -> Result<ModelArtifact> {
    if bytes.is_empty() {
        return Err(MatteError::model_load(format!(
            "Model artifact '{name}' is empty"
        )));
    }

    if let Some(expected) = sha256 {
        let actual = download::sha256_hex(&bytes);
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(MatteError::model_load(format!(
                "Checksum mismatch for '{name}': expected {expected}, got {actual}"
            )));
        }
    }

    Ok(ModelArtifact::new(name, bytes))
}

/// Directory downloaded models are stored in
///
/// `$DIS_CONFIG_DIR` when set, otherwise `<config dir>/dis-matte`. When the
/// preferred directory cannot be created or written (read-only homes on
/// serverless hosts) the temp directory is used instead.
#[must_use]
pub fn model_dir() -> PathBuf {
    let preferred = std::env::var_os(MODEL_DIR_ENV)
        .map(PathBuf::from)
        .or_else(|| dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME)));
    select_writable_dir(preferred)
}

fn select_writable_dir(preferred: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = preferred {
        if is_writable_dir(&dir) {
            return dir;
        }
        log::warn!(
            "Model directory {} is not writable, falling back to temp directory",
            dir.display()
        );
    }
    std::env::temp_dir().join(APP_DIR_NAME)
}

fn is_writable_dir(dir: &Path) -> bool {
    fs::create_dir_all(dir).is_ok() && tempfile::tempfile_in(dir).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_spec_points_at_relative_artifact() {
        let spec = ModelSpec::default();
        assert_eq!(
            spec.source,
            ModelSource::External(PathBuf::from("DIS-inference.onnx"))
        );
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_model_source_parse() {
        assert_eq!(
            ModelSource::parse("https://example.com/isnet.onnx"),
            ModelSource::Url("https://example.com/isnet.onnx".to_string())
        );
        assert_eq!(
            ModelSource::parse("models/isnet.onnx"),
            ModelSource::External(PathBuf::from("models/isnet.onnx"))
        );
        assert_eq!(
            ModelSource::parse("models/isnet.onnx").display_name(),
            "external:isnet.onnx"
        );
    }

    #[test]
    fn test_spec_validation() {
        let bad_hash = ModelSpec {
            source: ModelSource::External(PathBuf::from("m.onnx")),
            sha256: Some("abc".to_string()),
        };
        assert!(bad_hash.validate().is_err());

        let good_hash = ModelSpec {
            source: ModelSource::External(PathBuf::from("m.onnx")),
            sha256: Some("a".repeat(64)),
        };
        assert!(good_hash.validate().is_ok());

        let empty_path = ModelSpec {
            source: ModelSource::External(PathBuf::new()),
            sha256: None,
        };
        assert!(empty_path.validate().is_err());

        let ftp = ModelSpec {
            source: ModelSource::Url("ftp://example.com/m.onnx".to_string()),
            sha256: None,
        };
        assert!(ftp.validate().is_err());
    }

    #[tokio::test]
    async fn test_file_source_reads_and_verifies() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tiny.onnx");
        fs::write(&path, b"onnx-bytes").unwrap();

        let artifact = FileArtifactSource::new(&path).fetch().await.unwrap();
        assert_eq!(artifact.name(), "tiny.onnx");
        assert_eq!(artifact.bytes(), b"onnx-bytes");
        assert_eq!(artifact.info().input_shape, (1, 3, 1024, 1024));

        let good = download::sha256_hex(b"onnx-bytes");
        let verified = FileArtifactSource::new(&path)
            .with_sha256(Some(good))
            .fetch()
            .await;
        assert!(verified.is_ok());

        let mismatch = FileArtifactSource::new(&path)
            .with_sha256(Some("0".repeat(64)))
            .fetch()
            .await;
        assert!(matches!(mismatch, Err(MatteError::ModelLoad(_))));
    }

    #[tokio::test]
    async fn test_file_source_missing_and_empty() {
        let dir = TempDir::new().unwrap();

        let missing = FileArtifactSource::new(dir.path().join("absent.onnx"))
            .fetch()
            .await;
        assert!(matches!(missing, Err(MatteError::Io(_))));

        let empty_path = dir.path().join("empty.onnx");
        fs::write(&empty_path, b"").unwrap();
        let empty = FileArtifactSource::new(&empty_path).fetch().await;
        assert!(matches!(empty, Err(MatteError::ModelLoad(_))));
    }

    #[tokio::test]
    async fn test_remote_source_reuses_existing_download() {
        let dir = TempDir::new().unwrap();
        let source = RemoteArtifactSource::new("https://example.com/models/isnet.onnx", dir.path());
        assert_eq!(source.local_path(), dir.path().join("isnet.onnx"));

        fs::write(source.local_path(), b"cached-model").unwrap();
        let artifact = source.fetch().await.unwrap();
        assert_eq!(artifact.bytes(), b"cached-model");
        assert_eq!(artifact.name(), "isnet.onnx");
    }

    #[test]
    fn test_select_writable_dir() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("nested").join("models");
        assert_eq!(select_writable_dir(Some(nested.clone())), nested);
        assert!(nested.is_dir());

        let fallback = select_writable_dir(None);
        assert_eq!(fallback, std::env::temp_dir().join("dis-matte"));
    }
}
