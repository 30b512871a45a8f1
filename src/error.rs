//! Error types for matting operations

use thiserror::Error;

/// Result type alias for matting operations
pub type Result<T> = std::result::Result<T, MatteError>;

/// Error types for model loading, inference and image handling
#[derive(Error, Debug)]
pub enum MatteError {
    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// The model artifact could not be fetched, parsed or initialized
    #[error("Model load failed: {0}")]
    ModelLoad(String),

    /// Inference was requested before a model handle was attached
    #[error("Model not ready: {0}")]
    ModelNotReady(String),

    /// Inference was requested before an image was loaded
    #[error("No image loaded: {0}")]
    NoImage(String),

    /// Backend inference errors, including malformed output tensors
    #[error("Inference error: {0}")]
    Inference(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Pre/postprocessing errors
    #[error("Processing error: {0}")]
    Processing(String),

    /// Model download errors
    #[error("Network error: {0}")]
    Network(String),
}

impl MatteError {
    /// Create a new model load error
    pub fn model_load<S: Into<String>>(msg: S) -> Self {
        Self::ModelLoad(msg.into())
    }

    /// Create a new model-not-ready error
    pub fn model_not_ready<S: Into<String>>(msg: S) -> Self {
        Self::ModelNotReady(msg.into())
    }

    /// Create a new no-image error
    pub fn no_image<S: Into<String>>(msg: S) -> Self {
        Self::NoImage(msg.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new processing error
    pub fn processing<S: Into<String>>(msg: S) -> Self {
        Self::Processing(msg.into())
    }

    /// Create a network error from any displayable cause
    pub fn network_error<S: Into<String>, E: std::fmt::Display>(context: S, error: E) -> Self {
        Self::Network(format!("{}: {}", context.into(), error))
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {operation} '{path_display}': {error}"),
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
    ) -> Self {
        Self::InvalidConfig(format!(
            "Invalid {parameter}: {value} (valid range: {valid_range})"
        ))
    }

    /// Create processing error with stage context
    pub fn processing_stage_error(stage: &str, details: &str, input_info: Option<&str>) -> Self {
        let input_context = match input_info {
            Some(info) => format!(" (input: {info})"),
            None => String::new(),
        };

        Self::Processing(format!(
            "Processing failed at stage '{stage}'{input_context}: {details}"
        ))
    }

    /// Whether this error belongs to the model-load failure family.
    ///
    /// A missing model handle counts as a load failure: the only way to
    /// reach that state is a load that never happened or did not succeed.
    #[must_use]
    pub fn is_model_failure(&self) -> bool {
        matches!(self, Self::ModelLoad(_) | Self::ModelNotReady(_))
    }

    /// Whether this error happened while running the pipeline on an image
    #[must_use]
    pub fn is_inference_failure(&self) -> bool {
        matches!(
            self,
            Self::Inference(_) | Self::Processing(_) | Self::Image(_)
        )
    }
}
