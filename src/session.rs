//! Interactive matting session
//!
//! Holds everything a front end displays: the selected image, the current
//! result, which controls are enabled, the loading indicator and the last
//! error. Front ends call the `on_*` entry points in response to user
//! actions and render from [`MattingSession::snapshot`].
//!
//! Control state is derived from what the session holds, so there is no
//! path that leaves a control stuck: infer is enabled while an image is
//! loaded without a result and nothing is running, save while a result is
//! displayed, reset while anything is displayed.

use crate::config::{MatteConfig, UniformMaskPolicy};
use crate::error::{MatteError, Result};
use crate::inference::ModelHandle;
use crate::loader::ModelLoader;
use crate::models::ArtifactSource;
use crate::processor::MattingProcessor;
use crate::services::ImageIOService;
use crate::types::MatteResult;
use image::{DynamicImage, RgbaImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

/// File name offered for the exported result
pub const EXPORT_FILE_NAME: &str = "result.png";

/// Which user controls are currently usable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlState {
    pub infer_enabled: bool,
    pub reset_enabled: bool,
    pub save_enabled: bool,
}

/// Observable busy flag
///
/// Clones share the same flag. The flag is raised by [`LoadingIndicator::show`]
/// and lowered when the returned guard is dropped.
#[derive(Debug, Clone)]
pub struct LoadingIndicator {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for LoadingIndicator {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadingIndicator {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Receiver notified on every visibility change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn is_visible(&self) -> bool {
        *self.tx.borrow()
    }

    /// Show the indicator until the guard is dropped
    #[must_use = "the indicator is hidden as soon as the guard is dropped"]
    pub fn show(&self) -> LoadingGuard {
        self.tx.send_replace(true);
        LoadingGuard {
            tx: Arc::clone(&self.tx),
        }
    }
}

/// Hides the loading indicator when dropped
#[derive(Debug)]
pub struct LoadingGuard {
    tx: Arc<watch::Sender<bool>>,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.tx.send_replace(false);
    }
}

/// Encoded result ready to hand to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedImage {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl ExportedImage {
    /// Write under `dir` using [`Self::file_name`], returning the full path
    ///
    /// # Errors
    /// - Directory creation or write failure
    pub fn write_to_dir<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf> {
        let path = dir.as_ref().join(&self.file_name);
        ImageIOService::write_bytes(&self.bytes, &path)?;
        Ok(path)
    }
}

/// Everything an observer needs to render the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub controls: ControlState,
    pub loading: bool,
    pub model_ready: bool,
    pub source_visible: bool,
    pub result_visible: bool,
    pub last_error: Option<String>,
}

/// State of one interactive matting session
#[derive(Debug)]
pub struct MattingSession {
    model: Option<ModelHandle>,
    uniform_policy: UniformMaskPolicy,
    debug: bool,
    source: Option<DynamicImage>,
    source_visible: bool,
    result: Option<MatteResult>,
    indicator: LoadingIndicator,
    last_error: Option<String>,
}

impl MattingSession {
    /// Session without a model; inference fails until one is attached or loaded
    #[must_use]
    pub fn new(config: &MatteConfig) -> Self {
        Self {
            model: None,
            uniform_policy: config.uniform_mask,
            debug: config.debug,
            source: None,
            source_visible: false,
            result: None,
            indicator: LoadingIndicator::new(),
            last_error: None,
        }
    }

    /// Session using an already loaded model
    #[must_use]
    pub fn with_model(config: &MatteConfig, model: ModelHandle) -> Self {
        let mut session = Self::new(config);
        session.model = Some(model);
        session
    }

    #[must_use]
    pub fn indicator(&self) -> &LoadingIndicator {
        &self.indicator
    }

    #[must_use]
    pub fn model(&self) -> Option<&ModelHandle> {
        self.model.as_ref()
    }

    #[must_use]
    pub fn source_image(&self) -> Option<&DynamicImage> {
        self.source.as_ref()
    }

    /// Result currently on display
    #[must_use]
    pub fn current_result(&self) -> Option<&MatteResult> {
        self.result.as_ref()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    #[must_use]
    pub fn controls(&self) -> ControlState {
        let busy = self.indicator.is_visible();
        ControlState {
            infer_enabled: self.source.is_some() && self.result.is_none() && !busy,
            reset_enabled: self.source.is_some() || self.result.is_some(),
            save_enabled: self.result.is_some() && !busy,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            controls: self.controls(),
            loading: self.indicator.is_visible(),
            model_ready: self.model.is_some(),
            source_visible: self.source_visible,
            result_visible: self.result.is_some(),
            last_error: self.last_error.clone(),
        }
    }

    /// Load the model and keep the handle on success
    ///
    /// On failure the error is logged and recorded, and the session stays
    /// without a model. Returns whether a model is now attached.
    #[instrument(skip_all, fields(source = %source.describe()))]
    pub async fn load_model(&mut self, loader: &ModelLoader, source: &dyn ArtifactSource) -> bool {
        let outcome = {
            let _loading = self.indicator.show();
            loader.load(source).await
        };

        match outcome {
            Ok(handle) => {
                info!(backend = handle.backend_name(), "Model ready");
                self.model = Some(handle);
                self.last_error = None;
                true
            },
            Err(e) => {
                error!(error = %e, "Model load failed, inference disabled");
                self.last_error = Some(e.to_string());
                false
            },
        }
    }

    /// Show a new source image
    ///
    /// Any previous result is discarded.
    pub fn on_image_loaded(&mut self, image: DynamicImage) {
        info!(
            width = image.width(),
            height = image.height(),
            "Image loaded"
        );
        self.source = Some(image);
        self.source_visible = true;
        self.result = None;
        self.last_error = None;
    }

    /// Decode user-selected bytes and show them
    ///
    /// # Errors
    /// - Bytes are not a decodable image; the session is left unchanged
    pub fn on_file_selected(&mut self, bytes: &[u8]) -> Result<()> {
        let image = ImageIOService::decode_bytes(bytes).inspect_err(|e| {
            warn!(error = %e, "Selected file could not be decoded");
        })?;
        self.on_image_loaded(image);
        Ok(())
    }

    /// Load a user-selected file and show it
    ///
    /// # Errors
    /// - File missing or undecodable; the session is left unchanged
    pub fn on_file_path_selected<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let image = ImageIOService::load_image(path.as_ref()).inspect_err(|e| {
            warn!(error = %e, path = %path.as_ref().display(), "Selected file could not be loaded");
        })?;
        self.on_image_loaded(image);
        Ok(())
    }

    /// Run the pipeline on the current image and display the result
    ///
    /// The loading indicator is visible for the duration of the call and is
    /// hidden again on every exit, including when this future is dropped.
    ///
    /// # Errors
    /// - [`MatteError::NoImage`] when no image is loaded
    /// - [`MatteError::ModelNotReady`] when no model is attached
    /// - Any pipeline failure; nothing is displayed in that case
    #[instrument(skip(self))]
    pub async fn on_infer_requested(&mut self) -> Result<RgbaImage> {
        let outcome = {
            let _loading = self.indicator.show();
            match (&self.source, &self.model) {
                (None, _) => Err(MatteError::no_image("Select an image before running inference")),
                (Some(_), None) => Err(MatteError::model_not_ready(
                    "The model has not been loaded; inference is unavailable",
                )),
                (Some(source), Some(model)) => {
                    MattingProcessor::with_policy(model.clone(), self.uniform_policy)
                        .with_debug(self.debug)
                        .process_image(source)
                        .await
                },
            }
        };

        match outcome {
            Ok(result) => {
                let image = result.image.clone();
                self.result = Some(result);
                self.source_visible = false;
                self.last_error = None;
                Ok(image)
            },
            Err(e) => {
                error!(error = %e, "Inference request failed");
                self.last_error = Some(e.to_string());
                Err(e)
            },
        }
    }

    /// Clear the source and the result; all controls end up disabled
    pub fn on_reset_requested(&mut self) {
        self.source = None;
        self.source_visible = false;
        self.result = None;
        self.last_error = None;
    }

    /// Encode the displayed result as PNG
    ///
    /// # Errors
    /// - [`MatteError::NoImage`] when no result is displayed
    /// - PNG encoding failure
    pub fn on_save_requested(&self) -> Result<ExportedImage> {
        let result = self
            .result
            .as_ref()
            .ok_or_else(|| MatteError::no_image("There is no result to save"))?;

        Ok(ExportedImage {
            file_name: EXPORT_FILE_NAME.to_string(),
            bytes: result.to_png_bytes()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{MockBackend, MockMask};
    use image::{Rgb, RgbImage};

    fn image() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 30, Rgb([10, 20, 30])))
    }

    fn ready_session(mask: MockMask) -> MattingSession {
        let handle = ModelHandle::new(Box::new(MockBackend::ready(mask))).unwrap();
        MattingSession::with_model(&MatteConfig::default(), handle)
    }

    #[test]
    fn test_initial_state() {
        let session = MattingSession::new(&MatteConfig::default());
        let snapshot = session.snapshot();
        assert_eq!(snapshot.controls, ControlState::default());
        assert!(!snapshot.loading);
        assert!(!snapshot.model_ready);
        assert!(!snapshot.source_visible);
        assert!(!snapshot.result_visible);
    }

    #[test]
    fn test_loading_guard_hides_on_drop() {
        let indicator = LoadingIndicator::new();
        let mut rx = indicator.subscribe();
        {
            let _guard = indicator.show();
            assert!(indicator.is_visible());
            assert!(*rx.borrow_and_update());
        }
        assert!(!indicator.is_visible());
        assert!(rx.has_changed().unwrap());
        assert!(!*rx.borrow_and_update());
    }

    #[test]
    fn test_image_loaded_enables_infer_and_reset() {
        let mut session = MattingSession::new(&MatteConfig::default());
        session.on_image_loaded(image());

        let controls = session.controls();
        assert!(controls.infer_enabled);
        assert!(controls.reset_enabled);
        assert!(!controls.save_enabled);
        assert!(session.snapshot().source_visible);
    }

    #[test]
    fn test_bad_file_leaves_state_unchanged() {
        let mut session = MattingSession::new(&MatteConfig::default());
        session.on_image_loaded(image());
        let before = session.snapshot();

        assert!(session.on_file_selected(b"garbage").is_err());
        assert_eq!(session.snapshot(), before);
        assert!(session.source_image().is_some());
    }

    #[tokio::test]
    async fn test_infer_without_image() {
        let mut session = ready_session(MockMask::Radial);
        let error = session.on_infer_requested().await.unwrap_err();
        assert!(matches!(error, MatteError::NoImage(_)));
        assert!(!session.indicator().is_visible());
    }

    #[tokio::test]
    async fn test_successful_infer_flow() {
        let mut session = ready_session(MockMask::Radial);
        session.on_image_loaded(image());

        let rendered = session.on_infer_requested().await.unwrap();
        assert_eq!(rendered.dimensions(), (40, 30));

        let snapshot = session.snapshot();
        assert!(!snapshot.loading);
        assert!(snapshot.result_visible);
        assert!(!snapshot.source_visible);
        assert_eq!(
            snapshot.controls,
            ControlState {
                infer_enabled: false,
                reset_enabled: true,
                save_enabled: true,
            }
        );
    }

    #[tokio::test]
    async fn test_failed_infer_reenables_infer() {
        let handle = ModelHandle::new(Box::new(
            MockBackend::ready(MockMask::Radial).with_inference_failure(),
        ))
        .unwrap();
        let mut session = MattingSession::with_model(&MatteConfig::default(), handle);
        session.on_image_loaded(image());

        let error = session.on_infer_requested().await.unwrap_err();
        assert!(error.is_inference_failure());

        let snapshot = session.snapshot();
        assert!(!snapshot.loading);
        assert!(!snapshot.result_visible);
        assert!(snapshot.controls.infer_enabled);
        assert!(!snapshot.controls.save_enabled);
        assert!(snapshot.last_error.is_some());
    }

    #[tokio::test]
    async fn test_new_image_discards_result() {
        let mut session = ready_session(MockMask::Radial);
        session.on_image_loaded(image());
        session.on_infer_requested().await.unwrap();

        session.on_image_loaded(image());
        assert!(session.current_result().is_none());
        assert!(session.controls().infer_enabled);
        assert!(!session.controls().save_enabled);
    }

    #[tokio::test]
    async fn test_save_exports_png() {
        let mut session = ready_session(MockMask::Radial);
        assert!(session.on_save_requested().is_err());

        session.on_image_loaded(image());
        session.on_infer_requested().await.unwrap();
        let exported = session.on_save_requested().unwrap();
        assert_eq!(exported.file_name, "result.png");

        let dir = tempfile::TempDir::new().unwrap();
        let path = exported.write_to_dir(dir.path()).unwrap();
        assert_eq!(path, dir.path().join("result.png"));
        assert_eq!(std::fs::read(path).unwrap(), exported.bytes);
    }
}
