//! End-to-end session workflows
//!
//! These tests drive [`MattingSession`] the way a front end does, using mock
//! backends so no model file is needed.

use dis_matte::{
    backends::{MockBackend, MockBackendFactory, MockMask},
    error::MatteError,
    models::{InMemoryArtifactSource, ModelArtifact},
    postprocessing::stretch_to_u8,
    ControlState, ImageIOService, ImagePreprocessor, MatteConfig, MattingSession, ModelHandle,
    ModelLoader, UniformMaskPolicy,
};
use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    }))
}

fn session_with(mask: MockMask, config: &MatteConfig) -> MattingSession {
    let handle = ModelHandle::new(Box::new(MockBackend::ready(mask))).unwrap();
    MattingSession::with_model(config, handle)
}

fn loader(factory: MockBackendFactory) -> ModelLoader {
    ModelLoader::with_factory(MatteConfig::default(), Arc::new(factory))
}

fn artifact_source() -> InMemoryArtifactSource {
    InMemoryArtifactSource::new(ModelArtifact::new("DIS-inference.onnx", vec![0x08, 0x01]))
}

#[tokio::test]
async fn test_uniform_mask_keeps_every_pixel_by_default() {
    let mut session = session_with(MockMask::Constant(0.5), &MatteConfig::default());
    let source = gradient(500, 400);
    session.on_image_loaded(source.clone());

    let rendered = session.on_infer_requested().await.unwrap();
    assert_eq!(rendered.dimensions(), (500, 400));
    assert!(rendered.pixels().all(|p| p.0[3] == 255));

    let rgb = source.to_rgb8();
    assert!(rendered
        .pixels()
        .zip(rgb.pixels())
        .all(|(out, src)| out.0[..3] == src.0[..]));

    let result = session.current_result().unwrap();
    assert!(result.metadata.uniform_mask);
    assert_eq!(result.mask.range(), Some((255, 255)));
}

#[tokio::test]
async fn test_uniform_mask_transparent_policy() {
    let config = MatteConfig::builder()
        .uniform_mask(UniformMaskPolicy::Transparent)
        .build()
        .unwrap();
    let mut session = session_with(MockMask::Constant(0.9), &config);
    session.on_image_loaded(gradient(64, 64));

    let rendered = session.on_infer_requested().await.unwrap();
    assert!(rendered.pixels().all(|p| p.0[3] == 0));
}

#[tokio::test]
async fn test_infer_without_model_reports_model_failure() {
    let mut session = MattingSession::new(&MatteConfig::default());
    session.on_image_loaded(gradient(32, 32));

    let error = session.on_infer_requested().await.unwrap_err();
    assert!(matches!(error, MatteError::ModelNotReady(_)));
    assert!(error.is_model_failure());

    let snapshot = session.snapshot();
    assert!(!snapshot.loading);
    assert!(!snapshot.model_ready);
    assert!(!snapshot.result_visible);
    assert!(!snapshot.controls.save_enabled);
    assert!(snapshot.last_error.is_some());
}

#[tokio::test]
async fn test_failed_model_load_keeps_inference_unavailable() {
    let mut session = MattingSession::new(&MatteConfig::default());
    let loader = loader(MockBackendFactory::new(MockMask::Radial).failing_initialize());

    let loaded = session.load_model(&loader, &artifact_source()).await;
    assert!(!loaded);
    assert!(!session.indicator().is_visible());
    assert!(session.model().is_none());
    assert!(session.last_error().is_some());

    session.on_image_loaded(gradient(16, 16));
    let error = session.on_infer_requested().await.unwrap_err();
    assert!(error.is_model_failure());
}

#[tokio::test]
async fn test_load_model_then_infer() {
    let mut session = MattingSession::new(&MatteConfig::default());
    let loader = loader(MockBackendFactory::new(MockMask::Radial));

    assert!(session.load_model(&loader, &artifact_source()).await);
    assert!(session.snapshot().model_ready);
    assert_eq!(session.model().unwrap().backend_name(), "mock");

    session.on_image_loaded(gradient(120, 90));
    let rendered = session.on_infer_requested().await.unwrap();
    assert_eq!(rendered.dimensions(), (120, 90));
}

#[tokio::test]
async fn test_pipeline_failure_reenables_infer() {
    let mut session = MattingSession::new(&MatteConfig::default());
    let loader = loader(MockBackendFactory::new(MockMask::Radial).failing_inference());
    assert!(session.load_model(&loader, &artifact_source()).await);

    session.on_image_loaded(gradient(20, 20));
    let error = session.on_infer_requested().await.unwrap_err();
    assert!(error.is_inference_failure());
    assert!(!error.is_model_failure());

    let snapshot = session.snapshot();
    assert!(!snapshot.loading);
    assert!(snapshot.source_visible);
    assert_eq!(
        snapshot.controls,
        ControlState {
            infer_enabled: true,
            reset_enabled: true,
            save_enabled: false,
        }
    );
}

#[tokio::test]
async fn test_saved_png_matches_rendered_result() {
    let mut session = session_with(MockMask::Radial, &MatteConfig::default());
    session.on_image_loaded(gradient(200, 150));
    let rendered = session.on_infer_requested().await.unwrap();

    let exported = session.on_save_requested().unwrap();
    assert_eq!(exported.file_name, "result.png");

    let decoded = image::load_from_memory(&exported.bytes).unwrap().to_rgba8();
    assert_eq!(decoded, rendered);

    let dir = TempDir::new().unwrap();
    let path = exported.write_to_dir(dir.path()).unwrap();
    let reloaded = ImageIOService::load_image(&path).unwrap().to_rgba8();
    assert_eq!(reloaded, rendered);
}

#[tokio::test]
async fn test_radial_mask_spans_full_alpha_range() {
    let mut session = session_with(MockMask::Radial, &MatteConfig::default());
    session.on_image_loaded(gradient(300, 300));
    let rendered = session.on_infer_requested().await.unwrap();

    let alphas: Vec<u8> = rendered.pixels().map(|p| p.0[3]).collect();
    assert_eq!(alphas.iter().copied().min(), Some(0));
    assert_eq!(alphas.iter().copied().max(), Some(255));

    // Centre of a radial mask is the most opaque region
    let centre = rendered.get_pixel(150, 150).0[3];
    let corner = rendered.get_pixel(0, 0).0[3];
    assert!(centre > 240);
    assert!(corner < 15);
}

#[tokio::test]
async fn test_reset_is_idempotent() {
    let mut session = session_with(MockMask::Radial, &MatteConfig::default());
    session.on_image_loaded(gradient(40, 40));
    session.on_infer_requested().await.unwrap();

    session.on_reset_requested();
    let once = session.snapshot();
    session.on_reset_requested();
    let twice = session.snapshot();

    assert_eq!(once, twice);
    assert_eq!(once.controls, ControlState::default());
    assert!(!once.source_visible);
    assert!(!once.result_visible);
    assert!(session.on_save_requested().is_err());
}

#[tokio::test]
async fn test_select_file_from_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("photo.png");
    let image = RgbaImage::from_pixel(48, 36, Rgba([10, 200, 30, 90]));
    image.save(&path).unwrap();

    let mut session = session_with(MockMask::Radial, &MatteConfig::default());
    session.on_file_path_selected(&path).unwrap();
    assert!(session.controls().infer_enabled);

    let rendered = session.on_infer_requested().await.unwrap();
    // Source alpha is discarded; colour comes through unchanged
    assert_eq!(rendered.get_pixel(0, 0).0[..3], [10, 200, 30]);
}

#[tokio::test]
async fn test_indicator_hidden_after_dropped_infer() {
    let mut session = session_with(MockMask::Radial, &MatteConfig::default());
    session.on_image_loaded(gradient(64, 64));

    tokio::select! {
        biased;
        _ = session.on_infer_requested() => {},
        () = std::future::ready(()) => {},
    }

    assert!(!session.indicator().is_visible());
    assert!(session.controls().reset_enabled);
}

#[tokio::test]
async fn test_indicator_visible_while_inferring() {
    let mut session = session_with(MockMask::Radial, &MatteConfig::default());
    let mut rx = session.indicator().subscribe();
    session.on_image_loaded(gradient(32, 32));

    let watcher = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            if *rx.borrow_and_update() {
                return true;
            }
        }
        false
    });
    // Let the watcher start waiting before the indicator is raised
    tokio::task::yield_now().await;

    session.on_infer_requested().await.unwrap();

    let seen_visible = tokio::time::timeout(Duration::from_secs(10), watcher)
        .await
        .expect("indicator was never shown")
        .unwrap();
    assert!(seen_visible);
    assert!(!session.indicator().is_visible());
}

#[tokio::test]
async fn test_mask_follows_blue_channel() {
    // Red on the left, blue on the right. The first tensor channel is blue,
    // so an echoed mask must be opaque on the right only.
    let image = DynamicImage::ImageRgb8(RgbImage::from_fn(64, 64, |x, _| {
        if x < 32 {
            Rgb([255, 0, 0])
        } else {
            Rgb([0, 0, 255])
        }
    }));
    let mut session = session_with(MockMask::EchoInput, &MatteConfig::default());
    session.on_image_loaded(image);

    let rendered = session.on_infer_requested().await.unwrap();
    assert_eq!(rendered.get_pixel(3, 32).0, [255, 0, 0, 0]);
    assert_eq!(rendered.get_pixel(60, 32).0, [0, 0, 255, 255]);
}

#[tokio::test]
async fn test_debug_session_records_mask_statistics() {
    let config = MatteConfig::builder().debug(true).build().unwrap();
    let mut session = session_with(MockMask::Radial, &config);
    session.on_image_loaded(gradient(80, 60));
    session.on_infer_requested().await.unwrap();

    let stats = session
        .current_result()
        .and_then(|r| r.metadata.mask_statistics.clone())
        .unwrap();
    assert_eq!(stats.total_pixels, 80 * 60);
    assert!(stats.foreground_pixels > 0);
    assert!(stats.background_pixels > 0);
}

#[test]
fn test_preprocessing_value_range() {
    let white = DynamicImage::ImageRgb8(RgbImage::from_pixel(50, 70, Rgb([255, 255, 255])));
    let black = DynamicImage::ImageRgb8(RgbImage::from_pixel(50, 70, Rgb([0, 0, 0])));

    let white_tensor = ImagePreprocessor::preprocess(&white).unwrap();
    let black_tensor = ImagePreprocessor::preprocess(&black).unwrap();

    assert_eq!(white_tensor.dim(), (1, 3, 1024, 1024));
    assert!(white_tensor.iter().all(|&v| (v - 0.5).abs() < 1e-6));
    assert!(black_tensor.iter().all(|&v| (v + 0.5).abs() < 1e-6));

    let mixed = ImagePreprocessor::preprocess(&gradient(640, 480)).unwrap();
    assert!(mixed.iter().all(|&v| (-0.5..=0.5).contains(&v)));
}

#[test]
fn test_stretch_maps_extremes() {
    let (values, uniform) =
        stretch_to_u8(vec![-3.0, -1.0, 0.0, 5.0], UniformMaskPolicy::Opaque).unwrap();
    assert!(!uniform);
    assert_eq!(values.first(), Some(&0));
    assert_eq!(values.last(), Some(&255));
    assert!(values.windows(2).all(|w| w[0] <= w[1]));
}
