//! DIS background removal CLI
//!
//! Drives a [`MattingSession`] the same way an interactive front end would:
//! load the model once, then select, infer, save and reset per input file.

use super::config::CliConfigBuilder;
use crate::{
    config::MatteConfig,
    loader::{BackendFactory, DefaultBackendFactory, ModelLoader},
    models::{model_dir, ModelSource, ModelSpec, RemoteArtifactSource},
    services::ImageIOService,
    session::{LoadingIndicator, MattingSession},
    tracing_config::{init_cli_tracing, spans},
    types::ProcessingTimings,
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use instant::Instant;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "webp", "bmp", "tiff", "tif"];

/// Suffix appended to the input stem for default output names
const OUTPUT_SUFFIX: &str = "_dis";

/// Dichotomous image segmentation background removal
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "dis-matte")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Input image files or directories
    #[arg(value_name = "INPUT", required_unless_present_any = &["show_providers", "download_only"])]
    pub input: Vec<PathBuf>,

    /// Output file (single input) or directory (several inputs)
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// Write the grayscale mask instead of the cut-out image
    #[arg(long)]
    pub mask_only: bool,

    /// No progress output; only warnings and errors are logged
    #[arg(long)]
    pub silent: bool,

    /// Model file path or http(s) URL [default: DIS-inference.onnx]
    #[arg(short, long)]
    pub model: Option<String>,

    /// Expected SHA-256 of the model file (hex)
    #[arg(long, value_name = "HEX")]
    pub sha256: Option<String>,

    /// Execution provider in format backend:provider (e.g., onnx:auto, onnx:cuda, tract:cpu)
    #[arg(short, long)]
    pub execution_provider: Option<String>,

    /// Number of threads (0 = auto-detect optimal threading)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Alpha for masks without any contrast
    #[arg(long, value_enum)]
    pub uniform_mask: Option<CliUniformMask>,

    /// JSON configuration file; flags take precedence over its values
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Download the model from its URL and exit
    #[arg(long)]
    pub download_only: bool,

    /// Show backend and execution provider diagnostics and exit
    #[arg(long)]
    pub show_providers: bool,

    /// Process directories recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// File name pattern for directory inputs (e.g., "*.jpg")
    #[arg(long)]
    pub pattern: Option<String>,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliUniformMask {
    Opaque,
    Transparent,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let session_id = uuid::Uuid::new_v4().to_string();
    let _tracing_guard = init_cli_tracing(cli.verbose, cli.silent, &session_id)
        .context("Failed to initialize tracing")?;

    if cli.show_providers {
        show_provider_diagnostics();
        return Ok(());
    }

    CliConfigBuilder::validate_cli(&cli).context("Invalid CLI arguments")?;
    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;

    if cli.download_only {
        return download_model_only(&config, !cli.silent).await;
    }

    if cli.input.is_empty() {
        anyhow::bail!("At least one input is required");
    }

    let span = spans::session(
        &session_id,
        &config.model.source.display_name(),
        &config.backend.to_string(),
    );
    run(&cli, config).instrument(span).await
}

async fn run(cli: &Cli, config: MatteConfig) -> Result<()> {
    let files = collect_input_files(&cli.input, cli.recursive, cli.pattern.as_deref())?;
    if files.is_empty() {
        warn!("No supported image files found in the provided inputs");
        return Ok(());
    }
    info!("Found {} image file(s) to process", files.len());

    let outputs = plan_outputs(&files, cli.output.as_deref())?;

    let model = prepare_model(&config.model, !cli.silent).await?;
    let config = MatteConfig { model, ..config };

    let progress = MultiProgress::new();
    if cli.silent {
        progress.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }

    let mut session = MattingSession::new(&config);
    let spinner = IndicatorSpinner::spawn(session.indicator(), progress.clone());

    spinner.set_message("Loading model");
    let loader = ModelLoader::new(config.clone());
    let source = config.model.artifact_source(!cli.silent);
    if !session.load_model(&loader, source.as_ref()).await {
        anyhow::bail!(
            "Failed to load model from {}: {}",
            source.describe(),
            session.last_error().unwrap_or("unknown error")
        );
    }

    let batch_bar = (files.len() > 1).then(|| {
        let pb = progress.add(ProgressBar::new(files.len() as u64));
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb
    });

    let batch_start = Instant::now();
    let mut processed_count = 0_usize;
    let mut failed_count = 0_usize;

    async {
        for (input, output) in files.iter().zip(&outputs) {
            spinner.set_message(format!("Matting {}", input.display()));
            if let Some(pb) = &batch_bar {
                pb.set_message(display_name(input));
            }

            let outcome = process_single_file(&mut session, input, output, cli.mask_only)
                .instrument(spans::file_processing(input))
                .await;

            match outcome {
                Ok(timings) => {
                    processed_count += 1;
                    info!(
                        "{} -> {} ({}ms, inference {}ms)",
                        input.display(),
                        output.display(),
                        timings.total_ms,
                        timings.inference_ms
                    );
                },
                Err(e) => {
                    failed_count += 1;
                    error!("Failed to process {}: {e:#}", input.display());
                },
            }

            if let Some(pb) = &batch_bar {
                pb.inc(1);
            }
        }
    }
    .instrument(spans::batch_processing(files.len()))
    .await;

    if let Some(pb) = batch_bar {
        pb.finish_with_message(format!(
            "Completed! Processed: {processed_count}, Failed: {failed_count}"
        ));
    }
    drop(spinner);

    let elapsed = batch_start.elapsed();
    if files.len() > 1 {
        info!("Batch processing summary:");
        info!("  ├─ Files processed: {processed_count}");
        info!("  ├─ Files failed: {failed_count}");
        info!("  └─ Total time: {:.2}s", elapsed.as_secs_f64());
    }

    if failed_count > 0 {
        anyhow::bail!("{failed_count} of {} file(s) failed to process", files.len());
    }
    Ok(())
}

/// Select, infer, save and reset for one file
async fn process_single_file(
    session: &mut MattingSession,
    input: &Path,
    output: &Path,
    mask_only: bool,
) -> Result<ProcessingTimings> {
    session
        .on_file_path_selected(input)
        .with_context(|| format!("Failed to load {}", input.display()))?;

    let outcome = save_current(session, input, output, mask_only).await;
    session.on_reset_requested();
    outcome
}

async fn save_current(
    session: &mut MattingSession,
    input: &Path,
    output: &Path,
    mask_only: bool,
) -> Result<ProcessingTimings> {
    session
        .on_infer_requested()
        .await
        .with_context(|| format!("Failed to matte {}", input.display()))?;

    let result = session
        .current_result()
        .context("Inference finished without a result")?;
    debug!("{}", result.timing_summary());
    let timings = result.timings().clone();

    if mask_only {
        result
            .mask
            .save_png(output)
            .with_context(|| format!("Failed to save mask to {}", output.display()))?;
    } else {
        let exported = session.on_save_requested().context("Failed to encode result")?;
        ImageIOService::write_bytes(&exported.bytes, output)
            .with_context(|| format!("Failed to save result to {}", output.display()))?;
    }

    Ok(timings)
}

/// Fetch a remote model ahead of loading so the download bar does not
/// compete with the loading spinner
async fn prepare_model(spec: &ModelSpec, show_progress: bool) -> Result<ModelSpec> {
    match &spec.source {
        ModelSource::Url(url) => {
            let path = RemoteArtifactSource::new(url.clone(), model_dir())
                .with_sha256(spec.sha256.clone())
                .with_progress(show_progress)
                .ensure_local()
                .await
                .with_context(|| format!("Failed to download model from {url}"))?;
            Ok(ModelSpec {
                source: ModelSource::External(path),
                sha256: spec.sha256.clone(),
            })
        },
        ModelSource::External(_) => Ok(spec.clone()),
    }
}

async fn download_model_only(config: &MatteConfig, show_progress: bool) -> Result<()> {
    if !matches!(config.model.source, ModelSource::Url(_)) {
        anyhow::bail!("--download-only requires --model to be an http(s) URL");
    }

    let spec = prepare_model(&config.model, show_progress).await?;
    if let ModelSource::External(path) = &spec.source {
        println!("Model available at {}", path.display());
    }
    Ok(())
}

fn show_provider_diagnostics() {
    println!("Backend and Execution Provider Diagnostics");
    println!("------------------------------------------");

    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(1);
    println!("System: {cpu_count} CPU cores detected");
    println!("Model directory: {}", model_dir().display());

    println!("\nAvailable Backends:");
    for backend in DefaultBackendFactory.available_backends() {
        println!("  • {backend}");
    }

    #[cfg(feature = "onnx")]
    {
        println!("\nONNX Runtime Execution Providers:");
        for (name, available, description) in crate::backends::OnnxBackend::list_providers() {
            let status = if available { "Available" } else { "Not Available" };
            println!("  • {name}: {status} - {description}");
        }
    }

    #[cfg(feature = "tract")]
    {
        println!("\nTract Execution Providers:");
        for (name, available, description) in crate::backends::TractBackend::list_providers() {
            let status = if available { "Available" } else { "Not Available" };
            println!("  • {name}: {status} - {description}");
        }
    }

    println!("\nUsage Examples:");
    println!("  --execution-provider onnx:auto    # Auto-select best ONNX provider (default)");
    println!("  --execution-provider onnx:coreml  # Use Apple CoreML (macOS)");
    println!("  --execution-provider onnx:cuda    # Use NVIDIA CUDA");
    println!("  --execution-provider tract:cpu    # Use pure Rust Tract backend");
}

/// Spinner shown while the session's loading indicator is visible
struct IndicatorSpinner {
    message: Arc<Mutex<String>>,
    task: JoinHandle<()>,
}

impl IndicatorSpinner {
    fn spawn(indicator: &LoadingIndicator, progress: MultiProgress) -> Self {
        let message = Arc::new(Mutex::new(String::new()));
        let shared = Arc::clone(&message);
        let mut rx = indicator.subscribe();

        let task = tokio::spawn(async move {
            let mut spinner: Option<ProgressBar> = None;
            loop {
                let visible = *rx.borrow_and_update();
                if visible && spinner.is_none() {
                    let pb = progress.add(ProgressBar::new_spinner());
                    pb.set_style(
                        ProgressStyle::default_spinner()
                            .template("{spinner:.green} {msg} [{elapsed}]")
                            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                    );
                    pb.set_message(shared.lock().map(|m| m.clone()).unwrap_or_default());
                    pb.enable_steady_tick(Duration::from_millis(100));
                    spinner = Some(pb);
                } else if !visible {
                    if let Some(pb) = spinner.take() {
                        pb.finish_and_clear();
                    }
                }

                if rx.changed().await.is_err() {
                    break;
                }
            }
            if let Some(pb) = spinner {
                pb.finish_and_clear();
            }
        });

        Self { message, task }
    }

    fn set_message<S: Into<String>>(&self, message: S) {
        if let Ok(mut current) = self.message.lock() {
            *current = message.into();
        }
    }
}

impl Drop for IndicatorSpinner {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Expand files and directories into a sorted, de-duplicated file list
fn collect_input_files(
    inputs: &[PathBuf],
    recursive: bool,
    pattern: Option<&str>,
) -> Result<Vec<PathBuf>> {
    let mut all_files = Vec::new();

    for path in inputs {
        if path.is_file() {
            if is_image_file(path) {
                all_files.push(path.clone());
            } else {
                warn!("Skipping unsupported file: {}", path.display());
            }
        } else if path.is_dir() {
            all_files.extend(find_image_files(path, recursive, pattern)?);
        } else {
            anyhow::bail!(
                "Input path does not exist or is not accessible: {}",
                path.display()
            );
        }
    }

    all_files.sort();
    all_files.dedup();
    Ok(all_files)
}

fn find_image_files(dir: &Path, recursive: bool, pattern: Option<&str>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if recursive {
        for entry in walkdir::WalkDir::new(dir) {
            let entry = entry?;
            if entry.file_type().is_file() {
                let path = entry.path();
                if is_image_file(path) && matches_pattern(path, pattern) && !is_own_output(path) {
                    files.push(path.to_path_buf());
                }
            }
        }
    } else {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                let path = entry.path();
                if is_image_file(&path) && matches_pattern(&path, pattern) && !is_own_output(&path)
                {
                    files.push(path);
                }
            }
        }
    }

    Ok(files)
}

/// Check if file is an image based on extension
fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// Results written next to their inputs are not picked up again on re-runs
fn is_own_output(path: &Path) -> bool {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| stem.ends_with(OUTPUT_SUFFIX))
}

/// Check if file matches the given pattern
fn matches_pattern(path: &Path, pattern: Option<&str>) -> bool {
    match pattern {
        Some(pat) => path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|filename| {
                glob::Pattern::new(pat)
                    .map(|p| p.matches(filename))
                    .unwrap_or(false)
            }),
        None => true,
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

fn output_file_name(input_path: &Path) -> String {
    let stem = input_path.file_stem().unwrap_or_default();
    format!("{}{OUTPUT_SUFFIX}.png", stem.to_string_lossy())
}

/// `<stem>_dis.png` next to the input
fn generate_output_path(input_path: &Path) -> PathBuf {
    let dir = input_path.parent().unwrap_or(Path::new("."));
    dir.join(output_file_name(input_path))
}

fn generate_output_path_with_dir(input_path: &Path, output_dir: &Path) -> PathBuf {
    output_dir.join(output_file_name(input_path))
}

/// Decide the output path of every input
///
/// A single input writes to `-o` as a file unless it names an existing
/// directory. Several inputs treat `-o` as a directory and create it.
/// Inputs sharing a stem keep their extension in the output name
/// (`cat.png_dis.png`); targets that still clash are an error.
fn plan_outputs(files: &[PathBuf], output: Option<&Path>) -> Result<Vec<PathBuf>> {
    let dir = match output {
        Some(target) if files.len() == 1 && !target.is_dir() => {
            return Ok(vec![target.to_path_buf()]);
        },
        Some(dir) => {
            if dir.is_file() {
                anyhow::bail!(
                    "Output path exists and is a file, not a directory: {}",
                    dir.display()
                );
            }
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
            Some(dir)
        },
        None => None,
    };

    let target_for = |input: &Path, keep_extension: bool| {
        if keep_extension {
            let file_name = input.file_name().unwrap_or_default();
            let name = format!("{}{OUTPUT_SUFFIX}.png", file_name.to_string_lossy());
            dir.unwrap_or_else(|| input.parent().unwrap_or(Path::new("."))).join(name)
        } else {
            match dir {
                Some(dir) => generate_output_path_with_dir(input, dir),
                None => generate_output_path(input),
            }
        }
    };

    let mut outputs: Vec<PathBuf> = files.iter().map(|f| target_for(f, false)).collect();
    let shared_stems: Vec<usize> = group_by_target(&outputs)
        .into_values()
        .filter(|indices| indices.len() > 1)
        .flatten()
        .collect();
    for i in shared_stems {
        outputs[i] = target_for(&files[i], true);
    }

    if let Some(indices) = group_by_target(&outputs)
        .into_values()
        .find(|indices| indices.len() > 1)
    {
        let inputs: Vec<String> = indices
            .iter()
            .map(|&i| files[i].display().to_string())
            .collect();
        anyhow::bail!(
            "Inputs would overwrite the same output {}: {}",
            outputs[indices[0]].display(),
            inputs.join(", ")
        );
    }

    Ok(outputs)
}

fn group_by_target(outputs: &[PathBuf]) -> HashMap<&Path, Vec<usize>> {
    let mut groups: HashMap<&Path, Vec<usize>> = HashMap::new();
    for (i, path) in outputs.iter().enumerate() {
        groups.entry(path.as_path()).or_default().push(i);
    }
    groups
}
