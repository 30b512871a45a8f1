//! Tracing configuration for the command-line front end
//!
//! The library only emits events; binaries install the subscriber. `log`
//! records from the backends are bridged into the same subscriber.

use tracing_subscriber::{
    layer::{Layered, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Configuration for tracing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable console output with colors (default for CLI)
    Console,
    /// Compact console output without colors for CI environments
    Compact,
    /// JSON structured logging
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Configuration for tracing output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TracingOutput {
    /// Output to stderr (default)
    Console,
    /// Output to a file
    #[cfg(feature = "tracing-files")]
    File(std::path::PathBuf),
    /// Output to both console and file
    #[cfg(feature = "tracing-files")]
    Both(std::path::PathBuf),
}

/// Keeps background log writers alive; drop it only at program exit
#[derive(Debug, Default)]
pub struct TracingGuard {
    #[cfg(feature = "tracing-files")]
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Tracing configuration builder
#[derive(Debug)]
pub struct TracingConfig {
    /// Verbosity level (maps to log levels)
    pub verbosity: u8,
    /// Only warnings and errors
    pub quiet: bool,
    /// Output format
    pub format: TracingFormat,
    /// Output destination
    pub output: TracingOutput,
    /// Environment filter string (overrides verbosity if set)
    pub env_filter: Option<String>,
    /// Session ID for correlation
    pub session_id: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            quiet: false,
            format: TracingFormat::Console,
            output: TracingOutput::Console,
            env_filter: None,
            session_id: None,
        }
    }
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set verbosity level (0-2+)
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Suppress everything below warnings regardless of verbosity
    #[must_use]
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: TracingOutput) -> Self {
        self.output = output;
        self
    }

    /// Set custom environment filter
    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Set session ID for correlation
    #[must_use]
    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Filter directive for the configured verbosity
    ///
    /// ONNX Runtime is chatty at info level, so it is held one level back.
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbosity {
            0 => "info,ort=warn",
            1 => "debug,ort=info",
            _ => "trace",
        }
    }

    /// Install the global subscriber
    ///
    /// # Errors
    /// - Invalid filter directive
    /// - A global subscriber is already installed
    pub fn init(self) -> anyhow::Result<TracingGuard> {
        use tracing_subscriber::fmt;

        type Filtered = Layered<EnvFilter, Registry>;
        type BoxedLayer = Box<dyn Layer<Filtered> + Send + Sync>;

        let filter = match &self.env_filter {
            Some(directives) => EnvFilter::try_new(directives)?,
            None => EnvFilter::try_new(self.verbosity_to_filter())?,
        };

        let console_layer = |format: TracingFormat| -> BoxedLayer {
            match format {
                TracingFormat::Console => fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(false)
                    .compact()
                    .boxed(),
                TracingFormat::Compact => fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false)
                    .with_target(false)
                    .compact()
                    .boxed(),
                #[cfg(feature = "tracing-json")]
                TracingFormat::Json => fmt::layer()
                    .with_writer(std::io::stderr)
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .boxed(),
            }
        };

        let mut layers: Vec<BoxedLayer> = Vec::new();
        #[allow(unused_mut)]
        let mut guard = TracingGuard::default();

        match &self.output {
            TracingOutput::Console => layers.push(console_layer(self.format)),
            #[cfg(feature = "tracing-files")]
            TracingOutput::File(path) => {
                let (layer, file_guard) = file_layer(path, self.format);
                layers.push(layer);
                guard._file_guard = Some(file_guard);
            },
            #[cfg(feature = "tracing-files")]
            TracingOutput::Both(path) => {
                layers.push(console_layer(self.format));
                let (layer, file_guard) = file_layer(path, self.format);
                layers.push(layer);
                guard._file_guard = Some(file_guard);
            },
        }

        Registry::default().with(filter).with(layers).try_init()?;

        if let Some(session_id) = &self.session_id {
            tracing::debug!(session_id = %session_id, "Matting session started");
        }

        Ok(guard)
    }
}

#[cfg(feature = "tracing-files")]
fn file_layer(
    path: &std::path::Path,
    format: TracingFormat,
) -> (
    Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync>,
    tracing_appender::non_blocking::WorkerGuard,
) {
    use tracing_appender::{non_blocking, rolling};
    use tracing_subscriber::fmt;

    let file_appender = rolling::never(
        path.parent().unwrap_or_else(|| std::path::Path::new(".")),
        path.file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("dis-matte.log")),
    );
    let (writer, guard) = non_blocking(file_appender);

    let layer = match format {
        TracingFormat::Console | TracingFormat::Compact => fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
            .compact()
            .boxed(),
        #[cfg(feature = "tracing-json")]
        TracingFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
    };

    (layer, guard)
}

/// Initialize tracing with CLI-friendly defaults
///
/// `DIS_MATTE_LOG` overrides the verbosity-derived filter.
///
/// # Errors
/// - Invalid `DIS_MATTE_LOG` directive
/// - A global subscriber is already installed
pub fn init_cli_tracing(verbosity: u8, quiet: bool, session_id: &str) -> anyhow::Result<TracingGuard> {
    let mut config = TracingConfig::new()
        .with_verbosity(verbosity)
        .with_quiet(quiet)
        .with_format(TracingFormat::Console)
        .with_session_id(session_id);

    if let Ok(filter) = std::env::var(LOG_ENV) {
        config = config.with_env_filter(filter);
    }

    config.init()
}

/// Environment variable holding a filter directive for the CLI
pub const LOG_ENV: &str = "DIS_MATTE_LOG";

/// Span creation helpers for common operations
pub mod spans {
    use tracing::{Level, Span};

    /// Span for one CLI invocation
    #[must_use]
    pub fn session(session_id: &str, model: &str, backend: &str) -> Span {
        tracing::span!(
            Level::INFO,
            "session",
            session_id = %session_id,
            model = %model,
            backend = %backend
        )
    }

    /// Span for one input file
    #[must_use]
    pub fn file_processing(file_path: &std::path::Path) -> Span {
        tracing::span!(
            Level::INFO,
            "file_processing",
            file_path = %file_path.display()
        )
    }

    /// Span covering a whole batch
    #[must_use]
    pub fn batch_processing(file_count: usize) -> Span {
        tracing::span!(Level::INFO, "batch_processing", file_count = file_count)
    }
}
