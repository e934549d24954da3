//! Tracing subscriber setup for the binary
//!
//! Library code only emits events; the binary decides where they go. `log`
//! records from dependencies are bridged into the same subscriber.

use tracing_subscriber::{
    layer::{Layered, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

type FilteredRegistry = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

/// Directives appended to every verbosity-derived filter
const QUIET_DEPENDENCIES: &str = "ort=warn,tract_onnx=warn,tract_core=warn,hyper=info";

/// Configuration for tracing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TracingFormat {
    /// Human-readable console output with colors
    #[default]
    Console,
    /// Compact output without ANSI colors, for CI and containers
    Compact,
    /// JSON structured logging
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Configuration for tracing output destination
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TracingOutput {
    /// Output to stderr
    #[default]
    Console,
    /// Output to a file (never rotated)
    #[cfg(feature = "tracing-files")]
    File(std::path::PathBuf),
    /// Output to stderr and a daily rotated file
    #[cfg(feature = "tracing-files")]
    Both(std::path::PathBuf),
}

/// Keeps background log writers alive; drop it last, on shutdown
#[derive(Debug, Default)]
#[must_use = "dropping the guard stops file logging"]
pub struct TracingGuard {
    #[cfg(feature = "tracing-files")]
    _file_writer: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Tracing configuration builder
#[derive(Debug, Default)]
pub struct TracingConfig {
    /// Verbosity level (0 = info, 1 = debug, 2+ = trace)
    pub verbosity: u8,
    pub format: TracingFormat,
    pub output: TracingOutput,
    /// Filter directive string; overrides verbosity when set
    pub env_filter: Option<String>,
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
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

    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Map verbosity to a level directive
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Full filter directive string this configuration resolves to
    #[must_use]
    pub fn filter_directives(&self) -> String {
        self.env_filter.clone().unwrap_or_else(|| {
            format!("{},{QUIET_DEPENDENCIES}", self.verbosity_to_filter())
        })
    }

    /// Install the global subscriber
    ///
    /// # Errors
    /// - Invalid filter directives
    /// - A global subscriber is already installed
    pub fn init(self) -> anyhow::Result<TracingGuard> {
        let filter = EnvFilter::try_new(self.filter_directives())?;
        #[allow(unused_mut)]
        let mut guard = TracingGuard::default();

        let layers: Vec<BoxedLayer> = match &self.output {
            TracingOutput::Console => vec![console_layer(self.format)],
            #[cfg(feature = "tracing-files")]
            TracingOutput::File(path) => {
                let appender = tracing_appender::rolling::never(log_dir(path), log_file(path));
                let (writer, worker) = tracing_appender::non_blocking(appender);
                guard._file_writer = Some(worker);
                vec![file_layer(self.format, writer)]
            },
            #[cfg(feature = "tracing-files")]
            TracingOutput::Both(path) => {
                let appender = tracing_appender::rolling::daily(log_dir(path), log_file(path));
                let (writer, worker) = tracing_appender::non_blocking(appender);
                guard._file_writer = Some(worker);
                vec![console_layer(self.format), file_layer(self.format, writer)]
            },
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(layers)
            .try_init()?;
        Ok(guard)
    }
}

fn console_layer(format: TracingFormat) -> BoxedLayer {
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);
    match format {
        TracingFormat::Console => layer.with_ansi(true).compact().boxed(),
        TracingFormat::Compact => layer.with_ansi(false).compact().boxed(),
        #[cfg(feature = "tracing-json")]
        TracingFormat::Json => layer
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
    }
}

#[cfg(feature = "tracing-files")]
fn file_layer(
    format: TracingFormat,
    writer: tracing_appender::non_blocking::NonBlocking,
) -> BoxedLayer {
    let layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer);
    match format {
        TracingFormat::Console | TracingFormat::Compact => layer.compact().boxed(),
        #[cfg(feature = "tracing-json")]
        TracingFormat::Json => layer
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
    }
}

#[cfg(feature = "tracing-files")]
fn log_dir(path: &std::path::Path) -> &std::path::Path {
    path.parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."))
}

#[cfg(feature = "tracing-files")]
fn log_file(path: &std::path::Path) -> &std::ffi::OsStr {
    path.file_name()
        .unwrap_or_else(|| std::ffi::OsStr::new("bgremove-server.log"))
}
