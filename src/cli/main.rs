//! `bgremove-server` command line
//!
//! `serve` runs the HTTP endpoint, `remove` processes one image, and
//! `providers` prints backend diagnostics.

use super::config::CliConfigBuilder;
use crate::{
    processor::BackgroundRemovalProcessor,
    server::{BackgroundRemovalServer, ENDPOINT},
    services::{ImageLoader, ImageSource},
    tracing_config::{TracingConfig, TracingFormat, TracingGuard},
    utils::list_all_providers,
    ServiceConfig,
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Background removal HTTP service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "bgremove-server")]
pub struct Cli {
    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log filter directives (overrides -v), e.g. "bgremove_service=trace,hyper=warn"
    #[arg(long, value_name = "FILTER", global = true)]
    pub log_filter: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = CliLogFormat::Console, global = true)]
    pub log_format: CliLogFormat,

    /// Also write logs to this file
    #[cfg(feature = "tracing-files")]
    #[arg(long, value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliLogFormat {
    Console,
    Compact,
    #[cfg(feature = "tracing-json")]
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve POST /remove-background over HTTP
    Serve(ServeArgs),
    /// Remove the background of one image (path or URL) and write a PNG
    Remove(RemoveArgs),
    /// Show backend and execution provider diagnostics
    Providers,
}

/// Model and inference options shared by all subcommands
#[derive(Args, Debug, Default)]
pub struct ModelArgs {
    /// JSON configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Path to the ONNX segmentation model
    #[arg(short, long, value_name = "PATH")]
    pub model: Option<PathBuf>,

    /// Execution provider in format backend:provider (e.g., onnx:auto, onnx:cuda, tract:cpu)
    #[arg(short, long, value_name = "SPEC")]
    pub execution_provider: Option<String>,

    /// Number of inference threads (0 = auto-detect)
    #[arg(short, long)]
    pub threads: Option<usize>,
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Socket address to listen on
    #[arg(short, long, value_name = "ADDR")]
    pub bind: Option<String>,

    /// Origin allowed to call the endpoint from a browser (CORS)
    #[arg(long, value_name = "ORIGIN")]
    pub allowed_origin: Option<String>,

    /// Maximum accepted request body in bytes
    #[arg(long, value_name = "BYTES")]
    pub max_body_bytes: Option<usize>,

    /// Stage each request's input and output in a temporary directory
    #[arg(long)]
    pub stage_to_disk: bool,

    /// Parent directory for staged requests (default: system temp directory)
    #[arg(long, value_name = "DIR")]
    pub staging_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
pub struct RemoveArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Input image path or http(s) URL
    #[arg(value_name = "INPUT")]
    pub input: String,

    /// Output PNG path [default: <input stem>_nobg.png]
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// Also write the filtered mask as a grayscale PNG
    #[arg(long, value_name = "PATH")]
    pub mask: Option<PathBuf>,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _tracing_guard = init_tracing(&cli).context("Failed to initialize tracing")?;

    match cli.command {
        Command::Serve(args) => serve(&args).await,
        Command::Remove(args) => remove(&args).await,
        Command::Providers => {
            show_provider_diagnostics();
            Ok(())
        },
    }
}

fn init_tracing(cli: &Cli) -> Result<TracingGuard> {
    let format = match cli.log_format {
        CliLogFormat::Console => TracingFormat::Console,
        CliLogFormat::Compact => TracingFormat::Compact,
        #[cfg(feature = "tracing-json")]
        CliLogFormat::Json => TracingFormat::Json,
    };
    let mut config = TracingConfig::new()
        .with_verbosity(cli.verbose)
        .with_format(format);
    if let Some(filter) = &cli.log_filter {
        config = config.with_env_filter(filter.clone());
    }
    #[cfg(feature = "tracing-files")]
    if let Some(path) = &cli.log_file {
        config = config.with_output(crate::tracing_config::TracingOutput::Both(path.clone()));
    }
    config.init()
}

/// Load the model off the async reactor; a missing model is fatal here
async fn load_processor(config: &ServiceConfig) -> Result<BackgroundRemovalProcessor> {
    let config = config.clone();
    tokio::task::spawn_blocking(move || BackgroundRemovalProcessor::initialize(&config))
        .await
        .context("Model loading task panicked")?
        .context("Failed to load segmentation model")
}

async fn serve(args: &ServeArgs) -> Result<()> {
    let config = CliConfigBuilder::from_serve_args(args).context("Invalid configuration")?;
    info!(
        model = %config.model_path.display(),
        backend = %config.backend_type,
        provider = %config.execution_provider,
        "Starting background removal service"
    );

    let processor = Arc::new(load_processor(&config).await?);
    let server = BackgroundRemovalServer::new(processor, config.server.clone())
        .context("Failed to configure HTTP endpoint")?;
    debug!("Endpoint {ENDPOINT} on {}", config.server.bind_address);
    server.run().await.context("HTTP server failed")
}

async fn remove(args: &RemoveArgs) -> Result<()> {
    let config = CliConfigBuilder::from_remove_args(args).context("Invalid configuration")?;
    let processor = Arc::new(load_processor(&config).await?);

    let loader = ImageLoader::new(Duration::from_secs(config.server.fetch_timeout_secs))?;
    let source = ImageSource::parse(&args.input);
    info!("Processing {}", source.describe());
    let raster = loader
        .load(source)
        .await
        .with_context(|| format!("Failed to load {}", args.input))?;

    let result = tokio::task::spawn_blocking(move || processor.process_raster(&raster))
        .await
        .context("Processing task panicked")?
        .context("Background removal failed")?;

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&args.input));
    result
        .save_png(&output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    if let Some(mask_path) = &args.mask {
        result
            .mask
            .save_png(mask_path)
            .with_context(|| format!("Failed to write {}", mask_path.display()))?;
    }

    info!(
        output = %output.display(),
        foreground_ratio = result.statistics.foreground_ratio,
        "{}",
        result.timings.summary()
    );
    println!("{}", output.display());
    Ok(())
}

/// `<stem>_nobg.png` next to a local input, or in the working directory for URLs
fn default_output_path(input: &str) -> PathBuf {
    match ImageSource::parse(input) {
        ImageSource::Url(url) => {
            let without_query = url.split(['?', '#']).next().unwrap_or_default();
            let after_scheme = without_query
                .split_once("://")
                .map_or(without_query, |(_, rest)| rest);
            let path = after_scheme.split_once('/').map_or("", |(_, path)| path);
            let name = Path::new(path)
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .filter(|stem| !stem.is_empty())
                .unwrap_or_else(|| "download".to_string());
            PathBuf::from(format!("{name}_nobg.png"))
        },
        _ => {
            let path = Path::new(input);
            let stem = path
                .file_stem()
                .map_or_else(|| "output".to_string(), |s| s.to_string_lossy().to_string());
            path.with_file_name(format!("{stem}_nobg.png"))
        },
    }
}

fn show_provider_diagnostics() {
    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    println!("Backend and Execution Provider Diagnostics");
    println!("System: {cpu_count} CPU cores detected\n");

    println!("Execution providers:");
    for provider in list_all_providers() {
        let status = if provider.available {
            "available"
        } else {
            "not available"
        };
        println!(
            "  {:<12} {:<14} {}",
            provider.selection.to_string(),
            status,
            provider.description
        );
    }

    println!("\nUsage examples:");
    println!("  --execution-provider onnx:auto    # Auto-select best ONNX provider (default)");
    println!("  --execution-provider onnx:cuda    # Use NVIDIA CUDA");
    println!("  --execution-provider onnx:cpu     # Force ONNX CPU execution");
    println!("  --execution-provider tract        # Pure Rust Tract backend");
}
