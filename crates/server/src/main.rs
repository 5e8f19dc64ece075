mod metrics;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use transmute_core::{
    format::format_of, load_config, validate_config, Category, Config, ConversionOrchestrator,
    ConversionRequest, RetentionSweeper, ToolAvailability,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Config file used when neither `--config` nor `TRANSMUTE_CONFIG` is set.
const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// How often `serve` refreshes the metrics file.
const METRICS_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Parser)]
#[command(name = "transmute", version, about = "File format conversion service")]
struct Cli {
    /// Configuration file (TOML). Falls back to defaults when absent.
    #[arg(long, global = true, env = "TRANSMUTE_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the supported formats of every category as JSON.
    Formats,

    /// Store a file as an upload, convert it and print the output path and URL.
    Convert {
        /// File to convert.
        file: PathBuf,

        /// Conversion category (text, document, image, audio, video, compressed).
        #[arg(long, short)]
        category: String,

        /// Target format.
        #[arg(long, short)]
        to: String,

        /// Owner of the upload; outputs are partitioned per user.
        #[arg(long)]
        user: Option<String>,

        /// Name the output is derived from instead of the file's own name.
        #[arg(long)]
        name: Option<String>,
    },

    /// Run one retention pass over every storage root.
    Sweep {
        /// Override the configured maximum age.
        #[arg(long)]
        max_age_hours: Option<u64>,
    },

    /// Run the retention sweeper until interrupted.
    Serve {
        /// Write Prometheus metrics to this file periodically.
        #[arg(long)]
        metrics_file: Option<PathBuf>,
    },

    /// Report which external conversion tools are installed.
    Doctor,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    if let Err(e) = run(cli).await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());

    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(cli.config.as_deref())?;

    match cli.command {
        Command::Formats => formats(&config),
        Command::Convert {
            file,
            category,
            to,
            user,
            name,
        } => convert(&config, &file, &category, &to, user, name).await,
        Command::Sweep { max_age_hours } => sweep(&config, max_age_hours).await,
        Command::Serve { metrics_file } => serve(&config, metrics_file).await,
        Command::Doctor => doctor(&config).await,
    }
}

fn resolve_config(explicit: Option<&Path>) -> Result<Config> {
    let config = match explicit {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            load_config(path).with_context(|| format!("Failed to load config from {:?}", path))?
        }
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            let path = Path::new(DEFAULT_CONFIG_PATH);
            info!("Loading configuration from {:?}", path);
            load_config(path).with_context(|| format!("Failed to load config from {:?}", path))?
        }
        None => {
            info!("No configuration file found, using defaults");
            Config::default()
        }
    };

    validate_config(&config).context("Configuration validation failed")?;
    Ok(config)
}

fn formats(config: &Config) -> Result<()> {
    let orchestrator = ConversionOrchestrator::from_config(config);
    let table = serde_json::to_string_pretty(&orchestrator.supported_formats())
        .context("Failed to serialize format table")?;
    println!("{}", table);
    Ok(())
}

async fn convert(
    config: &Config,
    file: &Path,
    category: &str,
    to: &str,
    user: Option<String>,
    name: Option<String>,
) -> Result<()> {
    let category: Category = category.parse()?;
    let orchestrator = ConversionOrchestrator::from_config(config);

    let stored = orchestrator
        .storage()
        .store_upload(file, category, user.as_deref())
        .await
        .with_context(|| format!("Failed to store upload {:?}", file))?;
    info!(
        path = %stored.physical_path.display(),
        deduplicated = stored.deduplicated,
        "Upload stored"
    );

    let mut request = ConversionRequest::new(&stored.physical_path, category.as_str(), to)
        .with_output_name(name.unwrap_or_else(|| display_name(file)));
    if let Some(format) = format_of(file) {
        request = request.with_source_format(format);
    }
    if let Some(user) = user {
        request = request.with_user(user);
    }

    let outcome = orchestrator.convert(&request).await?;
    let output = outcome
        .path()
        .context("Conversion reported success without an output")?;

    info!(
        cache_hit = outcome.cache_hit,
        duration_ms = outcome.duration_ms,
        "Conversion finished"
    );
    println!("{}", output.display());
    println!("{}", orchestrator.url_for(output));
    Ok(())
}

fn display_name(file: &Path) -> String {
    file.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string())
}

async fn sweep(config: &Config, max_age_hours: Option<u64>) -> Result<()> {
    let mut retention = config.retention.clone();
    if let Some(hours) = max_age_hours {
        retention = retention.with_max_age_hours(hours);
    }

    let orchestrator = ConversionOrchestrator::from_config(config);
    let sweeper = RetentionSweeper::new(retention, orchestrator.storage().roots());
    let report = sweeper.sweep_once().await;

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize sweep report")?
    );
    Ok(())
}

async fn serve(config: &Config, metrics_file: Option<PathBuf>) -> Result<()> {
    info!(version = VERSION, "Starting transmute");

    let orchestrator = Arc::new(ConversionOrchestrator::from_config(config));
    let sweeper = RetentionSweeper::new(config.retention.clone(), orchestrator.storage().roots());

    let sweeper_handle = if config.retention.enabled {
        sweeper.start()
    } else {
        info!("Retention sweeper disabled in config");
        None
    };

    let mut ticker = tokio::time::interval(METRICS_INTERVAL);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                if let Some(path) = &metrics_file {
                    if let Err(e) = write_metrics(&orchestrator, path).await {
                        warn!(path = %path.display(), error = %e, "Failed to write metrics");
                    }
                }
            }
        }
    }

    info!("Shutting down...");
    orchestrator.shutdown();
    sweeper.stop();
    if let Some(handle) = sweeper_handle {
        let _ = handle.await;
        info!("Retention sweeper stopped");
    }
    if let Some(path) = &metrics_file {
        write_metrics(&orchestrator, path).await?;
    }

    Ok(())
}

/// Replaces the metrics file atomically so scrapers never read a partial file.
async fn write_metrics(orchestrator: &ConversionOrchestrator, path: &Path) -> Result<()> {
    metrics::collect_dynamic_metrics(orchestrator).await;

    let staging = path.with_extension("tmp");
    tokio::fs::write(&staging, metrics::encode_metrics())
        .await
        .with_context(|| format!("Failed to write {:?}", staging))?;
    tokio::fs::rename(&staging, path)
        .await
        .with_context(|| format!("Failed to replace {:?}", path))?;
    Ok(())
}

async fn doctor(config: &Config) -> Result<()> {
    let availability = ToolAvailability::detect(&config.tools).await;
    for tool in availability.missing() {
        warn!(tool = tool.name(), "Conversion tool not found");
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&availability).context("Failed to serialize tool report")?
    );
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
