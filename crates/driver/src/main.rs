//! Kubernetes tuning driver
//!
//! Reports the current resources, replicas and environment of declared
//! Deployments to an external optimizer, and applies the optimizer's
//! proposed configuration.

mod config;
mod output;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use driver_lib::{Application, Declaration, DriverMetrics, KubeOrchestrator, TuningCycle};
use output::OutputFormat;
use serde_json::json;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DRIVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Kubernetes tuning driver
#[derive(Parser)]
#[command(name = "k8s-driver")]
#[command(author, version, about = "Kubernetes tuning driver for Deployment settings", long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(long, short, default_value = "json")]
    pub format: OutputFormat,

    /// Enable verbose logging
    #[arg(long, short)]
    pub verbose: bool,

    /// Write Prometheus metrics in text format to this file on exit
    #[arg(long, env = "OPTUNE_METRICS_FILE")]
    pub metrics_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Report the current value of every declared setting
    Describe {
        /// Application id, used as the namespace unless the default namespace is configured
        app_id: Option<String>,
    },

    /// Apply the configuration read as JSON from stdin
    Adjust {
        /// Application id, used as the namespace unless the default namespace is configured
        app_id: Option<String>,

        /// Compute patches without sending them
        #[arg(long)]
        dry_run: bool,
    },

    /// Show driver information
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr, stdout carries optimizer output
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let result = run(&cli).await;
    export_metrics(cli.metrics_file.as_deref());
    result
}

async fn run(cli: &Cli) -> Result<()> {
    let (app_id, adjust) = match &cli.command {
        Commands::Info => {
            return output::print_json(&json!({
                "name": "k8s-driver",
                "version": DRIVER_VERSION,
                "has_cancel": false,
            }));
        }
        Commands::Describe { app_id } => (app_id.as_deref(), None),
        Commands::Adjust { app_id, dry_run } => (app_id.as_deref(), Some(*dry_run)),
    };

    let driver_config = config::DriverConfig::load()?;
    let executable = std::env::args().next();
    let flags = driver_config.app_flags(executable.as_deref());

    let declaration = Declaration::load(&driver_config.config_path)
        .with_context(|| format!("Failed to load {}", driver_config.config_path))?;
    let application = Application::resolve(app_id, &flags, &declaration)?;
    info!(
        namespace = %application.namespace,
        components = application.components.len(),
        config_key = %flags.config_key,
        "Driver configured"
    );

    let orchestrator = KubeOrchestrator::try_default().await?;
    let cycle = TuningCycle::new(&application, &orchestrator)
        .with_retry(driver_config.read_retry(), driver_config.write_retry());

    match adjust {
        None => {
            let report = cycle.describe().await?;
            output::print_description(&report, cli.format)?;
        }
        Some(dry_run) => {
            let input = read_input()?;
            let report = cycle.adjust(&input, dry_run).await?;
            output::print_adjustment(&report, cli.format)?;
            if !report.is_success() {
                bail!(
                    "adjustment completed with {} failure(s)",
                    report.failures.len()
                );
            }
        }
    }

    Ok(())
}

/// Read the optimizer input document from stdin
fn read_input() -> Result<serde_json::Value> {
    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .context("Failed to read adjustment input from stdin")?;
    if raw.trim().is_empty() {
        bail!("adjust expects a JSON document on stdin");
    }
    serde_json::from_str(&raw).context("Adjustment input is not valid JSON")
}

/// Metrics export never changes the exit status
fn export_metrics(path: Option<&Path>) -> bool {
    let Some(path) = path else {
        return false;
    };
    match write_metrics(path) {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %path.display(), error = %format!("{:#}", e), "Metrics export failed");
            false
        }
    }
}

fn write_metrics(path: &Path) -> Result<()> {
    std::fs::write(path, DriverMetrics::new().encode_text())
        .with_context(|| format!("Failed to write metrics to {}", path.display()))
}
