//! custody-batch - custody-transfer batch engine service
//!
//! # Usage
//!
//! ```bash
//! # Serve the API with sled persistence and the configured telemetry endpoint
//! custody-batch --config batch_config.toml
//!
//! # Serve against simulated tank telemetry
//! custody-batch --simulate
//!
//! # One-off volume calculation
//! custody-batch calc --level 8500 --temperature 28 --api 32.5 --bsw 0.4 --diameter 30
//!
//! # Validate a config file
//! custody-batch check-config --config batch_config.toml
//! ```
//!
//! # Environment Variables
//!
//! - `CUSTODY_BATCH_CONFIG`: Path to the TOML configuration
//! - `CUSTODY_BATCH_CORS_ORIGINS`: Comma-separated allowed origins
//! - `RUST_LOG`: Logging level (default: info)
//! - `RESET_DB`: Set to "true" to wipe the data directory on startup

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use custody_batch::api::{create_app, ApiState};
use custody_batch::calculator;
use custody_batch::config::{self, EngineConfig};
use custody_batch::storage::{open_database, SledAuditTrail, SledRecordStore};
use custody_batch::telemetry::{
    ConfigTankDirectory, HttpTelemetrySource, InMemoryTelemetry, SimulatedTelemetry,
    TelemetrySource,
};
use custody_batch::types::GaugeInputs;
use custody_batch::BatchEngine;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "custody-batch")]
#[command(about = "Custody-transfer batch engine for bulk liquid storage tanks")]
#[command(version)]
struct CliArgs {
    /// Path to the TOML configuration (overrides CUSTODY_BATCH_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the server address (default from config: "0.0.0.0:8080")
    #[arg(short, long)]
    addr: Option<String>,

    /// Override the sled data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Use simulated tank telemetry instead of the HTTP endpoint
    #[arg(long)]
    simulate: bool,

    /// Seed for simulated telemetry
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Wipe the data directory on startup.
    /// Can also be set via RESET_DB=true environment variable.
    #[arg(long)]
    reset_db: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Compute derived volumes for one gauge and print them as JSON
    Calc {
        /// Product level (mm)
        #[arg(long)]
        level: f64,
        /// Average product temperature (°C)
        #[arg(long)]
        temperature: f64,
        /// API gravity (°API)
        #[arg(long)]
        api: f64,
        /// BS&W (%)
        #[arg(long, default_value = "0")]
        bsw: f64,
        /// Tank inner diameter (m)
        #[arg(long)]
        diameter: f64,
    },

    /// Parse and validate the configuration, then print it as TOML
    CheckConfig,
}

// ============================================================================
// Startup helpers
// ============================================================================

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(p) => EngineConfig::load_from_file(p)
            .with_context(|| format!("Failed to load config from {}", p.display())),
        None => Ok(EngineConfig::load()),
    }
}

/// Check if database reset is requested via CLI flag or environment variable.
fn should_reset_db(cli_flag: bool) -> bool {
    if cli_flag {
        return true;
    }
    std::env::var("RESET_DB")
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

fn reset_data_directory(data_dir: &Path) -> Result<()> {
    if !data_dir.exists() {
        info!(path = %data_dir.display(), "Data directory does not exist, nothing to reset");
        return Ok(());
    }
    warn!(path = %data_dir.display(), "RESET_DB requested, wiping all batch records and audit history");
    std::fs::remove_dir_all(data_dir).context("Failed to remove data directory")?;
    Ok(())
}

fn build_telemetry(args: &CliArgs, config: &EngineConfig) -> Result<Arc<dyn TelemetrySource>> {
    if args.simulate {
        info!(tanks = config.tanks.len(), seed = args.seed, "Telemetry: simulated");
        return Ok(Arc::new(SimulatedTelemetry::new(
            &config.tanks,
            &config.telemetry,
            args.seed,
        )));
    }
    if config.telemetry.base_url.is_empty() {
        warn!("Telemetry: no base_url configured, live and historical capture will report missing data");
        return Ok(Arc::new(InMemoryTelemetry::new()));
    }
    info!(url = %config.telemetry.base_url, "Telemetry: HTTP time-series API");
    let source = HttpTelemetrySource::new(
        &config.telemetry.base_url,
        &config.telemetry.token,
        Duration::from_secs(config.telemetry.request_timeout_secs),
    )
    .context("Failed to build telemetry HTTP client")?;
    Ok(Arc::new(source))
}

fn run_calc(config: &EngineConfig, inputs: GaugeInputs, diameter: f64) -> Result<()> {
    let issues = calculator::validate(&inputs, &config.validation);
    if !issues.is_empty() {
        for issue in &issues {
            eprintln!("invalid input: {issue}");
        }
        anyhow::bail!("{} invalid input(s)", issues.len());
    }
    let tov = calculator::cylinder_volume(diameter, inputs.level);
    let volumes = calculator::derive_volumes(
        tov,
        inputs.temperature,
        inputs.api_gravity,
        inputs.bsw.unwrap_or(0.0),
        &config.calculation,
    );
    println!("{}", serde_json::to_string_pretty(&volumes)?);
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_json);

    let engine_config = load_config(args.config.as_deref())?;

    match args.command {
        Some(SubCommand::Calc {
            level,
            temperature,
            api,
            bsw,
            diameter,
        }) => {
            let inputs = GaugeInputs {
                level,
                temperature,
                api_gravity: api,
                bsw: Some(bsw),
            };
            return run_calc(&engine_config, inputs, diameter);
        }
        Some(SubCommand::CheckConfig) => {
            engine_config.validate().context("Configuration is invalid")?;
            println!("{}", engine_config.to_toml()?);
            return Ok(());
        }
        None => {}
    }

    let data_dir = args
        .data_dir
        .clone()
        .unwrap_or_else(|| engine_config.storage.data_dir.clone());
    if should_reset_db(args.reset_db) {
        reset_data_directory(&data_dir)?;
    }

    let server_addr = args
        .addr
        .clone()
        .unwrap_or_else(|| engine_config.server.addr.clone());
    config::init(engine_config.clone());

    let db = open_database(&data_dir)
        .with_context(|| format!("Failed to open database in {}", data_dir.display()))?;
    let store = Arc::new(SledRecordStore::new(&db).context("Failed to open record store")?);
    let audit = Arc::new(SledAuditTrail::new(&db).context("Failed to open audit trail")?);
    let telemetry = build_telemetry(&args, &engine_config)?;
    let tanks = Arc::new(ConfigTankDirectory::new(&engine_config.tanks));

    let engine = Arc::new(BatchEngine::new(
        &engine_config,
        store,
        audit,
        telemetry,
        tanks,
    ));
    let app = create_app(ApiState::new(Arc::clone(&engine)));

    let listener = tokio::net::TcpListener::bind(&server_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", server_addr))?;
    info!(addr = %server_addr, data_dir = %data_dir.display(), "HTTP server listening");

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown");
        shutdown_token.cancel();
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancel_token.cancelled().await;
        })
        .await
        .context("HTTP server error")?;

    engine.shutdown();
    db.flush_async().await.context("Failed to flush database")?;
    info!("custody-batch shutdown complete");
    Ok(())
}
