use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ncm_converter::catalog::{EntryStatus, FileCatalog};
use ncm_converter::config;
use ncm_converter::engine::{EngineClient, ProcessEngine};
use ncm_converter::orchestrator::ConversionOrchestrator;
use ncm_converter::scanner::{DirectoryScanner, ExtensionFilter};
use ncm_converter::staging::StagingManager;

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Directory to scan for encrypted audio files. Repeatable.
    #[clap(long = "scan-root")]
    pub scan_roots: Vec<PathBuf>,

    /// Directory converted files are written to.
    #[clap(long)]
    pub output_dir: Option<PathBuf>,

    /// Directory used for staged temporary copies. Defaults to a directory
    /// under the system temp dir.
    #[clap(long)]
    pub staging_dir: Option<PathBuf>,

    /// Recognized input file extension.
    #[clap(long, default_value = "ncm")]
    pub extension: String,

    /// Maximum number of concurrent conversions. Unbounded when omitted.
    #[clap(long)]
    pub max_concurrent: Option<usize>,

    /// Decoder command implementing the engine contract.
    #[clap(long)]
    pub engine: Option<PathBuf>,

    /// Set when the decoder cannot serve concurrent calls; conversions are
    /// then serialized through the client.
    #[clap(long, default_value_t = false)]
    pub engine_not_reentrant: bool,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            scan_roots: args.scan_roots.clone(),
            output_dir: args.output_dir.clone(),
            staging_dir: args.staging_dir.clone(),
            extension: args.extension.clone(),
            max_concurrent: args.max_concurrent,
            engine_command: args.engine.clone(),
            engine_reentrant: !args.engine_not_reentrant,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  scan_roots: {:?}", app_config.scan_roots);
    info!("  output_dir: {:?}", app_config.output_dir);
    info!("  staging_dir: {:?}", app_config.staging_dir);
    info!(
        "  max_concurrent: {}",
        app_config
            .max_concurrent
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unbounded".to_string())
    );

    let engine = Arc::new(ProcessEngine::new(&app_config.engine.command));
    let client = Arc::new(EngineClient::new(engine, app_config.engine.reentrant));
    match client.version().await {
        Ok(version) => info!("Engine version: {}", version),
        Err(e) => warn!("Engine version query failed: {}", e),
    }

    let catalog = Arc::new(FileCatalog::new());
    // The CLI always runs with filesystem access; the flag exists for
    // embedding UIs that negotiate permissions.
    catalog.set_storage_permission(true);

    let staging = Arc::new(StagingManager::new(&app_config.staging_dir));
    staging.init().await?;

    let filter = ExtensionFilter::new(&app_config.extension);
    let scanner = DirectoryScanner::new(app_config.scan_roots.clone());
    let found: Vec<_> = scanner.scan(&filter).collect();
    info!("Discovered {} candidate file(s)", found.len());

    let skipped = catalog.add(found);
    if skipped > 0 {
        info!("Skipped {} duplicate candidate(s)", skipped);
    }

    let snapshot = catalog.snapshot();
    if snapshot.entries.is_empty() {
        info!("Nothing to convert");
        return Ok(());
    }

    let orchestrator = ConversionOrchestrator::new(
        catalog.clone(),
        staging,
        client,
        app_config.output_dir.clone(),
        filter,
        app_config.max_concurrent,
    );
    orchestrator.init().await?;

    orchestrator.convert_eligible(&snapshot).await;
    orchestrator.wait_idle().await;

    let final_snapshot = catalog.snapshot();
    let total = final_snapshot.entries.len();
    let mut failures = 0;
    for entry in final_snapshot.entries.iter() {
        match &entry.status {
            EntryStatus::Completed(outcome) if outcome.success => {
                info!(
                    "  ok   {} -> {}",
                    entry.display_name,
                    outcome.output_path.as_deref().unwrap_or("?")
                );
            }
            EntryStatus::Completed(outcome) => {
                failures += 1;
                error!(
                    "  fail {}: {}",
                    entry.display_name,
                    outcome.error.as_deref().unwrap_or("unknown error")
                );
            }
            other => {
                failures += 1;
                error!(
                    "  stuck {} left in {} state",
                    entry.display_name,
                    other.as_str()
                );
            }
        }
    }
    info!("Converted {}/{} file(s)", total - failures, total);

    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}
