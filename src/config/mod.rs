mod file_config;

pub use file_config::{EngineFileConfig, FileConfig};

use std::path::PathBuf;

use anyhow::{bail, Result};

/// CLI arguments that take part in config resolution. Mirrors the binary's
/// argument set; TOML values override these where present.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub scan_roots: Vec<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub staging_dir: Option<PathBuf>,
    pub extension: String,
    pub max_concurrent: Option<usize>,
    pub engine_command: Option<PathBuf>,
    pub engine_reentrant: bool,
}

/// Settings for the external decoder.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub command: PathBuf,
    /// `false` serializes engine calls through the client.
    pub reentrant: bool,
}

/// Fully resolved application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub scan_roots: Vec<PathBuf>,
    pub output_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub extension: String,
    /// Upper bound on concurrent conversions. `None` (the default) launches
    /// one task per eligible entry with no cap.
    pub max_concurrent: Option<usize>,
    pub engine: EngineSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file
    /// config. TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let scan_roots = file
            .scan_roots
            .map(|roots| roots.iter().map(PathBuf::from).collect())
            .unwrap_or_else(|| cli.scan_roots.clone());

        let output_dir = file
            .output_dir
            .map(PathBuf::from)
            .or_else(|| cli.output_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("output_dir must be specified via --output-dir or in config file")
            })?;

        let staging_dir = file
            .staging_dir
            .map(PathBuf::from)
            .or_else(|| cli.staging_dir.clone())
            .unwrap_or_else(|| std::env::temp_dir().join("ncm-converter-staging"));

        let extension = file.extension.unwrap_or_else(|| cli.extension.clone());
        if extension.trim_start_matches('.').is_empty() {
            bail!("extension must not be empty");
        }

        let max_concurrent = file.max_concurrent.or(cli.max_concurrent);
        if max_concurrent == Some(0) {
            bail!("max_concurrent must be greater than zero");
        }

        let engine_file = file.engine.unwrap_or_default();
        let command = engine_file
            .command
            .map(PathBuf::from)
            .or_else(|| cli.engine_command.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("engine command must be specified via --engine or in config file")
            })?;
        let reentrant = engine_file.reentrant.unwrap_or(cli.engine_reentrant);

        Ok(Self {
            scan_roots,
            output_dir,
            staging_dir,
            extension,
            max_concurrent,
            engine: EngineSettings { command, reentrant },
        })
    }
}
