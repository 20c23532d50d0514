//! TOML file configuration.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Optional TOML configuration. Every field overrides the matching CLI
/// argument when present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    /// Directories to scan for encrypted audio files.
    pub scan_roots: Option<Vec<String>>,
    /// Directory converted files are written to.
    pub output_dir: Option<String>,
    /// Directory used for staged temporary copies.
    pub staging_dir: Option<String>,
    /// Recognized input file extension (with or without leading dot).
    pub extension: Option<String>,
    /// Upper bound on concurrent conversions.
    pub max_concurrent: Option<usize>,
    pub engine: Option<EngineFileConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineFileConfig {
    /// Decoder command implementing the engine contract.
    pub command: Option<String>,
    /// Whether the decoder tolerates concurrent invocations.
    pub reentrant: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("failed to parse config file {:?}", path))
    }
}
