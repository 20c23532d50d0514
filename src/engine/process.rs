//! Conversion engine backed by an external decoder process.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use tracing::debug;

use super::{ConversionEngine, EngineResult};

/// Engine adapter that shells out to a decoder command.
///
/// The decoder is invoked as
/// `<program> <input> --output-dir <dir> [--base-name <name>] --json`
/// and must print the conversion result record as a single JSON object on
/// stdout:
///
/// ```json
/// {"success": true, "output_path": "...", "format": "mp3",
///  "error": null, "meta_data": {"title": "..."}}
/// ```
///
/// `<program> --version` answers the diagnostics query.
pub struct ProcessEngine {
    program: PathBuf,
}

impl ProcessEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl ConversionEngine for ProcessEngine {
    fn convert(
        &self,
        input: &Path,
        output_dir: &Path,
        base_name: Option<&str>,
    ) -> Result<EngineResult> {
        let mut cmd = Command::new(&self.program);
        cmd.arg(input)
            .arg("--output-dir")
            .arg(output_dir)
            .arg("--json");
        if let Some(name) = base_name {
            cmd.arg("--base-name").arg(name);
        }

        debug!("Invoking decoder: {:?}", cmd);
        let output = cmd
            .output()
            .with_context(|| format!("failed to run decoder {:?}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("decoder exited with {}: {}", output.status, stderr.trim());
        }

        let result: EngineResult = serde_json::from_slice(&output.stdout)
            .context("decoder printed a malformed result record")?;
        Ok(result)
    }

    fn version(&self) -> Result<String> {
        let output = Command::new(&self.program)
            .arg("--version")
            .output()
            .with_context(|| format!("failed to run decoder {:?}", self.program))?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
