//! Scoped temporary copies of conversion inputs.
//!
//! The engine consumes local paths, while sources are opaque handles. The
//! staging manager materializes a handle into a uniquely named temporary
//! file; the resulting [`StagedInput`] deletes that file when dropped, on
//! every exit path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::{Builder, TempPath};
use thiserror::Error;
use tracing::{debug, warn};

use crate::source::SourceHandle;

/// Failure to produce a readable local copy of a source. Terminates that
/// entry's conversion; never aborts other entries.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("failed to resolve source for {name}: {source}")]
    Resolve {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to stage {name}: {source}")]
    Copy {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("staging task failed: {0}")]
    Task(String),
}

/// A staged temporary copy of one conversion input.
///
/// The backing file is removed when this value drops. Deletion failure is
/// logged, never escalated.
#[derive(Debug)]
pub struct StagedInput {
    // Always `Some` until drop.
    path: Option<TempPath>,
    len: u64,
}

impl StagedInput {
    pub fn path(&self) -> &Path {
        self.path.as_ref().expect("staged input already released")
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for StagedInput {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let path_buf = path.to_path_buf();
            if let Err(e) = path.close() {
                warn!(
                    "Failed to delete staged file {}: {}",
                    path_buf.display(),
                    e
                );
            }
        }
    }
}

/// Owner of the staging directory.
pub struct StagingManager {
    staging_dir: PathBuf,
}

impl StagingManager {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Create the staging directory if missing.
    pub async fn init(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.staging_dir).await
    }

    /// Copy the full byte content reachable from `handle` into a uniquely
    /// named temporary file. Runs on the blocking pool. On failure no
    /// partial file is left behind.
    pub async fn stage(
        &self,
        handle: Arc<dyn SourceHandle>,
        display_name: &str,
    ) -> Result<StagedInput, StagingError> {
        let dir = self.staging_dir.clone();
        let name = display_name.to_string();
        tokio::task::spawn_blocking(move || stage_blocking(&dir, handle, &name))
            .await
            .map_err(|e| StagingError::Task(e.to_string()))?
    }
}

fn stage_blocking(
    dir: &Path,
    handle: Arc<dyn SourceHandle>,
    name: &str,
) -> Result<StagedInput, StagingError> {
    let mut reader = handle.open().map_err(|e| StagingError::Resolve {
        name: name.to_string(),
        source: e,
    })?;

    // Keep the original suffix so decoders that sniff extensions still work.
    let suffix = Path::new(name)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    // A failure past this point drops the NamedTempFile, which removes the
    // partially written file.
    let mut temp = Builder::new()
        .prefix("stage-")
        .suffix(&suffix)
        .tempfile_in(dir)
        .map_err(|e| StagingError::Copy {
            name: name.to_string(),
            source: e,
        })?;

    let len = std::io::copy(&mut reader, temp.as_file_mut()).map_err(|e| StagingError::Copy {
        name: name.to_string(),
        source: e,
    })?;

    debug!(
        "Staged {} ({} bytes) at {}",
        name,
        len,
        temp.path().display()
    );

    Ok(StagedInput {
        path: Some(temp.into_temp_path()),
        len,
    })
}
