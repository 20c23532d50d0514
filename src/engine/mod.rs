//! Adapter around the external conversion engine.
//!
//! The engine itself is a black box that turns one encrypted input file
//! into a playable one. Its contract is synchronous and blocking; the
//! client here moves calls onto the blocking pool and guarantees that no
//! fault — error or panic — ever propagates past this boundary.

mod process;

pub use process::ProcessEngine;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::warn;

/// Result record returned by the conversion engine.
///
/// Mirrors the engine's wire shape: every field besides `success` is
/// optional. `meta_data` is accepted as an alias for engines that emit
/// snake-cased records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EngineResult {
    pub success: bool,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, alias = "meta_data")]
    pub metadata: Option<HashMap<String, String>>,
}

impl EngineResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Blocking contract of the external conversion engine.
///
/// A single shared instance may serve concurrent calls when it is
/// re-entrant; otherwise wrap it in an [`EngineClient`] constructed with
/// `reentrant = false`, which serializes calls.
#[cfg_attr(feature = "mock", mockall::automock)]
pub trait ConversionEngine: Send + Sync {
    /// Convert `input` into `output_dir`, optionally forcing the output
    /// base name. Blocking; must not be called on a latency-sensitive
    /// execution context.
    fn convert(
        &self,
        input: &Path,
        output_dir: &Path,
        base_name: Option<&str>,
    ) -> anyhow::Result<EngineResult>;

    /// Engine version string. Diagnostics only, not part of the conversion
    /// contract.
    fn version(&self) -> anyhow::Result<String>;
}

/// Async client over a shared engine instance.
pub struct EngineClient {
    engine: Arc<dyn ConversionEngine>,
    serialize: Option<Arc<Semaphore>>,
}

impl EngineClient {
    /// `reentrant: false` degrades the client to one engine call at a time,
    /// queueing the rest.
    pub fn new(engine: Arc<dyn ConversionEngine>, reentrant: bool) -> Self {
        let serialize = if reentrant {
            None
        } else {
            Some(Arc::new(Semaphore::new(1)))
        };
        Self { engine, serialize }
    }

    /// Invoke the engine off the async runtime. Engine errors and panics
    /// are both absorbed into a failed [`EngineResult`].
    pub async fn convert(
        &self,
        input: &Path,
        output_dir: &Path,
        base_name: Option<&str>,
    ) -> EngineResult {
        let _permit = match &self.serialize {
            Some(semaphore) => Some(
                semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("engine serialization semaphore closed"),
            ),
            None => None,
        };

        let engine = self.engine.clone();
        let input = input.to_path_buf();
        let output_dir = output_dir.to_path_buf();
        let base_name = base_name.map(str::to_string);

        let joined = tokio::task::spawn_blocking(move || {
            engine.convert(&input, &output_dir, base_name.as_deref())
        })
        .await;

        match joined {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!("Engine reported a fault: {:#}", e);
                EngineResult::failure(format!("{:#}", e))
            }
            // The blocking task panicked or was cancelled.
            Err(e) => {
                warn!("Engine call aborted: {}", e);
                EngineResult::failure(format!("engine call aborted: {e}"))
            }
        }
    }

    /// Query the engine version, for startup diagnostics.
    pub async fn version(&self) -> anyhow::Result<String> {
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || engine.version()).await?
    }
}
