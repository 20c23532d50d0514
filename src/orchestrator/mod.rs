//! Batch conversion driver.
//!
//! Fans out one task per eligible catalog entry: claim the entry, stage its
//! source, invoke the engine client, record the terminal outcome, release
//! the staged copy. All per-entry faults are absorbed into that entry's
//! outcome; only invariant violations are logged loudly. No retries.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::catalog::{
    CatalogError, CatalogSnapshot, ConversionOutcome, EntryId, EntryStatus, FileCatalog,
};
use crate::engine::EngineClient;
use crate::scanner::ExtensionFilter;
use crate::source::SourceHandle;
use crate::staging::StagingManager;

/// Top-level driver over catalog, staging and the engine client.
pub struct ConversionOrchestrator {
    catalog: Arc<FileCatalog>,
    staging: Arc<StagingManager>,
    client: Arc<EngineClient>,
    output_dir: PathBuf,
    filter: ExtensionFilter,
    /// Caps concurrent conversions when set. `None` launches one task per
    /// eligible entry with no upper bound.
    limiter: Option<Arc<Semaphore>>,
    tasks: Mutex<JoinSet<()>>,
}

impl ConversionOrchestrator {
    pub fn new(
        catalog: Arc<FileCatalog>,
        staging: Arc<StagingManager>,
        client: Arc<EngineClient>,
        output_dir: impl Into<PathBuf>,
        filter: ExtensionFilter,
        max_concurrent: Option<usize>,
    ) -> Self {
        Self {
            catalog,
            staging,
            client,
            output_dir: output_dir.into(),
            filter,
            limiter: max_concurrent.map(|n| Arc::new(Semaphore::new(n))),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Create the shared output directory if missing.
    pub async fn init(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.output_dir).await
    }

    /// Launch one conversion task for every `Pending` entry in `snapshot`.
    ///
    /// Returns once all tasks are launched; completion is observed through
    /// catalog snapshots, not through this call. Entries already
    /// `Converting` or `Completed` are skipped, and an entry claimed by an
    /// earlier call in the meantime is skipped by its own task, so
    /// re-invocation over a stale snapshot is idempotent.
    pub async fn convert_eligible(&self, snapshot: &CatalogSnapshot) {
        let mut tasks = self.tasks.lock().await;
        let mut launched = 0;

        for entry in snapshot.entries.iter() {
            if !matches!(entry.status, EntryStatus::Pending) {
                continue;
            }

            let catalog = self.catalog.clone();
            let staging = self.staging.clone();
            let client = self.client.clone();
            let output_dir = self.output_dir.clone();
            let filter = self.filter.clone();
            let limiter = self.limiter.clone();
            let id = entry.id;
            let handle = entry.handle.clone();
            let display_name = entry.display_name.clone();

            tasks.spawn(async move {
                convert_entry(
                    catalog,
                    staging,
                    client,
                    output_dir,
                    filter,
                    limiter,
                    id,
                    handle,
                    display_name,
                )
                .await;
            });
            launched += 1;
        }

        if launched > 0 {
            info!("Launched {} conversion task(s)", launched);
        }
    }

    /// Wait for every launched conversion task to finish. Used by the
    /// binary to drain the batch and by tests.
    pub async fn wait_idle(&self) {
        let mut tasks = self.tasks.lock().await;
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Conversion task aborted: {}", e);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn convert_entry(
    catalog: Arc<FileCatalog>,
    staging: Arc<StagingManager>,
    client: Arc<EngineClient>,
    output_dir: PathBuf,
    filter: ExtensionFilter,
    limiter: Option<Arc<Semaphore>>,
    id: EntryId,
    handle: Arc<dyn SourceHandle>,
    display_name: String,
) {
    let _permit = match limiter {
        Some(semaphore) => match semaphore.acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(_) => return,
        },
        None => None,
    };

    // Claim the entry. Losing the claim is not an error: either the catalog
    // was cleared, or another launch got here first.
    match catalog.apply_transition(id, EntryStatus::Converting) {
        Ok(()) => {}
        Err(CatalogError::NotFound(_)) => {
            debug!("Entry {} ({}) vanished before start, skipping", id, display_name);
            return;
        }
        Err(CatalogError::InvalidTransition { .. }) => {
            debug!("Entry {} ({}) already claimed, skipping", id, display_name);
            return;
        }
    }

    info!("Converting {}", display_name);
    let outcome = run_conversion(&staging, &client, &output_dir, &filter, handle, &display_name).await;

    match catalog.apply_transition(id, EntryStatus::Completed(outcome)) {
        Ok(()) => {}
        Err(CatalogError::NotFound(_)) => {
            // Catalog cleared while this conversion was in flight.
            debug!(
                "Entry {} ({}) no longer in catalog, dropping result",
                id, display_name
            );
        }
        Err(e @ CatalogError::InvalidTransition { .. }) => {
            error!("Refusing to record result for {}: {}", display_name, e);
        }
    }
}

/// Stage, convert, map the engine result into an outcome. The staged copy
/// is released when `staged` drops, regardless of how this returns.
async fn run_conversion(
    staging: &StagingManager,
    client: &EngineClient,
    output_dir: &std::path::Path,
    filter: &ExtensionFilter,
    handle: Arc<dyn SourceHandle>,
    display_name: &str,
) -> ConversionOutcome {
    let staged = match staging.stage(handle, display_name).await {
        Ok(staged) => staged,
        Err(e) => {
            warn!("Staging failed for {}: {}", display_name, e);
            return ConversionOutcome::failure(format!("staging failed: {e}"));
        }
    };

    let base_name = filter.strip(display_name);
    let result = client
        .convert(staged.path(), output_dir, Some(base_name))
        .await;

    if result.success {
        info!(
            "Converted {} -> {}",
            display_name,
            result.output_path.as_deref().unwrap_or("?")
        );
    } else {
        warn!(
            "Conversion failed for {}: {}",
            display_name,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }

    ConversionOutcome {
        success: result.success,
        output_path: result.output_path,
        format: result.format,
        error: result.error,
        metadata: result.metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::EntryStatus;
    use crate::engine::{ConversionEngine, EngineResult};
    use crate::source::{Candidate, MemorySource};
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    /// Engine that succeeds for every input, deriving the output path from
    /// the requested base name.
    struct NamingEngine;

    impl ConversionEngine for NamingEngine {
        fn convert(
            &self,
            input: &Path,
            output_dir: &Path,
            base_name: Option<&str>,
        ) -> anyhow::Result<EngineResult> {
            let base = base_name.unwrap_or("out");
            Ok(EngineResult {
                success: true,
                output_path: Some(output_dir.join(format!("{base}.mp3")).display().to_string()),
                format: Some("mp3".to_string()),
                error: None,
                metadata: Some(HashMap::from([(
                    "staged_input".to_string(),
                    input.display().to_string(),
                )])),
            })
        }

        fn version(&self) -> anyhow::Result<String> {
            Ok("naming".to_string())
        }
    }

    /// Engine that fails (as a fault) for names listed in `faulty`.
    struct SelectiveEngine {
        faulty: Vec<String>,
    }

    impl ConversionEngine for SelectiveEngine {
        fn convert(
            &self,
            _input: &Path,
            output_dir: &Path,
            base_name: Option<&str>,
        ) -> anyhow::Result<EngineResult> {
            let base = base_name.unwrap_or("out").to_string();
            if self.faulty.contains(&base) {
                anyhow::bail!("cannot decode {base}");
            }
            Ok(EngineResult {
                success: true,
                output_path: Some(output_dir.join(format!("{base}.mp3")).display().to_string()),
                ..Default::default()
            })
        }

        fn version(&self) -> anyhow::Result<String> {
            Ok("selective".to_string())
        }
    }

    /// Engine that blocks until released through a channel.
    struct GatedEngine {
        gate: StdMutex<mpsc::Receiver<()>>,
    }

    impl ConversionEngine for GatedEngine {
        fn convert(
            &self,
            _input: &Path,
            _output_dir: &Path,
            _base_name: Option<&str>,
        ) -> anyhow::Result<EngineResult> {
            self.gate.lock().unwrap().recv().ok();
            Ok(EngineResult {
                success: true,
                ..Default::default()
            })
        }

        fn version(&self) -> anyhow::Result<String> {
            Ok("gated".to_string())
        }
    }

    struct Fixture {
        catalog: Arc<FileCatalog>,
        orchestrator: ConversionOrchestrator,
        staging_dir: TempDir,
        _output_dir: TempDir,
    }

    fn fixture(engine: Arc<dyn ConversionEngine>, max_concurrent: Option<usize>) -> Fixture {
        let staging_dir = TempDir::new().unwrap();
        let output_dir = TempDir::new().unwrap();
        let catalog = Arc::new(FileCatalog::new());
        let orchestrator = ConversionOrchestrator::new(
            catalog.clone(),
            Arc::new(StagingManager::new(staging_dir.path())),
            Arc::new(EngineClient::new(engine, true)),
            output_dir.path(),
            ExtensionFilter::default(),
            max_concurrent,
        );
        Fixture {
            catalog,
            orchestrator,
            staging_dir,
            _output_dir: output_dir,
        }
    }

    fn candidate(name: &str, content: &[u8]) -> Candidate {
        Candidate::new(Arc::new(MemorySource::new(name, content.to_vec())), name)
    }

    fn completed(entry_status: &EntryStatus) -> &ConversionOutcome {
        match entry_status {
            EntryStatus::Completed(outcome) => outcome,
            other => panic!("expected COMPLETED, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_converts_all_pending_entries() {
        let fx = fixture(Arc::new(NamingEngine), None);
        fx.catalog.add(vec![
            candidate("a.ncm", b"aaa"),
            candidate("b.ncm", b"bbb"),
            candidate("c.ncm", b"ccc"),
        ]);

        fx.orchestrator.convert_eligible(&fx.catalog.snapshot()).await;
        fx.orchestrator.wait_idle().await;

        let snapshot = fx.catalog.snapshot();
        assert_eq!(snapshot.entries.len(), 3);
        for entry in snapshot.entries.iter() {
            let outcome = completed(&entry.status);
            assert!(outcome.success);
        }
    }

    #[tokio::test]
    async fn test_outcomes_do_not_cross_contaminate() {
        let fx = fixture(Arc::new(NamingEngine), None);
        let names = ["one.ncm", "two.ncm", "three.ncm", "four.ncm", "five.ncm"];
        fx.catalog
            .add(names.iter().map(|n| candidate(n, n.as_bytes())));

        fx.orchestrator.convert_eligible(&fx.catalog.snapshot()).await;
        fx.orchestrator.wait_idle().await;

        for entry in fx.catalog.snapshot().entries.iter() {
            let outcome = completed(&entry.status);
            let base = entry.display_name.trim_end_matches(".ncm");
            assert!(
                outcome
                    .output_path
                    .as_deref()
                    .unwrap()
                    .ends_with(&format!("{base}.mp3")),
                "outcome for {} points at {:?}",
                entry.display_name,
                outcome.output_path
            );
        }
    }

    #[tokio::test]
    async fn test_engine_fault_is_recorded_not_propagated() {
        let engine = SelectiveEngine {
            faulty: vec!["bad".to_string()],
        };
        let fx = fixture(Arc::new(engine), None);
        fx.catalog.add(vec![
            candidate("good1.ncm", b"1"),
            candidate("bad.ncm", b"2"),
            candidate("good2.ncm", b"3"),
        ]);

        fx.orchestrator.convert_eligible(&fx.catalog.snapshot()).await;
        fx.orchestrator.wait_idle().await;

        let snapshot = fx.catalog.snapshot();
        let by_name: HashMap<&str, &ConversionOutcome> = snapshot
            .entries
            .iter()
            .map(|e| (e.display_name.as_str(), completed(&e.status)))
            .collect();

        assert!(by_name["good1.ncm"].success);
        assert!(by_name["good2.ncm"].success);
        assert!(!by_name["bad.ncm"].success);
        assert!(by_name["bad.ncm"]
            .error
            .as_deref()
            .unwrap()
            .contains("cannot decode bad"));
    }

    #[tokio::test]
    async fn test_staged_copies_are_released_after_batch() {
        let engine = SelectiveEngine {
            faulty: vec!["bad".to_string()],
        };
        let fx = fixture(Arc::new(engine), None);
        fx.catalog.add(vec![
            candidate("good1.ncm", b"1"),
            candidate("bad.ncm", b"2"),
        ]);

        fx.orchestrator.convert_eligible(&fx.catalog.snapshot()).await;
        fx.orchestrator.wait_idle().await;

        let leftovers = std::fs::read_dir(fx.staging_dir.path()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_unreadable_source_becomes_failed_outcome() {
        struct DeadSource;
        impl SourceHandle for DeadSource {
            fn open(&self) -> std::io::Result<Box<dyn std::io::Read + Send>> {
                Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))
            }
            fn describe(&self) -> String {
                "<dead>".to_string()
            }
        }

        let fx = fixture(Arc::new(NamingEngine), None);
        fx.catalog
            .add(vec![Candidate::new(Arc::new(DeadSource), "dead.ncm")]);

        fx.orchestrator.convert_eligible(&fx.catalog.snapshot()).await;
        fx.orchestrator.wait_idle().await;

        let snapshot = fx.catalog.snapshot();
        let outcome = completed(&snapshot.entries[0].status);
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("staging failed"));
    }

    #[tokio::test]
    async fn test_reinvocation_on_stale_snapshot_is_idempotent() {
        let fx = fixture(Arc::new(NamingEngine), None);
        fx.catalog.add(vec![candidate("a.ncm", b"a")]);
        let stale = fx.catalog.snapshot();

        fx.orchestrator.convert_eligible(&stale).await;
        fx.orchestrator.convert_eligible(&stale).await;
        fx.orchestrator.wait_idle().await;

        let snapshot = fx.catalog.snapshot();
        assert_eq!(snapshot.entries.len(), 1);
        assert!(completed(&snapshot.entries[0].status).success);
    }

    #[tokio::test]
    async fn test_clear_during_flight_is_absorbed() {
        let (release, gate) = mpsc::channel();
        let engine = GatedEngine {
            gate: StdMutex::new(gate),
        };
        let fx = fixture(Arc::new(engine), None);
        fx.catalog.add(vec![candidate("a.ncm", b"a")]);

        fx.orchestrator.convert_eligible(&fx.catalog.snapshot()).await;

        // Wait until the entry is claimed, then pull the rug.
        let mut rx = fx.catalog.subscribe();
        loop {
            let converting = fx
                .catalog
                .snapshot()
                .entries
                .first()
                .map(|e| matches!(e.status, EntryStatus::Converting))
                .unwrap_or(false);
            if converting {
                break;
            }
            rx.changed().await.unwrap();
        }
        fx.catalog.clear();

        release.send(()).unwrap();
        fx.orchestrator.wait_idle().await;

        // The in-flight result was dropped, nothing panicked, staging is
        // clean.
        assert!(fx.catalog.snapshot().entries.is_empty());
        let leftovers = std::fs::read_dir(fx.staging_dir.path()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_concurrency_cap_is_honored() {
        struct Probe {
            current: AtomicUsize,
            max_seen: AtomicUsize,
        }
        impl ConversionEngine for Probe {
            fn convert(
                &self,
                _input: &Path,
                _output_dir: &Path,
                _base_name: Option<&str>,
            ) -> anyhow::Result<EngineResult> {
                let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_seen.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(20));
                self.current.fetch_sub(1, Ordering::SeqCst);
                Ok(EngineResult {
                    success: true,
                    ..Default::default()
                })
            }
            fn version(&self) -> anyhow::Result<String> {
                Ok("probe".to_string())
            }
        }

        let probe = Arc::new(Probe {
            current: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
        });
        let fx = fixture(probe.clone(), Some(2));
        fx.catalog.add((0..6).map(|i| {
            let name = format!("file{i}.ncm");
            Candidate::new(Arc::new(MemorySource::new(&name, vec![i as u8])), name)
        }));

        fx.orchestrator.convert_eligible(&fx.catalog.snapshot()).await;
        fx.orchestrator.wait_idle().await;

        assert!(probe.max_seen.load(Ordering::SeqCst) <= 2);
        for entry in fx.catalog.snapshot().entries.iter() {
            assert!(completed(&entry.status).success);
        }
    }
}
