//! Deduplicated, ordered collection of conversion candidates.
//!
//! The catalog is the single piece of shared mutable state in the pipeline.
//! All mutation goes through its serialized entry points, and every
//! mutation atomically publishes a fresh [`CatalogSnapshot`] through a
//! watch channel for observers.

mod models;

pub use models::{CatalogEntry, CatalogSnapshot, ConversionOutcome, EntryId, EntryStatus};

use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error};

use crate::source::Candidate;

/// Errors surfaced by catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The entry is gone, typically because a `clear` raced an in-flight
    /// conversion. Non-fatal; callers log and drop the result.
    #[error("entry {0} not found")]
    NotFound(EntryId),

    /// Attempt to regress or re-enter a state. A programming defect, not a
    /// user-facing condition.
    #[error("invalid transition for entry {id}: {from} -> {to}")]
    InvalidTransition {
        id: EntryId,
        from: &'static str,
        to: &'static str,
    },
}

struct CatalogInner {
    entries: Vec<CatalogEntry>,
    next_id: EntryId,
    storage_permission: bool,
    version: u64,
}

/// Ordered, unique-by-name collection of conversion entries.
pub struct FileCatalog {
    inner: Mutex<CatalogInner>,
    snapshot_tx: watch::Sender<CatalogSnapshot>,
}

impl FileCatalog {
    pub fn new() -> Self {
        let (snapshot_tx, _) = watch::channel(CatalogSnapshot::empty());
        Self {
            inner: Mutex::new(CatalogInner {
                entries: Vec::new(),
                next_id: 0,
                storage_permission: false,
                version: 0,
            }),
            snapshot_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CatalogInner> {
        self.inner.lock().expect("catalog lock poisoned")
    }

    /// Publish a snapshot of the current state. Must be called with the
    /// lock held so publication is atomic with the mutation producing it.
    fn publish(&self, inner: &mut CatalogInner) {
        inner.version += 1;
        self.snapshot_tx.send_replace(CatalogSnapshot {
            entries: Arc::new(inner.entries.clone()),
            storage_permission: inner.storage_permission,
            version: inner.version,
        });
    }

    /// Append every candidate whose display name is not already present
    /// (case-insensitive). Returns how many candidates were skipped as
    /// duplicates. Argument order is preserved among accepted entries.
    pub fn add(&self, candidates: impl IntoIterator<Item = Candidate>) -> usize {
        let mut inner = self.lock();
        let mut skipped = 0;
        let mut accepted = 0;

        for candidate in candidates {
            let key = candidate.display_name.to_lowercase();
            let duplicate = inner
                .entries
                .iter()
                .any(|e| e.display_name.to_lowercase() == key);
            if duplicate {
                debug!("Skipping duplicate candidate: {}", candidate.display_name);
                skipped += 1;
                continue;
            }

            let id = inner.next_id;
            inner.next_id += 1;
            inner.entries.push(CatalogEntry {
                id,
                handle: candidate.handle,
                display_name: candidate.display_name,
                status: EntryStatus::Pending,
            });
            accepted += 1;
        }

        if accepted > 0 {
            debug!("Added {} entries ({} duplicates skipped)", accepted, skipped);
            self.publish(&mut inner);
        }

        skipped
    }

    /// Replace the entry list with an empty one. Does not cancel in-flight
    /// conversions; their eventual transitions will fail with `NotFound`.
    pub fn clear(&self) {
        let mut inner = self.lock();
        let removed = inner.entries.len();
        inner.entries.clear();
        self.publish(&mut inner);
        debug!("Cleared {} entries", removed);
    }

    /// Look up an entry by id.
    pub fn entry(&self, id: EntryId) -> Result<CatalogEntry, CatalogError> {
        let inner = self.lock();
        inner
            .entries
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or(CatalogError::NotFound(id))
    }

    /// Advance an entry's status. Refuses regressions and re-entries with
    /// `InvalidTransition`; a `Completed` outcome is therefore set exactly
    /// once and never overwritten.
    pub fn apply_transition(&self, id: EntryId, next: EntryStatus) -> Result<(), CatalogError> {
        let mut inner = self.lock();
        let idx = inner
            .entries
            .iter()
            .position(|e| e.id == id)
            .ok_or(CatalogError::NotFound(id))?;

        if !inner.entries[idx].status.can_advance_to(&next) {
            let err = CatalogError::InvalidTransition {
                id,
                from: inner.entries[idx].status.as_str(),
                to: next.as_str(),
            };
            error!("Refused catalog mutation: {}", err);
            return Err(err);
        }

        inner.entries[idx].status = next;
        self.publish(&mut inner);
        Ok(())
    }

    /// Update the storage permission flag carried by snapshots.
    pub fn set_storage_permission(&self, granted: bool) {
        let mut inner = self.lock();
        if inner.storage_permission != granted {
            inner.storage_permission = granted;
            self.publish(&mut inner);
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> CatalogSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Subscribe to snapshot updates.
    pub fn subscribe(&self) -> watch::Receiver<CatalogSnapshot> {
        self.snapshot_tx.subscribe()
    }
}

impl Default for FileCatalog {
    fn default() -> Self {
        Self::new()
    }
}
