//! Catalog data model.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::source::SourceHandle;

/// Stable identifier assigned to an entry at insertion. Ids are never
/// reused, not even after a `clear`.
pub type EntryId = u64;

/// Terminal result of one conversion attempt, as recorded on the entry.
///
/// Every field besides `success` is optional; a failed attempt carries a
/// human-readable `error` and nothing else.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionOutcome {
    pub success: bool,
    pub output_path: Option<String>,
    pub format: Option<String>,
    pub error: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
}

impl ConversionOutcome {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Per-entry conversion state.
///
/// Transitions are one-directional: `Pending -> Converting -> Completed`.
/// The outcome carried by `Completed` is set exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryStatus {
    Pending,
    Converting,
    Completed(ConversionOutcome),
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "PENDING",
            EntryStatus::Converting => "CONVERTING",
            EntryStatus::Completed(_) => "COMPLETED",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            EntryStatus::Pending => 0,
            EntryStatus::Converting => 1,
            EntryStatus::Completed(_) => 2,
        }
    }

    /// Whether moving to `next` advances the state. Staying in place or
    /// going backwards is an invalid transition.
    pub(crate) fn can_advance_to(&self, next: &EntryStatus) -> bool {
        next.rank() > self.rank()
    }
}

/// One tracked conversion candidate.
#[derive(Clone)]
pub struct CatalogEntry {
    /// Stable identifier, immutable after insertion.
    pub id: EntryId,
    /// Non-owning reference to the input bytes.
    pub handle: Arc<dyn SourceHandle>,
    /// Display name; also the case-insensitive deduplication key.
    pub display_name: String,
    pub status: EntryStatus,
}

impl fmt::Debug for CatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogEntry")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("status", &self.status)
            .finish()
    }
}

/// Immutable point-in-time view of the catalog.
///
/// Published after every catalog mutation; observers only ever see these,
/// never the mutable state behind them.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    pub entries: Arc<Vec<CatalogEntry>>,
    /// Storage permission flag pushed in from the platform layer. Display
    /// state only; the core never gates conversion on it.
    pub storage_permission: bool,
    /// Monotonic counter, bumped on every published mutation.
    pub version: u64,
}

impl CatalogSnapshot {
    pub fn empty() -> Self {
        Self {
            entries: Arc::new(Vec::new()),
            storage_permission: false,
            version: 0,
        }
    }
}
