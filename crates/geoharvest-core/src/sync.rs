//! Reconciliation outcomes, run statistics and change detection.
//!
//! Pure business logic with no I/O: what happened to a record, how the
//! outcomes add up, and whether a known record needs rewriting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{LocalRecordEntry, RemoteRecord};
use crate::run::RunStatus;

/// Outcome of reconciling a single remote record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// New record, created in the metadata store.
    Added,
    /// Known record whose content changed, rewritten in the store.
    Updated,
    /// Known record with no changes, or one already seen in this run.
    Unchanged,
    /// Record owned by another source, left alone by policy.
    DuplicateSkipped,
    /// Lookup or store failure for this record.
    Failed,
    /// Record whose schema is not supported.
    UnknownSchema,
    /// Record no longer offered remotely, deleted from the store.
    Removed,
}

/// Counters for one harvest run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestStats {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub duplicates_skipped: usize,
    pub errors: usize,
    pub unknown_schema: usize,
}

impl HarvestStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an outcome, incrementing the appropriate counter.
    pub fn record(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Added => self.added += 1,
            RecordOutcome::Updated => self.updated += 1,
            RecordOutcome::Unchanged => self.unchanged += 1,
            RecordOutcome::DuplicateSkipped => self.duplicates_skipped += 1,
            RecordOutcome::Failed => self.errors += 1,
            RecordOutcome::UnknownSchema => self.unknown_schema += 1,
            RecordOutcome::Removed => self.removed += 1,
        }
    }

    /// Number of remote records accounted for. Removals are not included.
    pub fn processed(&self) -> usize {
        self.added
            + self.updated
            + self.unchanged
            + self.duplicates_skipped
            + self.errors
            + self.unknown_schema
    }

    /// Returns true if the run wrote anything to the metadata store.
    pub fn has_changes(&self) -> bool {
        self.added + self.updated + self.removed > 0
    }
}

// =============================================================================
// Change detection
// =============================================================================

/// Result of comparing a remote record with what was harvested before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeDecision {
    pub needs_write: bool,
    pub outcome: RecordOutcome,
    /// Human-readable reason for the decision
    pub reason: &'static str,
}

/// Decides whether a known record must be rewritten.
///
/// When both sides carry a last-modified stamp, the stamps decide. Otherwise
/// the content fingerprints are compared. Entries without a stored
/// fingerprint are always refreshed.
pub fn detect_change(previous: &LocalRecordEntry, record: &RemoteRecord) -> ChangeDecision {
    if let (Some(before), Some(now)) = (previous.modified.as_deref(), record.modified.as_deref()) {
        return if before == now {
            ChangeDecision {
                needs_write: false,
                outcome: RecordOutcome::Unchanged,
                reason: "modification date unchanged",
            }
        } else {
            ChangeDecision {
                needs_write: true,
                outcome: RecordOutcome::Updated,
                reason: "modification date changed",
            }
        };
    }

    match previous.fingerprint.as_deref() {
        Some(hash) if hash == record.fingerprint => ChangeDecision {
            needs_write: false,
            outcome: RecordOutcome::Unchanged,
            reason: "content fingerprint matches",
        },
        Some(_) => ChangeDecision {
            needs_write: true,
            outcome: RecordOutcome::Updated,
            reason: "content fingerprint changed",
        },
        None => ChangeDecision {
            needs_write: true,
            outcome: RecordOutcome::Updated,
            reason: "no fingerprint recorded",
        },
    }
}

// =============================================================================
// Harvest Result
// =============================================================================

/// Final record of one harvest run. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestResult {
    pub node_id: String,
    pub status: RunStatus,
    pub stats: HarvestStats,
    /// Why the run failed, or the last search-level failure it survived.
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Searches cut short by a page failure.
    pub searches_truncated: usize,
    /// Endpoints harvested, the root included.
    pub endpoints_visited: usize,
}

impl HarvestResult {
    /// A run that ended before doing anything.
    pub fn empty(
        node_id: impl Into<String>,
        status: RunStatus,
        error: Option<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            status,
            stats: HarvestStats::default(),
            error,
            started_at,
            finished_at: Utc::now(),
            searches_truncated: 0,
            endpoints_visited: 0,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == RunStatus::Cancelled
    }

    pub fn is_failed(&self) -> bool {
        self.status == RunStatus::Failed
    }

    /// Wall-clock duration of the run.
    pub fn duration(&self) -> chrono::TimeDelta {
        self.finished_at - self.started_at
    }
}
