//! The reconciliation engine: one harvest pass over remote record streams.
//!
//! For every record the engine resolves its identity, decides between
//! create, update, skip and unchanged, issues at most one store write, and
//! counts the outcome. A failing record is counted and skipped; it never
//! ends the pass. After a complete pass the engine can delete the records
//! this source imported earlier that the remote side no longer offers.
//!
//! The engine owns the node's [`LocalRecordIndex`] for the duration of the
//! pass. An index entry changes only after the matching store call
//! succeeded.

use std::collections::HashSet;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::identity::{IdentityResolver, Resolution};
use crate::models::{LocalRecordEntry, LocalRecordIndex, RecordWrite, RemoteRecord};
use crate::node::HarvesterConfig;
use crate::pager::RecordStream;
use crate::progress::{HarvestEvent, ProgressReporter};
use crate::sync::{HarvestStats, RecordOutcome, detect_change};
use crate::traits::{CatalogClient, MetadataStore};

/// How a single search stream ended.
#[derive(Debug)]
pub enum SearchOutcome {
    /// Every page was consumed.
    Exhausted,
    /// A page fetch failed; records before it were processed.
    Truncated(AppError),
    /// Cancellation was observed between records or pages.
    Cancelled,
}

/// How removal detection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    Finished,
    Cancelled,
}

pub struct ReconciliationEngine<'a, S: MetadataStore> {
    store: &'a S,
    config: &'a HarvesterConfig,
    index: &'a mut LocalRecordIndex,
    seen: HashSet<String>,
    stats: HarvestStats,
    discovered: Vec<String>,
    report_interval: usize,
}

impl<'a, S: MetadataStore> ReconciliationEngine<'a, S> {
    pub fn new(store: &'a S, config: &'a HarvesterConfig, index: &'a mut LocalRecordIndex) -> Self {
        Self {
            store,
            config,
            index,
            seen: HashSet::new(),
            stats: HarvestStats::new(),
            discovered: Vec::new(),
            report_interval: 25,
        }
    }

    /// Emit a progress event every `interval` records (minimum 1).
    pub fn with_report_interval(mut self, interval: usize) -> Self {
        self.report_interval = interval.max(1);
        self
    }

    pub fn stats(&self) -> &HarvestStats {
        &self.stats
    }

    pub fn into_stats(self) -> HarvestStats {
        self.stats
    }

    /// Distinct remote identifiers seen so far in this pass.
    pub fn records_seen(&self) -> usize {
        self.seen.len()
    }

    /// Catalog endpoints referenced by records since the last call.
    pub fn take_discovered_endpoints(&mut self) -> Vec<String> {
        std::mem::take(&mut self.discovered)
    }

    /// Processes a search stream in delivery order until it ends.
    ///
    /// Cancellation is checked before every record and page. A write already
    /// sent to the store is always awaited.
    pub async fn consume<C, R>(
        &mut self,
        client: &C,
        mut records: RecordStream,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> SearchOutcome
    where
        C: CatalogClient,
        R: ProgressReporter,
    {
        loop {
            if cancel.is_cancelled() {
                return SearchOutcome::Cancelled;
            }

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return SearchOutcome::Cancelled,
                next = records.next() => next,
            };

            match next {
                None => return SearchOutcome::Exhausted,
                Some(Err(e)) => return SearchOutcome::Truncated(e),
                Some(Ok(mut record)) => {
                    record.remote_id = client.map_identity(&record);
                    self.process(record).await;

                    let count = self.stats.processed();
                    if count % self.report_interval == 0 {
                        reporter.report(HarvestEvent::RecordsProcessed {
                            count,
                            stats: &self.stats,
                        });
                    }
                }
            }
        }
    }

    /// Reconciles one record and counts its outcome.
    pub async fn process(&mut self, record: RemoteRecord) -> RecordOutcome {
        let outcome = self.reconcile(record).await;
        self.stats.record(outcome);
        outcome
    }

    async fn reconcile(&mut self, record: RemoteRecord) -> RecordOutcome {
        let remote_id = record.remote_id.trim().to_string();
        if remote_id.is_empty() {
            let error = AppError::RecordError("record has no identifier".to_string());
            warn!(node_id = %self.config.id, error = %error, "Record skipped");
            return RecordOutcome::Failed;
        }

        if self.config.follows_links() {
            for endpoint in &record.linked_endpoints {
                if !self.discovered.contains(endpoint) {
                    self.discovered.push(endpoint.clone());
                }
            }
        }

        if !self.seen.insert(remote_id.clone()) {
            debug!(remote_id, "Record already seen in this run");
            return RecordOutcome::Unchanged;
        }

        let Some(schema) = record.schema.as_deref() else {
            debug!(remote_id, "Record schema not recognized");
            return RecordOutcome::UnknownSchema;
        };

        let resolver = IdentityResolver::new(self.store);
        let resolution = match resolver
            .resolve(&remote_id, &self.config.source_id, self.index)
            .await
        {
            Ok(Resolution::Existing { local_id, previous }) => {
                let decision = detect_change(&previous, &record);
                if !decision.needs_write {
                    debug!(remote_id, reason = decision.reason, "Record unchanged");
                    self.index
                        .insert(remote_id.as_str(), LocalRecordEntry::from_record(local_id, &record));
                    return RecordOutcome::Unchanged;
                }
                debug!(remote_id, reason = decision.reason, "Record changed");
                resolver
                    .confirm_owner(&remote_id, &self.config.source_id, local_id, previous)
                    .await
            }
            other => other,
        };
        let resolution = match resolution {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!(remote_id, error = %e, "Identity lookup failed");
                return RecordOutcome::Failed;
            }
        };

        let write = RecordWrite {
            remote_id: &remote_id,
            source_id: &self.config.source_id,
            schema,
            payload: &record.payload,
        };

        match resolution {
            Resolution::New => match self.store.create(&write).await {
                Ok(local_id) => {
                    self.index
                        .insert(remote_id.as_str(), LocalRecordEntry::from_record(local_id, &record));
                    RecordOutcome::Added
                }
                Err(e) => store_failure(&remote_id, "create", e),
            },
            Resolution::Existing { local_id, .. } => {
                match self.store.update(&local_id, &write).await {
                    Ok(()) => {
                        self.index
                            .insert(remote_id.as_str(), LocalRecordEntry::from_record(local_id, &record));
                        RecordOutcome::Updated
                    }
                    Err(e) => store_failure(&remote_id, "update", e),
                }
            }
            Resolution::OwnedByOtherSource { local_id, owner } => {
                if self.config.reject_duplicate_resource {
                    debug!(remote_id, owner, "Record owned by another source, skipped");
                    self.index.remove(&remote_id);
                    return RecordOutcome::DuplicateSkipped;
                }
                match self.store.update(&local_id, &write).await {
                    Ok(()) => {
                        debug!(remote_id, previous_owner = owner, "Record ownership moved");
                        self.index
                            .insert(remote_id.as_str(), LocalRecordEntry::from_record(local_id, &record));
                        RecordOutcome::Updated
                    }
                    Err(e) => store_failure(&remote_id, "update", e),
                }
            }
        }
    }

    /// Deletes records this source imported earlier that were not seen in
    /// this pass.
    ///
    /// Only meaningful after a complete pass. Each candidate's ownership is
    /// checked first: a record another source has taken over is dropped from
    /// the index and left in the store.
    pub async fn remove_unseen<R: ProgressReporter>(
        &mut self,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> RemovalOutcome {
        let mut candidates: Vec<String> = self
            .index
            .iter()
            .filter(|(remote_id, _)| !self.seen.contains(remote_id.as_str()))
            .map(|(remote_id, _)| remote_id.clone())
            .collect();
        if candidates.is_empty() {
            return RemovalOutcome::Finished;
        }
        candidates.sort();
        reporter.report(HarvestEvent::RemovalStarted {
            candidates: candidates.len(),
        });

        for remote_id in candidates {
            if cancel.is_cancelled() {
                return RemovalOutcome::Cancelled;
            }

            let local_id = match self.store.find_by_remote_id(&remote_id).await {
                Ok(Some(stored)) if stored.source_id == self.config.source_id => stored.local_id,
                Ok(Some(stored)) => {
                    debug!(remote_id, owner = %stored.source_id, "Record now owned elsewhere, not removed");
                    self.index.remove(&remote_id);
                    continue;
                }
                Ok(None) => {
                    debug!(remote_id, "Record already gone from the store");
                    self.index.remove(&remote_id);
                    continue;
                }
                Err(e) => {
                    warn!(remote_id, error = %e, "Ownership check before removal failed");
                    self.stats.record(RecordOutcome::Failed);
                    continue;
                }
            };

            match self.store.remove(&local_id).await {
                Ok(()) => {
                    self.index.remove(&remote_id);
                    self.stats.record(RecordOutcome::Removed);
                }
                Err(e) => {
                    warn!(remote_id, local_id, error = %e, "Removal failed");
                    self.stats.record(RecordOutcome::Failed);
                }
            }
        }

        RemovalOutcome::Finished
    }
}

fn store_failure(remote_id: &str, operation: &str, error: AppError) -> RecordOutcome {
    if error.is_unknown_schema() {
        debug!(remote_id, operation, error = %error, "Store rejected record schema");
        RecordOutcome::UnknownSchema
    } else {
        warn!(remote_id, operation, error = %error, "Store write failed");
        RecordOutcome::Failed
    }
}
