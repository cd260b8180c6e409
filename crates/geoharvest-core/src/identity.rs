//! Maps remote records to local identities.

use tracing::debug;

use crate::error::AppError;
use crate::models::{LocalRecordEntry, LocalRecordIndex};
use crate::traits::MetadataStore;

/// Where a remote record stands locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Not known locally.
    New,
    /// Imported earlier by this source.
    Existing {
        local_id: String,
        previous: LocalRecordEntry,
    },
    /// Present locally but owned by a different source.
    OwnedByOtherSource { local_id: String, owner: String },
}

/// Resolves remote identifiers for one source.
///
/// The node's own index is consulted first. A miss falls back to a store
/// lookup by remote identifier, which catches records owned by other sources
/// and records whose index entry was lost.
pub struct IdentityResolver<'a, S: MetadataStore> {
    store: &'a S,
}

impl<'a, S: MetadataStore> IdentityResolver<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn resolve(
        &self,
        remote_id: &str,
        source_id: &str,
        index: &LocalRecordIndex,
    ) -> Result<Resolution, AppError> {
        if let Some(entry) = index.get(remote_id) {
            return Ok(Resolution::Existing {
                local_id: entry.local_id.clone(),
                previous: entry.clone(),
            });
        }

        match self.store.find_by_remote_id(remote_id).await? {
            None => Ok(Resolution::New),
            Some(stored) if stored.source_id == source_id => Ok(Resolution::Existing {
                previous: LocalRecordEntry {
                    local_id: stored.local_id.clone(),
                    fingerprint: None,
                    modified: None,
                },
                local_id: stored.local_id,
            }),
            Some(stored) => Ok(Resolution::OwnedByOtherSource {
                local_id: stored.local_id,
                owner: stored.source_id,
            }),
        }
    }

    /// Re-reads the current owner of a record about to be overwritten.
    ///
    /// An index entry only says this source owned the record when the index
    /// was saved. Another source may have taken it over since, or the record
    /// may have been deleted from the store.
    pub async fn confirm_owner(
        &self,
        remote_id: &str,
        source_id: &str,
        local_id: String,
        previous: LocalRecordEntry,
    ) -> Result<Resolution, AppError> {
        match self.store.find_by_remote_id(remote_id).await? {
            None => Ok(Resolution::New),
            Some(stored) if stored.source_id == source_id => {
                if stored.local_id != local_id {
                    debug!(
                        remote_id,
                        indexed = %local_id,
                        stored = %stored.local_id,
                        "Index entry points at a stale local id"
                    );
                }
                Ok(Resolution::Existing {
                    local_id: stored.local_id,
                    previous,
                })
            }
            Some(stored) => Ok(Resolution::OwnedByOtherSource {
                local_id: stored.local_id,
                owner: stored.source_id,
            }),
        }
    }
}
