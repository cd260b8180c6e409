//! Records, pages and local index types exchanged between the harvester
//! components and their collaborators.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::node::{QueryScope, SearchCriteria};

// =============================================================================
// Remote side
// =============================================================================

/// Service metadata returned by capability discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitiesInfo {
    pub title: Option<String>,
    pub version: Option<String>,
    /// Endpoint advertised for GetRecords POST requests, if any.
    pub get_records_url: Option<String>,
    pub output_schemas: Vec<String>,
}

/// A record as delivered by a remote catalog.
///
/// The payload is opaque to the harvester and handed to the metadata store
/// unchanged. The fingerprint is derived from it at construction time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRecord {
    pub remote_id: String,
    /// Schema/profile tag such as `iso19139`; `None` when not recognized.
    pub schema: Option<String>,
    /// Last-modified stamp as reported by the remote catalog.
    pub modified: Option<String>,
    pub payload: String,
    pub fingerprint: String,
    /// Catalog service URLs referenced by this record.
    pub linked_endpoints: Vec<String>,
}

impl RemoteRecord {
    pub fn new(
        remote_id: impl Into<String>,
        schema: Option<String>,
        modified: Option<String>,
        payload: impl Into<String>,
    ) -> Self {
        let payload = payload.into();
        let fingerprint = Self::compute_fingerprint(&payload);
        Self {
            remote_id: remote_id.into(),
            schema,
            modified,
            payload,
            fingerprint,
            linked_endpoints: Vec::new(),
        }
    }

    pub fn with_linked_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.linked_endpoints = endpoints;
        self
    }

    /// SHA-256 hex digest of a record payload.
    pub fn compute_fingerprint(payload: &str) -> String {
        format!("{:x}", Sha256::digest(payload.as_bytes()))
    }
}

/// Parameters of a single page request.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest<'a> {
    pub criteria: &'a SearchCriteria,
    pub scope: QueryScope,
    /// Hops the remote catalog may follow when `scope` is hierarchical.
    pub hop_count: u32,
    /// 1-based position of the first record.
    pub start_position: u32,
    pub max_records: u32,
}

/// One page of search results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    /// Total number of matches reported by the server.
    pub matched: u32,
    pub returned: u32,
    /// 1-based position of the next page; `Some(0)` or `None` when the
    /// server did not say.
    pub next_record: Option<u32>,
    pub records: Vec<RemoteRecord>,
}

// =============================================================================
// Local side
// =============================================================================

/// What the harvester remembers about a record it imported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRecordEntry {
    pub local_id: String,
    /// `None` for entries recovered from the store without harvest history.
    pub fingerprint: Option<String>,
    pub modified: Option<String>,
}

impl LocalRecordEntry {
    pub fn from_record(local_id: impl Into<String>, record: &RemoteRecord) -> Self {
        Self {
            local_id: local_id.into(),
            fingerprint: Some(record.fingerprint.clone()),
            modified: record.modified.clone(),
        }
    }
}

/// Remote identifier → local entry, for a single node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRecordIndex {
    entries: HashMap<String, LocalRecordEntry>,
}

impl LocalRecordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, remote_id: &str) -> Option<&LocalRecordEntry> {
        self.entries.get(remote_id)
    }

    pub fn insert(&mut self, remote_id: impl Into<String>, entry: LocalRecordEntry) {
        self.entries.insert(remote_id.into(), entry);
    }

    pub fn remove(&mut self, remote_id: &str) -> Option<LocalRecordEntry> {
        self.entries.remove(remote_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &LocalRecordEntry)> {
        self.entries.iter()
    }

    /// Remote identifiers in sorted order.
    pub fn remote_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl FromIterator<(String, LocalRecordEntry)> for LocalRecordIndex {
    fn from_iter<T: IntoIterator<Item = (String, LocalRecordEntry)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// A create or update request for the metadata store.
#[derive(Debug, Clone, Copy)]
pub struct RecordWrite<'a> {
    pub remote_id: &'a str,
    pub source_id: &'a str,
    pub schema: &'a str,
    pub payload: &'a str,
}

/// Ownership information for a record already in the metadata store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecordRef {
    pub local_id: String,
    pub source_id: String,
}
