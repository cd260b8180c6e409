//! Test utilities and mock implementations for integration tests.
//!
//! Provides mock implementations of the core traits for testing
//! `HarvestService`, `ConfigStore` and `Scheduler` in isolation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use geoharvest_core::models::{PageRequest, RecordWrite, StoredRecordRef};
use geoharvest_core::traits::{
    CatalogClient, CatalogClientFactory, MetadataStore, SourceRegistry,
};
use geoharvest_core::{
    AppError, CapabilitiesInfo, ConfigStore, HarvesterConfig, HarvesterDraft, LocalRecordEntry,
    LocalRecordIndex, RemoteRecord, SearchCriteria, SearchPage,
};
use tokio_util::sync::CancellationToken;

pub const ROOT: &str = "https://root.example.com/csw";

/// Builds a record with the ISO 19139 schema tag.
pub fn record(id: &str, payload: &str) -> RemoteRecord {
    RemoteRecord::new(id, Some("iso19139".to_string()), None, payload)
}

/// Records `prefix-0 .. prefix-{n-1}` with payload `<md id="..."/>`.
pub fn records(prefix: &str, n: usize) -> Vec<RemoteRecord> {
    (0..n)
        .map(|i| {
            let id = format!("{}-{}", prefix, i);
            record(&id, &format!("<md id=\"{}\"/>", id))
        })
        .collect()
}

// =============================================================================
// MockCatalog
// =============================================================================

/// What one mock endpoint serves.
#[derive(Clone, Default)]
pub struct EndpointScript {
    pub records: Vec<RemoteRecord>,
    pub capabilities_fail: bool,
    /// Page start position that fails with `Unreachable`.
    pub fail_at: Option<u32>,
    /// Delay before every page response.
    pub delay: Option<Duration>,
}

impl EndpointScript {
    pub fn serving(records: Vec<RemoteRecord>) -> Self {
        Self {
            records,
            ..Default::default()
        }
    }
}

/// A page request as seen by the mock.
#[derive(Debug, Clone)]
pub struct LoggedRequest {
    pub endpoint: String,
    pub start_position: u32,
    pub hop_count: u32,
    pub criteria: SearchCriteria,
}

/// Shared state of every mock catalog endpoint.
#[derive(Clone, Default)]
pub struct MockCatalog {
    endpoints: Arc<Mutex<HashMap<String, EndpointScript>>>,
    requests: Arc<Mutex<Vec<LoggedRequest>>>,
}

impl MockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(self, endpoint: &str, script: EndpointScript) -> Self {
        self.set_endpoint(endpoint, script);
        self
    }

    pub fn set_endpoint(&self, endpoint: &str, script: EndpointScript) {
        self.endpoints
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), script);
    }

    pub fn requests(&self) -> Vec<LoggedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requested_endpoints(&self) -> Vec<String> {
        let mut endpoints: Vec<String> = Vec::new();
        for request in self.requests() {
            if !endpoints.contains(&request.endpoint) {
                endpoints.push(request.endpoint);
            }
        }
        endpoints
    }

    fn script(&self, endpoint: &str) -> Option<EndpointScript> {
        self.endpoints.lock().unwrap().get(endpoint).cloned()
    }

    pub fn factory(&self) -> MockCatalogFactory {
        MockCatalogFactory {
            catalog: self.clone(),
        }
    }
}

/// Mock CSW client backed by a [`MockCatalog`].
#[derive(Clone)]
pub struct MockCatalogClient {
    endpoint: String,
    catalog: MockCatalog,
}

impl CatalogClient for MockCatalogClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn get_capabilities(&self) -> Result<CapabilitiesInfo, AppError> {
        match self.catalog.script(&self.endpoint) {
            Some(script) if !script.capabilities_fail => Ok(CapabilitiesInfo {
                title: Some(format!("Mock catalog at {}", self.endpoint)),
                version: Some("2.0.2".to_string()),
                ..Default::default()
            }),
            _ => Err(AppError::Unreachable(self.endpoint.clone())),
        }
    }

    async fn get_records(&self, request: &PageRequest<'_>) -> Result<SearchPage, AppError> {
        let script = self
            .catalog
            .script(&self.endpoint)
            .ok_or_else(|| AppError::Unreachable(self.endpoint.clone()))?;
        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }

        self.catalog.requests.lock().unwrap().push(LoggedRequest {
            endpoint: self.endpoint.clone(),
            start_position: request.start_position,
            hop_count: request.hop_count,
            criteria: request.criteria.clone(),
        });

        if script.fail_at == Some(request.start_position) {
            return Err(AppError::Unreachable(format!(
                "{} dropped the connection",
                self.endpoint
            )));
        }

        let total = script.records.len() as u32;
        let first = (request.start_position - 1) as usize;
        let page: Vec<RemoteRecord> = script
            .records
            .iter()
            .skip(first)
            .take(request.max_records as usize)
            .cloned()
            .collect();
        let after = request.start_position + page.len() as u32;

        Ok(SearchPage {
            matched: total,
            returned: page.len() as u32,
            next_record: Some(if after > total { 0 } else { after }),
            records: page,
        })
    }
}

/// Factory handing out clients for any endpoint; unknown endpoints fail
/// capability discovery.
#[derive(Clone)]
pub struct MockCatalogFactory {
    catalog: MockCatalog,
}

impl CatalogClientFactory for MockCatalogFactory {
    type Client = MockCatalogClient;

    fn create(&self, endpoint: &str) -> Result<Self::Client, AppError> {
        Ok(MockCatalogClient {
            endpoint: endpoint.to_string(),
            catalog: self.catalog.clone(),
        })
    }
}

// =============================================================================
// MockMetadataStore
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub local_id: String,
    pub source_id: String,
    pub schema: String,
    pub payload: String,
}

/// In-memory metadata store keyed by remote identifier.
#[derive(Clone, Default)]
pub struct MockMetadataStore {
    records: Arc<Mutex<HashMap<String, StoredRecord>>>,
    next_id: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
    creates: Arc<AtomicUsize>,
    cancel_after_creates: Option<(usize, CancellationToken)>,
}

impl MockMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels `token` once `creates` records have been created.
    pub fn cancelling_after(creates: usize, token: CancellationToken) -> Self {
        Self {
            cancel_after_creates: Some((creates, token)),
            ..Default::default()
        }
    }

    /// Puts a record in the store and returns its local id.
    pub fn seed(&self, remote_id: &str, source_id: &str, payload: &str) -> String {
        let local_id = format!("seed-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.records.lock().unwrap().insert(
            remote_id.to_string(),
            StoredRecord {
                local_id: local_id.clone(),
                source_id: source_id.to_string(),
                schema: "iso19139".to_string(),
                payload: payload.to_string(),
            },
        );
        local_id
    }

    pub fn get(&self, remote_id: &str) -> Option<StoredRecord> {
        self.records.lock().unwrap().get(remote_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// Number of create, update and remove calls that succeeded.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl MetadataStore for MockMetadataStore {
    async fn create(&self, record: &RecordWrite<'_>) -> Result<String, AppError> {
        let local_id = format!("local-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.records.lock().unwrap().insert(
            record.remote_id.to_string(),
            StoredRecord {
                local_id: local_id.clone(),
                source_id: record.source_id.to_string(),
                schema: record.schema.to_string(),
                payload: record.payload.to_string(),
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        let created = self.creates.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some((limit, token)) = &self.cancel_after_creates {
            if created >= *limit {
                token.cancel();
            }
        }
        Ok(local_id)
    }

    async fn update(&self, local_id: &str, record: &RecordWrite<'_>) -> Result<(), AppError> {
        let mut records = self.records.lock().unwrap();
        let stored = records
            .values_mut()
            .find(|r| r.local_id == local_id)
            .ok_or_else(|| AppError::StoreError(format!("no record {}", local_id)))?;
        stored.source_id = record.source_id.to_string();
        stored.schema = record.schema.to_string();
        stored.payload = record.payload.to_string();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, local_id: &str) -> Result<(), AppError> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|_, r| r.local_id != local_id);
        if records.len() == before {
            return Err(AppError::StoreError(format!("no record {}", local_id)));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn find_by_remote_id(&self, remote_id: &str) -> Result<Option<StoredRecordRef>, AppError> {
        Ok(self.get(remote_id).map(|r| StoredRecordRef {
            local_id: r.local_id,
            source_id: r.source_id,
        }))
    }
}

// =============================================================================
// MockSourceRegistry
// =============================================================================

#[derive(Clone, Default)]
pub struct MockSourceRegistry {
    calls: Arc<Mutex<Vec<(String, String, Option<String>)>>>,
}

impl MockSourceRegistry {
    pub fn calls(&self) -> Vec<(String, String, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl SourceRegistry for MockSourceRegistry {
    async fn register_or_update_source(
        &self,
        source_id: &str,
        name: &str,
        icon: Option<&str>,
    ) -> Result<(), AppError> {
        self.calls.lock().unwrap().push((
            source_id.to_string(),
            name.to_string(),
            icon.map(str::to_string),
        ));
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Registers `draft` in a fresh config store and returns the live config.
pub async fn register(draft: HarvesterDraft) -> Arc<HarvesterConfig> {
    ConfigStore::new(MockSourceRegistry::default())
        .create(draft)
        .await
        .expect("draft should be valid")
}

/// A LOCAL node harvesting `ROOT` with a single free-text search.
pub fn water_draft(id: &str) -> HarvesterDraft {
    HarvesterDraft::new(id, format!("Node {}", id), ROOT)
        .with_search(SearchCriteria::free_text("water"))
}

/// Seeds the store and the index with `record` as if an earlier run of
/// `source_id` had imported it.
pub fn seed_known(
    store: &MockMetadataStore,
    index: &mut LocalRecordIndex,
    source_id: &str,
    record: &RemoteRecord,
) {
    let local_id = store.seed(&record.remote_id, source_id, &record.payload);
    index.insert(
        record.remote_id.as_str(),
        LocalRecordEntry::from_record(local_id, record),
    );
}
