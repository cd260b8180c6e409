//! Trait definitions for protocol clients and external collaborators.
//!
//! The harvester core talks to the outside world only through these traits:
//!
//! - [`CatalogClient`] / [`CatalogClientFactory`]: a remote catalog protocol
//!   (discover, search one page, map identity)
//! - [`MetadataStore`]: the catalog records are persisted here
//! - [`SourceRegistry`]: provenance sources, one per harvester node
//! - [`IndexStore`]: persistence for each node's [`LocalRecordIndex`]
//! - [`ResultStore`]: the last [`HarvestResult`] per node
//!
//! # Example
//!
//! ```
//! use geoharvest_core::traits::{CatalogClient, CatalogClientFactory};
//! use geoharvest_core::AppError;
//!
//! async fn service_title<F: CatalogClientFactory>(
//!     factory: &F,
//!     endpoint: &str,
//! ) -> Result<Option<String>, AppError> {
//!     let client = factory.create(endpoint)?;
//!     Ok(client.get_capabilities().await?.title)
//! }
//! ```

use std::future::Future;

use crate::models::{
    CapabilitiesInfo, LocalRecordIndex, PageRequest, RecordWrite, RemoteRecord, SearchPage,
    StoredRecordRef,
};
use crate::sync::HarvestResult;
use crate::AppError;

/// Client for one remote catalog endpoint.
///
/// Each protocol variant supplies the capability set the harvest run needs.
/// Paging over [`get_records`](Self::get_records) is done by
/// [`crate::pager::search_records`].
pub trait CatalogClient: Send + Sync + Clone {
    /// The endpoint this client talks to.
    fn endpoint(&self) -> &str;

    /// Discovers the service metadata of the endpoint.
    fn get_capabilities(&self) -> impl Future<Output = Result<CapabilitiesInfo, AppError>> + Send;

    /// Fetches one page of search results.
    fn get_records(
        &self,
        request: &PageRequest<'_>,
    ) -> impl Future<Output = Result<SearchPage, AppError>> + Send;

    /// Maps a remote record to the identifier it is tracked under locally.
    fn map_identity(&self, record: &RemoteRecord) -> String {
        record.remote_id.clone()
    }
}

/// Factory for creating catalog clients.
///
/// Separate from CatalogClient to avoid issues with async trait constructors.
pub trait CatalogClientFactory: Send + Sync + Clone {
    /// The type of catalog client this factory creates.
    type Client: CatalogClient + 'static;

    /// Creates a new client for the given endpoint URL.
    fn create(&self, endpoint: &str) -> Result<Self::Client, AppError>;
}

/// The metadata store that harvested records are written to.
///
/// Each call is expected to be atomic on its own. The harvester never
/// groups calls into a transaction.
pub trait MetadataStore: Send + Sync + Clone {
    /// Creates a record and returns its local identifier.
    ///
    /// Fails with [`AppError::UnknownSchema`] when the schema is not
    /// supported, or [`AppError::StoreError`] for other rejections.
    fn create(
        &self,
        record: &RecordWrite<'_>,
    ) -> impl Future<Output = Result<String, AppError>> + Send;

    /// Replaces the payload of an existing record.
    ///
    /// The record's owning source becomes `record.source_id`.
    fn update(
        &self,
        local_id: &str,
        record: &RecordWrite<'_>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Deletes a record.
    fn remove(&self, local_id: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Looks a record up by its remote identifier, regardless of source.
    fn find_by_remote_id(
        &self,
        remote_id: &str,
    ) -> impl Future<Output = Result<Option<StoredRecordRef>, AppError>> + Send;
}

/// Registry of provenance sources.
pub trait SourceRegistry: Send + Sync + Clone {
    /// Creates or refreshes the source entry for a harvester node.
    fn register_or_update_source(
        &self,
        source_id: &str,
        name: &str,
        icon: Option<&str>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Persistence for per-node local record indexes.
pub trait IndexStore: Send + Sync + Clone {
    /// Loads a node's index; an unknown node yields an empty index.
    fn load_index(
        &self,
        node_id: &str,
    ) -> impl Future<Output = Result<LocalRecordIndex, AppError>> + Send;

    /// Replaces a node's stored index.
    fn save_index(
        &self,
        node_id: &str,
        index: &LocalRecordIndex,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Deletes a node's index.
    fn discard_index(&self, node_id: &str) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Persistence for the most recent harvest result of each node.
pub trait ResultStore: Send + Sync + Clone {
    fn record_result(
        &self,
        result: &HarvestResult,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn last_result(
        &self,
        node_id: &str,
    ) -> impl Future<Output = Result<Option<HarvestResult>, AppError>> + Send;
}
