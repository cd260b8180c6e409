//! Geoharvest Core - Harvester lifecycle, reconciliation and scheduling.
//!
//! This crate provides the core functionality for geoharvest, including:
//!
//! - **Node configuration**: [`HarvesterConfig`] snapshots, [`HarvesterDraft`]
//!   edits and the copy-on-write [`ConfigStore`]
//! - **Paging**: [`search_records`] turns page requests into a lazy record stream
//! - **Reconciliation**: identity resolution, change detection and removal in
//!   [`ReconciliationEngine`]
//! - **Runs**: [`HarvestService`] / [`HarvestRun`] drive one harvest to a
//!   terminal [`RunStatus`]
//! - **Scheduling**: [`Scheduler`] with one active run per node
//! - **Traits**: [`CatalogClient`], [`MetadataStore`], [`IndexStore`] and friends
//!   for dependency injection
//!
//! # Architecture
//!
//! Business logic is decoupled from I/O through traits. The CSW client lives
//! in `geoharvest-client`, the PostgreSQL stores in `geoharvest-db`.
//!
//! # Example
//!
//! ```ignore
//! use geoharvest_core::{ConfigStore, HarvestService, HarvesterDraft, Scheduler};
//!
//! let nodes = ConfigStore::new(repo.clone());
//! nodes.create(HarvesterDraft::new("geocat", "geocat.ch", endpoint)).await?;
//!
//! let service = HarvestService::new(csw_factory, repo);
//! let scheduler = Scheduler::new(service, nodes, state.clone(), state);
//! let result = scheduler.trigger("geocat")?.wait().await?;
//! println!("{} added, {} removed", result.stats.added, result.stats.removed);
//! ```

pub mod config;
pub mod config_store;
pub mod error;
pub mod harvest;
pub mod identity;
pub mod memory;
pub mod models;
pub mod node;
pub mod pager;
pub mod progress;
pub mod reconcile;
pub mod run;
pub mod scheduler;
pub mod sync;
pub mod traits;

// Configuration
pub use config::{
    DbConfig, HarvestSettings, HarvesterEntry, HarvestersConfig, HttpConfig, default_config_path,
    load_harvesters_config,
};
pub use config_store::ConfigStore;
pub use node::{HarvesterConfig, HarvesterDraft, QueryScope, SearchCriteria};

// Error handling
pub use error::AppError;

// Domain models
pub use models::{
    CapabilitiesInfo, LocalRecordEntry, LocalRecordIndex, PageRequest, RecordWrite, RemoteRecord,
    SearchPage, StoredRecordRef,
};

// Sync types and business logic
pub use identity::{IdentityResolver, Resolution};
pub use pager::{RecordStream, SearchSpec, search_records};
pub use reconcile::{ReconciliationEngine, RemovalOutcome, SearchOutcome};
pub use run::RunStatus;
pub use sync::{ChangeDecision, HarvestResult, HarvestStats, RecordOutcome, detect_change};

// Progress reporting
pub use progress::{HarvestEvent, ProgressReporter, SilentReporter, TracingReporter};

// Traits for dependency injection
pub use traits::{
    CatalogClient, CatalogClientFactory, IndexStore, MetadataStore, ResultStore, SourceRegistry,
};

// Services
pub use harvest::{HarvestRun, HarvestService};
pub use memory::{InMemoryIndexStore, InMemoryResultStore};
pub use scheduler::{RunHandle, Scheduler};
