//! Harvest service: one run of one harvester node.
//!
//! # Architecture
//!
//! The [`HarvestService`] is generic over two traits:
//! - [`CatalogClientFactory`] - creates a protocol client per endpoint
//! - [`MetadataStore`] - where harvested records are written
//!
//! A [`HarvestRun`] drives the node's lifecycle
//! (`Pending → Running → Completed | Failed | Cancelled`):
//!
//! 1. Capability discovery on the root endpoint. A failure fails the run.
//! 2. Every configured search is streamed page by page through the
//!    [`ReconciliationEngine`].
//! 3. For HIERARCHY scope with hops left, catalogs linked from harvested
//!    records are visited breadth-first, each at most once per run.
//! 4. After a complete LOCAL pass, records no longer offered are removed.
//!
//! # Cancellation Support
//!
//! Cancellation is cooperative and checked before every page and every
//! record. Writes already sent to the store stay applied. A cancelled run
//! never removes records.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::config::HarvestSettings;
use crate::error::AppError;
use crate::models::LocalRecordIndex;
use crate::node::{HarvesterConfig, QueryScope};
use crate::pager::{SearchSpec, search_records};
use crate::progress::{HarvestEvent, ProgressReporter};
use crate::reconcile::{ReconciliationEngine, RemovalOutcome, SearchOutcome};
use crate::run::RunStatus;
use crate::sync::HarvestResult;
use crate::traits::{CatalogClient, CatalogClientFactory, MetadataStore};

/// Runs harvests against remote catalogs.
///
/// # Example
///
/// ```ignore
/// use geoharvest_core::{HarvestService, SilentReporter};
///
/// let service = HarvestService::new(csw_factory, repo);
/// let mut index = index_store.load_index(&config.id).await?;
/// let result = service
///     .run_node(config, &mut index, &CancellationToken::new(), &SilentReporter)
///     .await;
/// println!("{} added, {} updated", result.stats.added, result.stats.updated);
/// ```
#[derive(Clone)]
pub struct HarvestService<F, S>
where
    F: CatalogClientFactory,
    S: MetadataStore,
{
    factory: F,
    store: S,
    settings: HarvestSettings,
}

impl<F, S> HarvestService<F, S>
where
    F: CatalogClientFactory,
    S: MetadataStore,
{
    /// Creates a harvest service with default settings.
    pub fn new(factory: F, store: S) -> Self {
        Self::with_settings(factory, store, HarvestSettings::default())
    }

    pub fn with_settings(factory: F, store: S, settings: HarvestSettings) -> Self {
        Self {
            factory,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &HarvestSettings {
        &self.settings
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Runs one harvest of `config` to a terminal state.
    ///
    /// `index` is the node's local record index. It is updated in place as
    /// records are reconciled and should be persisted by the caller whatever
    /// the outcome.
    pub async fn run_node<R: ProgressReporter>(
        &self,
        config: Arc<HarvesterConfig>,
        index: &mut LocalRecordIndex,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> HarvestResult {
        HarvestRun::new(config, cancel.clone())
            .execute(self, index, reporter)
            .await
    }

    /// Creates a client for `endpoint` and discovers its capabilities.
    async fn connect<R: ProgressReporter>(
        &self,
        endpoint: &str,
        reporter: &R,
    ) -> Result<F::Client, AppError> {
        let client = self.factory.create(endpoint)?;
        let info = client.get_capabilities().await?;
        reporter.report(HarvestEvent::CapabilitiesDiscovered {
            endpoint: client.endpoint(),
            info: &info,
        });
        Ok(client)
    }
}

// =============================================================================
// Harvest Run
// =============================================================================

/// How the traversal loop ended.
enum Traversal {
    Finished,
    Cancelled,
    Failed(AppError),
}

/// A single execution of a harvester node.
///
/// Holds the config snapshot it was started with; edits committed while the
/// run is in progress apply to the next run.
pub struct HarvestRun {
    config: Arc<HarvesterConfig>,
    cancel: CancellationToken,
    status: RunStatus,
    started_at: DateTime<Utc>,
}

impl HarvestRun {
    pub fn new(config: Arc<HarvesterConfig>, cancel: CancellationToken) -> Self {
        Self {
            config,
            cancel,
            status: RunStatus::Pending,
            started_at: Utc::now(),
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn config(&self) -> &HarvesterConfig {
        &self.config
    }

    /// Drives the run to a terminal state and returns its result.
    pub async fn execute<F, S, R>(
        mut self,
        service: &HarvestService<F, S>,
        index: &mut LocalRecordIndex,
        reporter: &R,
    ) -> HarvestResult
    where
        F: CatalogClientFactory,
        S: MetadataStore,
        R: ProgressReporter,
    {
        let config = Arc::clone(&self.config);

        if self.cancel.is_cancelled() {
            self.advance(RunStatus::Cancelled);
            return self.finish_empty(None, reporter);
        }

        self.advance(RunStatus::Running);
        reporter.report(HarvestEvent::RunStarted {
            node_id: &config.id,
            endpoint: config.endpoint.as_str(),
        });

        let root = match service.connect(config.endpoint.as_str(), reporter).await {
            Ok(client) => client,
            Err(e) => {
                warn!(node_id = %config.id, error = %e, "Capability discovery failed");
                self.advance(RunStatus::Failed);
                return self.finish_empty(Some(e.to_string()), reporter);
            }
        };

        let mut engine = ReconciliationEngine::new(&service.store, &config, index)
            .with_report_interval(service.settings.report_interval);
        let mut tally = Tally::default();

        let traversal = self
            .traverse(service, root, &mut engine, &mut tally, reporter)
            .await;

        let status = match traversal {
            Traversal::Failed(e) => {
                tally.last_error = Some(e.to_string());
                RunStatus::Failed
            }
            Traversal::Cancelled => RunStatus::Cancelled,
            Traversal::Finished => {
                if self.removal_allowed(service, &tally) {
                    match engine.remove_unseen(&self.cancel, reporter).await {
                        RemovalOutcome::Finished => RunStatus::Completed,
                        RemovalOutcome::Cancelled => RunStatus::Cancelled,
                    }
                } else {
                    RunStatus::Completed
                }
            }
        };
        self.advance(status);

        let result = HarvestResult {
            node_id: config.id.clone(),
            status: self.status,
            stats: engine.into_stats(),
            error: tally.last_error,
            started_at: self.started_at,
            finished_at: Utc::now(),
            searches_truncated: tally.searches_truncated,
            endpoints_visited: tally.endpoints_visited,
        };
        reporter.report(HarvestEvent::RunFinished { result: &result });
        result
    }

    /// Visits the root endpoint, then linked catalogs breadth-first.
    async fn traverse<F, S, R>(
        &self,
        service: &HarvestService<F, S>,
        root: F::Client,
        engine: &mut ReconciliationEngine<'_, S>,
        tally: &mut Tally,
        reporter: &R,
    ) -> Traversal
    where
        F: CatalogClientFactory,
        S: MetadataStore,
        R: ProgressReporter,
    {
        let config = &self.config;
        let searches = config.effective_searches();
        let mut visited = HashSet::from([normalize_endpoint(&config.endpoint)]);
        let mut queue = VecDeque::from([(root, 0u32)]);

        while let Some((client, depth)) = queue.pop_front() {
            tally.endpoints_visited += 1;

            for (position, criteria) in searches.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    return Traversal::Cancelled;
                }
                reporter.report(HarvestEvent::SearchStarted {
                    endpoint: client.endpoint(),
                    index: position,
                    total: searches.len(),
                    depth,
                });

                let spec = SearchSpec {
                    criteria: criteria.clone(),
                    scope: config.query_scope,
                    hop_count: config.hop_count.saturating_sub(depth),
                    page_size: service.settings.page_size,
                };
                let records = search_records(client.clone(), spec);

                match engine.consume(&client, records, &self.cancel, reporter).await {
                    SearchOutcome::Exhausted => {}
                    SearchOutcome::Cancelled => return Traversal::Cancelled,
                    SearchOutcome::Truncated(e) => {
                        if depth == 0 && engine.stats().processed() == 0 && e.is_run_fatal() {
                            warn!(node_id = %config.id, error = %e, "Search failed before any record");
                            return Traversal::Failed(e);
                        }
                        let message = e.to_string();
                        reporter.report(HarvestEvent::SearchTruncated {
                            endpoint: client.endpoint(),
                            error: &message,
                        });
                        tally.truncate(message);
                    }
                }
            }

            let discovered = engine.take_discovered_endpoints();
            if !config.follows_links() || depth >= config.hop_count {
                continue;
            }

            for endpoint in discovered {
                let url = match Url::parse(&endpoint) {
                    Ok(url) => url,
                    Err(e) => {
                        debug!(endpoint, error = %e, "Ignoring malformed linked endpoint");
                        continue;
                    }
                };
                if !visited.insert(normalize_endpoint(&url)) {
                    continue;
                }
                if self.cancel.is_cancelled() {
                    return Traversal::Cancelled;
                }

                match service.connect(url.as_str(), reporter).await {
                    Ok(child) => {
                        reporter.report(HarvestEvent::EndpointDiscovered {
                            endpoint: child.endpoint(),
                            depth: depth + 1,
                        });
                        queue.push_back((child, depth + 1));
                    }
                    Err(e) => {
                        let message = format!("{}: {}", url, e);
                        reporter.report(HarvestEvent::SearchTruncated {
                            endpoint: url.as_str(),
                            error: &message,
                        });
                        tally.truncate(message);
                    }
                }
            }
        }

        Traversal::Finished
    }

    /// Removal needs a complete, untruncated pass over a LOCAL-scope node.
    fn removal_allowed<F, S>(&self, service: &HarvestService<F, S>, tally: &Tally) -> bool
    where
        F: CatalogClientFactory,
        S: MetadataStore,
    {
        service.settings.remove_unseen
            && self.config.query_scope == QueryScope::Local
            && tally.searches_truncated == 0
            && !self.cancel.is_cancelled()
    }

    fn advance(&mut self, next: RunStatus) {
        if let Err(e) = self.status.transition(next) {
            warn!(node_id = %self.config.id, error = %e, "Ignoring invalid run transition");
        }
    }

    fn finish_empty<R: ProgressReporter>(&self, error: Option<String>, reporter: &R) -> HarvestResult {
        let result = HarvestResult::empty(&self.config.id, self.status, error, self.started_at);
        reporter.report(HarvestEvent::RunFinished { result: &result });
        result
    }
}

#[derive(Default)]
struct Tally {
    searches_truncated: usize,
    endpoints_visited: usize,
    last_error: Option<String>,
}

impl Tally {
    fn truncate(&mut self, error: String) {
        self.searches_truncated += 1;
        self.last_error = Some(error);
    }
}

/// Canonical form used to detect revisited endpoints: scheme, lower-case
/// host, port, and path without a trailing slash. Query and fragment are
/// ignored.
pub fn normalize_endpoint(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_lowercase();
    let port = url
        .port_or_known_default()
        .map(|p| format!(":{}", p))
        .unwrap_or_default();
    format!(
        "{}://{}{}{}",
        url.scheme(),
        host,
        port,
        url.path().trim_end_matches('/')
    )
}
