//! Progress reporting for harvest runs.
//!
//! The harvest run emits [`HarvestEvent`]s through a [`ProgressReporter`].
//! The CLI uses [`TracingReporter`]; tests and embedders that do not care
//! use [`SilentReporter`].

use tracing::{info, warn};

use crate::models::CapabilitiesInfo;
use crate::sync::{HarvestResult, HarvestStats};

/// Events emitted during a harvest run.
#[derive(Debug, Clone)]
pub enum HarvestEvent<'a> {
    /// Run dispatched.
    RunStarted { node_id: &'a str, endpoint: &'a str },
    /// Capability discovery succeeded for an endpoint.
    CapabilitiesDiscovered {
        endpoint: &'a str,
        info: &'a CapabilitiesInfo,
    },
    /// A configured search begins against an endpoint.
    SearchStarted {
        endpoint: &'a str,
        index: usize,
        total: usize,
        depth: u32,
    },
    /// A search was cut short by a page failure.
    SearchTruncated { endpoint: &'a str, error: &'a str },
    /// A linked catalog was queued for harvesting.
    EndpointDiscovered { endpoint: &'a str, depth: u32 },
    /// Periodic progress, every `report_interval` records.
    RecordsProcessed { count: usize, stats: &'a HarvestStats },
    /// Removal detection is about to delete stale records.
    RemovalStarted { candidates: usize },
    /// Run reached a terminal state.
    RunFinished { result: &'a HarvestResult },
}

/// Trait for reporting harvest progress.
pub trait ProgressReporter: Send + Sync {
    /// Called when a harvest event occurs.
    ///
    /// The default implementation does nothing (silent mode).
    fn report(&self, event: HarvestEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that ignores all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

/// Reporter that logs events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, event: HarvestEvent<'_>) {
        match event {
            HarvestEvent::RunStarted { node_id, endpoint } => {
                info!(node_id, endpoint, "Harvest started");
            }
            HarvestEvent::CapabilitiesDiscovered { endpoint, info } => {
                info!(
                    endpoint,
                    title = info.title.as_deref().unwrap_or("untitled"),
                    version = info.version.as_deref().unwrap_or("unknown"),
                    "Catalog capabilities discovered"
                );
            }
            HarvestEvent::SearchStarted {
                endpoint,
                index,
                total,
                depth,
            } => {
                info!(endpoint, depth, "Search {}/{}", index + 1, total);
            }
            HarvestEvent::SearchTruncated { endpoint, error } => {
                warn!(endpoint, %error, "Search truncated");
            }
            HarvestEvent::EndpointDiscovered { endpoint, depth } => {
                info!(endpoint, depth, "Linked catalog queued");
            }
            HarvestEvent::RecordsProcessed { count, stats } => {
                info!(
                    count,
                    added = stats.added,
                    updated = stats.updated,
                    unchanged = stats.unchanged,
                    errors = stats.errors,
                    "Records processed"
                );
            }
            HarvestEvent::RemovalStarted { candidates } => {
                info!(candidates, "Removing records no longer offered");
            }
            HarvestEvent::RunFinished { result } => {
                let stats = &result.stats;
                info!(
                    node_id = %result.node_id,
                    status = %result.status,
                    added = stats.added,
                    updated = stats.updated,
                    removed = stats.removed,
                    unchanged = stats.unchanged,
                    duplicates_skipped = stats.duplicates_skipped,
                    errors = stats.errors,
                    unknown_schema = stats.unknown_schema,
                    "Harvest finished"
                );
                if let Some(error) = &result.error {
                    warn!(node_id = %result.node_id, %error, "Harvest reported an error");
                }
            }
        }
    }
}
