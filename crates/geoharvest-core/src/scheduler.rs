//! Scheduler and supervisor for harvester nodes.
//!
//! # Architecture
//!
//! ```text
//! trigger(node) ──claim──> active runs (one per node)
//!                 spawn ──> load index → HarvestRun → save index → record result
//!                            └── release claim, signal done
//! schedule(node, every) ──> interval task calling trigger on every tick
//! ```
//!
//! At most one run per node is active at any time. A trigger for a node that
//! is already running fails with [`AppError::AlreadyRunning`]; timer ticks
//! that hit a running node are skipped. Different nodes run in parallel on
//! their own tasks.
//!
//! # Graceful Shutdown
//!
//! Every run token is a child of the scheduler token. [`Scheduler::shutdown`]
//! stops all timers, cancels every active run and waits until each one has
//! persisted its index and result.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config_store::ConfigStore;
use crate::error::AppError;
use crate::harvest::HarvestService;
use crate::node::HarvesterConfig;
use crate::progress::TracingReporter;
use crate::run::RunStatus;
use crate::sync::HarvestResult;
use crate::traits::{
    CatalogClientFactory, IndexStore, MetadataStore, ResultStore, SourceRegistry,
};

type ActiveRuns = Arc<Mutex<HashMap<String, ActiveRun>>>;

struct ActiveRun {
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

/// Claim on a node held by its run task. Dropping it releases the node and
/// wakes anyone waiting for the run, even if the task panicked.
struct RunSlot {
    active: ActiveRuns,
    node_id: String,
    done: watch::Sender<bool>,
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.node_id);
        }
        let _ = self.done.send(true);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, AppError> {
    mutex
        .lock()
        .map_err(|_| AppError::Generic("scheduler lock poisoned".to_string()))
}

/// Handle to a dispatched run.
pub struct RunHandle {
    node_id: String,
    cancel: CancellationToken,
    join: JoinHandle<HarvestResult>,
}

impl RunHandle {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Requests cooperative cancellation of the run.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the run to reach a terminal state.
    pub async fn wait(self) -> Result<HarvestResult, AppError> {
        self.join.await.map_err(|e| {
            AppError::Generic(format!("harvest task for '{}' failed: {}", self.node_id, e))
        })
    }
}

struct Inner<F, S, R, I, P>
where
    F: CatalogClientFactory,
    S: MetadataStore,
    R: SourceRegistry,
    I: IndexStore,
    P: ResultStore,
{
    service: HarvestService<F, S>,
    nodes: ConfigStore<R>,
    indexes: I,
    results: P,
    active: ActiveRuns,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl<F, S, R, I, P> Inner<F, S, R, I, P>
where
    F: CatalogClientFactory,
    S: MetadataStore,
    R: SourceRegistry,
    I: IndexStore,
    P: ResultStore,
{
    #[instrument(skip(self, config, cancel), fields(node_id = %config.id))]
    async fn run(&self, config: Arc<HarvesterConfig>, cancel: CancellationToken) -> HarvestResult {
        let started_at = Utc::now();
        let mut index = match self.indexes.load_index(&config.id).await {
            Ok(index) => index,
            Err(e) => {
                error!(error = %e, "Failed to load local record index");
                let result = HarvestResult::empty(
                    &config.id,
                    RunStatus::Failed,
                    Some(e.to_string()),
                    started_at,
                );
                self.persist_result(&result).await;
                return result;
            }
        };

        let result = self
            .service
            .run_node(Arc::clone(&config), &mut index, &cancel, &TracingReporter)
            .await;

        if let Err(e) = self.indexes.save_index(&config.id, &index).await {
            error!(error = %e, entries = index.len(), "Failed to save local record index");
        }
        self.persist_result(&result).await;

        result
    }

    async fn persist_result(&self, result: &HarvestResult) {
        if let Err(e) = self.results.record_result(result).await {
            error!(node_id = %result.node_id, error = %e, "Failed to persist harvest result");
        }
    }
}

/// Dispatches harvest runs and keeps per-node timers.
pub struct Scheduler<F, S, R, I, P>
where
    F: CatalogClientFactory,
    S: MetadataStore,
    R: SourceRegistry,
    I: IndexStore,
    P: ResultStore,
{
    inner: Arc<Inner<F, S, R, I, P>>,
}

impl<F, S, R, I, P> Clone for Scheduler<F, S, R, I, P>
where
    F: CatalogClientFactory,
    S: MetadataStore,
    R: SourceRegistry,
    I: IndexStore,
    P: ResultStore,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F, S, R, I, P> Scheduler<F, S, R, I, P>
where
    F: CatalogClientFactory + 'static,
    S: MetadataStore + 'static,
    R: SourceRegistry + 'static,
    I: IndexStore + 'static,
    P: ResultStore + 'static,
{
    pub fn new(service: HarvestService<F, S>, nodes: ConfigStore<R>, indexes: I, results: P) -> Self {
        Self {
            inner: Arc::new(Inner {
                service,
                nodes,
                indexes,
                results,
                active: Arc::new(Mutex::new(HashMap::new())),
                timers: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config_store(&self) -> &ConfigStore<R> {
        &self.inner.nodes
    }

    /// Starts a run of `node_id` on its own task.
    ///
    /// The node is claimed before this returns, so a second trigger fails
    /// with [`AppError::AlreadyRunning`] until the run has finished.
    pub fn trigger(&self, node_id: &str) -> Result<RunHandle, AppError> {
        let config = self.inner.nodes.get(node_id)?;
        if self.inner.shutdown.is_cancelled() {
            return Err(AppError::Generic("scheduler is shut down".to_string()));
        }

        let cancel = self.inner.shutdown.child_token();
        let (done_tx, done_rx) = watch::channel(false);
        {
            let mut active = lock(&self.inner.active)?;
            if active.contains_key(&config.id) {
                return Err(AppError::AlreadyRunning(config.id.clone()));
            }
            // Checked under the claim lock so `remove_node` sees either the
            // claim or the missing node.
            self.inner.nodes.get(&config.id)?;
            active.insert(
                config.id.clone(),
                ActiveRun {
                    cancel: cancel.clone(),
                    done: done_rx,
                },
            );
        }

        let slot = RunSlot {
            active: Arc::clone(&self.inner.active),
            node_id: config.id.clone(),
            done: done_tx,
        };
        let inner = Arc::clone(&self.inner);
        let run_cancel = cancel.clone();
        let node_id = config.id.clone();

        debug!(node_id = %node_id, version = config.version, "Dispatching harvest run");
        let join = tokio::spawn(async move {
            let result = inner.run(config, run_cancel).await;
            drop(slot);
            result
        });

        Ok(RunHandle {
            node_id,
            cancel,
            join,
        })
    }

    /// Cancels the active run of a node. Returns false if none is active.
    pub fn cancel(&self, node_id: &str) -> bool {
        match lock(&self.inner.active) {
            Ok(active) => match active.get(node_id) {
                Some(run) => {
                    run.cancel.cancel();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    pub fn is_running(&self, node_id: &str) -> bool {
        lock(&self.inner.active).is_ok_and(|active| active.contains_key(node_id))
    }

    /// Ids of nodes with an active run, sorted.
    pub fn active_nodes(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.inner.active)
            .map(|active| active.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Harvests `node_id` every `every`, starting immediately.
    ///
    /// Replaces an existing timer for the node. A tick that finds the node
    /// still running is skipped.
    pub fn schedule(&self, node_id: &str, every: Duration) -> Result<(), AppError> {
        let config = self.inner.nodes.get(node_id)?;
        if every.is_zero() {
            return Err(AppError::ConfigValidation(
                "schedule interval must be greater than zero".to_string(),
            ));
        }

        let timer = tokio::spawn(tick_loop(
            Arc::downgrade(&self.inner),
            self.inner.shutdown.clone(),
            config.id.clone(),
            every,
        ));
        if let Some(previous) = lock(&self.inner.timers)?.insert(config.id.clone(), timer) {
            previous.abort();
        }
        info!(node_id = %config.id, every_secs = every.as_secs(), "Harvest scheduled");

        Ok(())
    }

    /// Stops the timer of a node. Returns false if none was set.
    pub fn unschedule(&self, node_id: &str) -> bool {
        let timer = lock(&self.inner.timers)
            .ok()
            .and_then(|mut timers| timers.remove(node_id));
        match timer {
            Some(timer) => {
                timer.abort();
                true
            }
            None => false,
        }
    }

    /// Schedules every registered node that has an interval. Returns how
    /// many timers were started.
    pub fn start(&self) -> Result<usize, AppError> {
        let mut scheduled = 0;
        for config in self.inner.nodes.list()? {
            if let Some(every) = config.every {
                self.schedule(&config.id, every)?;
                scheduled += 1;
            }
        }
        Ok(scheduled)
    }

    /// Removes a node for good.
    ///
    /// Stops its timer, drops it from the config store so no new run can
    /// start, cancels and awaits its active run, then discards its local
    /// record index.
    #[instrument(skip(self))]
    pub async fn remove_node(&self, node_id: &str) -> Result<(), AppError> {
        self.unschedule(node_id);
        self.inner.nodes.remove(node_id)?;

        let active = lock(&self.inner.active)?
            .get(node_id)
            .map(|run| (run.cancel.clone(), run.done.clone()));
        if let Some((cancel, done)) = active {
            cancel.cancel();
            wait_done(done).await;
        }

        self.inner.indexes.discard_index(node_id).await?;
        info!("Harvester node removed");

        Ok(())
    }

    pub async fn last_result(&self, node_id: &str) -> Result<Option<HarvestResult>, AppError> {
        self.inner.results.last_result(node_id).await
    }

    /// Stops all timers, cancels every active run and waits for them.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        if let Ok(mut timers) = lock(&self.inner.timers) {
            for (_, timer) in timers.drain() {
                timer.abort();
            }
        }

        let pending: Vec<watch::Receiver<bool>> = lock(&self.inner.active)
            .map(|active| active.values().map(|run| run.done.clone()).collect())
            .unwrap_or_default();
        info!(active_runs = pending.len(), "Scheduler shutting down");

        for done in pending {
            wait_done(done).await;
        }
    }
}

async fn wait_done(mut done: watch::Receiver<bool>) {
    // A closed channel means the run task is gone as well.
    let _ = done.wait_for(|finished| *finished).await;
}

async fn tick_loop<F, S, R, I, P>(
    inner: Weak<Inner<F, S, R, I, P>>,
    shutdown: CancellationToken,
    node_id: String,
    every: Duration,
) where
    F: CatalogClientFactory + 'static,
    S: MetadataStore + 'static,
    R: SourceRegistry + 'static,
    I: IndexStore + 'static,
    P: ResultStore + 'static,
{
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };
        match (Scheduler { inner }).trigger(&node_id) {
            Ok(_) => debug!(node_id = %node_id, "Scheduled harvest dispatched"),
            Err(AppError::AlreadyRunning(_)) => {
                info!(node_id = %node_id, "Previous run still active, tick skipped");
            }
            Err(AppError::NodeNotFound(_)) => {
                warn!(node_id = %node_id, "Scheduled node no longer exists, timer stopped");
                break;
            }
            Err(e) => warn!(node_id = %node_id, error = %e, "Scheduled harvest not dispatched"),
        }
    }
}
