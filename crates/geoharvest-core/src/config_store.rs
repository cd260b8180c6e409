//! Live harvester node configurations.
//!
//! The store hands out `Arc<HarvesterConfig>` snapshots. An update is a
//! copy-edit-commit cycle: [`ConfigStore::copy_for_update`] returns a draft,
//! the caller edits it, and [`ConfigStore::commit`] validates it and swaps the
//! snapshot in a single step. Runs that already hold the old snapshot keep
//! it until they finish.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::node::{HarvesterConfig, HarvesterDraft};
use crate::traits::SourceRegistry;

type NodeMap = HashMap<String, Arc<HarvesterConfig>>;

/// Registry of harvester nodes keyed by node id.
#[derive(Clone)]
pub struct ConfigStore<R: SourceRegistry> {
    nodes: Arc<RwLock<NodeMap>>,
    registry: R,
}

impl<R: SourceRegistry> ConfigStore<R> {
    pub fn new(registry: R) -> Self {
        Self {
            nodes: Arc::new(RwLock::new(HashMap::new())),
            registry,
        }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Registers a new node.
    ///
    /// A fresh source id is assigned when the draft has none. The provenance
    /// source is registered before the node becomes visible.
    pub async fn create(&self, mut draft: HarvesterDraft) -> Result<Arc<HarvesterConfig>, AppError> {
        if self.read()?.contains_key(draft.id.trim()) {
            return Err(AppError::DuplicateNode(draft.id));
        }
        if draft.source_id.is_none() {
            draft.source_id = Some(Uuid::new_v4().to_string());
        }

        let config = Arc::new(draft.validate()?);
        self.register_source(&config).await?;

        let mut nodes = self.write()?;
        if nodes.contains_key(&config.id) {
            return Err(AppError::DuplicateNode(config.id.clone()));
        }
        nodes.insert(config.id.clone(), Arc::clone(&config));
        info!(node_id = %config.id, source_id = %config.source_id, "Harvester node created");

        Ok(config)
    }

    /// Current snapshot of a node.
    pub fn get(&self, node_id: &str) -> Result<Arc<HarvesterConfig>, AppError> {
        self.read()?
            .get(node_id)
            .cloned()
            .ok_or_else(|| AppError::NodeNotFound(node_id.to_string()))
    }

    /// Mutable copy of a node's configuration. The live config is untouched.
    pub fn copy_for_update(&self, node_id: &str) -> Result<HarvesterDraft, AppError> {
        Ok(self.get(node_id)?.to_draft())
    }

    /// Validates an edited draft and replaces the node's snapshot.
    ///
    /// A draft copied from a version that has since been replaced is
    /// rejected. On any error the previous snapshot stays in place.
    pub async fn commit(&self, draft: HarvesterDraft) -> Result<Arc<HarvesterConfig>, AppError> {
        let current = self.get(draft.id.trim())?;
        if draft.source_id.as_deref() != Some(current.source_id.as_str()) {
            return Err(AppError::ConfigValidation(format!(
                "source id of node '{}' cannot change",
                current.id
            )));
        }
        if draft.base_version != current.version {
            return Err(stale_draft(&current.id, draft.base_version, current.version));
        }

        let config = Arc::new(draft.validate()?);
        self.register_source(&config).await?;

        let mut nodes = self.write()?;
        match nodes.get_mut(&config.id) {
            Some(slot) if slot.version + 1 == config.version => *slot = Arc::clone(&config),
            Some(slot) => {
                return Err(stale_draft(&config.id, config.version - 1, slot.version));
            }
            None => return Err(AppError::NodeNotFound(config.id.clone())),
        }
        info!(node_id = %config.id, version = config.version, "Harvester node updated");

        Ok(config)
    }

    /// Drops a node. Its provenance source stays registered.
    pub fn remove(&self, node_id: &str) -> Result<Arc<HarvesterConfig>, AppError> {
        self.write()?
            .remove(node_id)
            .ok_or_else(|| AppError::NodeNotFound(node_id.to_string()))
    }

    /// All nodes, sorted by name.
    pub fn list(&self) -> Result<Vec<Arc<HarvesterConfig>>, AppError> {
        let mut nodes: Vec<_> = self.read()?.values().cloned().collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(nodes)
    }

    async fn register_source(&self, config: &HarvesterConfig) -> Result<(), AppError> {
        self.registry
            .register_or_update_source(&config.source_id, &config.name, config.icon.as_deref())
            .await
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, NodeMap>, AppError> {
        self.nodes
            .read()
            .map_err(|_| AppError::Generic("config store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, NodeMap>, AppError> {
        self.nodes
            .write()
            .map_err(|_| AppError::Generic("config store lock poisoned".to_string()))
    }
}

fn stale_draft(node_id: &str, base: u64, current: u64) -> AppError {
    AppError::ConfigValidation(format!(
        "node '{}' changed since this draft was taken (draft of version {}, now version {})",
        node_id, base, current
    ))
}
