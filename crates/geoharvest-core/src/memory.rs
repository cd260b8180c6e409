//! In-memory implementations of [`IndexStore`] and [`ResultStore`].
//!
//! Used by tests and by embedders that do not persist harvest state. All
//! data lives behind `Arc<RwLock<..>>` and is lost when the last clone drops.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::AppError;
use crate::models::LocalRecordIndex;
use crate::sync::HarvestResult;
use crate::traits::{IndexStore, ResultStore};

fn poisoned() -> AppError {
    AppError::Generic("in-memory store lock poisoned".to_string())
}

/// Node indexes kept in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIndexStore {
    indexes: Arc<RwLock<HashMap<String, LocalRecordIndex>>>,
}

impl InMemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes with a stored index.
    pub fn node_count(&self) -> usize {
        self.indexes.read().map(|m| m.len()).unwrap_or(0)
    }
}

impl IndexStore for InMemoryIndexStore {
    async fn load_index(&self, node_id: &str) -> Result<LocalRecordIndex, AppError> {
        let indexes = self.indexes.read().map_err(|_| poisoned())?;
        Ok(indexes.get(node_id).cloned().unwrap_or_default())
    }

    async fn save_index(&self, node_id: &str, index: &LocalRecordIndex) -> Result<(), AppError> {
        let mut indexes = self.indexes.write().map_err(|_| poisoned())?;
        indexes.insert(node_id.to_string(), index.clone());
        Ok(())
    }

    async fn discard_index(&self, node_id: &str) -> Result<(), AppError> {
        let mut indexes = self.indexes.write().map_err(|_| poisoned())?;
        indexes.remove(node_id);
        Ok(())
    }
}

/// Last harvest result per node, kept in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryResultStore {
    results: Arc<RwLock<HashMap<String, HarvestResult>>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultStore for InMemoryResultStore {
    async fn record_result(&self, result: &HarvestResult) -> Result<(), AppError> {
        let mut results = self.results.write().map_err(|_| poisoned())?;
        results.insert(result.node_id.clone(), result.clone());
        Ok(())
    }

    async fn last_result(&self, node_id: &str) -> Result<Option<HarvestResult>, AppError> {
        let results = self.results.read().map_err(|_| poisoned())?;
        Ok(results.get(node_id).cloned())
    }
}
