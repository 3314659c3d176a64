// ABOUTME: In-process execution store for tests and embedded use
// ABOUTME: Backed by a HashMap behind an async RwLock

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{ExecutionFilter, ExecutionStore, Result, StoreError};
use crate::engine::Execution;

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    executions: Arc<RwLock<HashMap<String, Execution>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.executions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.executions.read().await.is_empty()
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn save(&self, execution: &Execution) -> Result<()> {
        let mut executions = self.executions.write().await;
        executions.insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn load(&self, execution_id: &str) -> Result<Execution> {
        let executions = self.executions.read().await;
        executions
            .get(execution_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                execution_id: execution_id.to_string(),
            })
    }

    async fn list(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>> {
        let executions = self.executions.read().await;
        let mut matched: Vec<Execution> = executions
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(matched)
    }
}
