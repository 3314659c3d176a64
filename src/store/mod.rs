// ABOUTME: Execution state persistence contract
// ABOUTME: Key-value save/load/list over durable Execution records

pub mod file;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::engine::{Execution, ExecutionStatus};

pub use file::FileStore;
pub use memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Execution not found: {execution_id}")]
    NotFound { execution_id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Optional constraints for listing executions.
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub workflow_id: Option<String>,
    pub status: Option<ExecutionStatus>,
}

impl ExecutionFilter {
    pub fn matches(&self, execution: &Execution) -> bool {
        if let Some(ref workflow_id) = self.workflow_id {
            if &execution.workflow_id != workflow_id {
                return false;
            }
        }
        if let Some(status) = self.status {
            if execution.status != status {
                return false;
            }
        }
        true
    }
}

/// Durable key-value persistence of execution records. Last write per
/// execution id wins; no transactional guarantees beyond that.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn save(&self, execution: &Execution) -> Result<()>;
    async fn load(&self, execution_id: &str) -> Result<Execution>;
    async fn list(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>>;
}
