// ABOUTME: Shared execution context with append-only history and token ledger
// ABOUTME: The scheduler owns the Context; step executors get a ContextWriter view

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Mutable accumulator shared across one execution. Created by the
/// scheduler at execution start and finalized at execution end. History is
/// append-only and counters never decrease, so the log stays auditable
/// while later steps run.
#[derive(Debug, Clone)]
pub struct Context {
    inner: Arc<RwLock<ContextInner>>,
}

#[derive(Debug)]
struct ContextInner {
    id: String,
    execution_id: String,
    data: HashMap<String, serde_json::Value>,
    history: Vec<HistoryEntry>,
    metadata: ContextMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub step_id: String,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMetadata {
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub total_tokens: u64,
    pub entry_count: usize,
    pub size: usize,
}

/// Serializable point-in-time copy of a Context, persisted inside the
/// Execution record and sufficient to resume or audit a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub id: String,
    pub execution_id: String,
    pub data: HashMap<String, serde_json::Value>,
    pub history: Vec<HistoryEntry>,
    pub metadata: ContextMetadata,
}

/// Restricted view handed to step executors. Exposes appends, counter
/// increments, and read-only snapshots; destructive mutation stays with
/// the scheduler.
#[derive(Debug, Clone)]
pub struct ContextWriter {
    inner: Arc<RwLock<ContextInner>>,
}

impl Context {
    pub fn new(execution_id: &str) -> Self {
        Self::with_data(execution_id, HashMap::new())
    }

    pub fn with_data(execution_id: &str, data: HashMap<String, serde_json::Value>) -> Self {
        let now = Utc::now();
        let size = data_size(&data);
        Self {
            inner: Arc::new(RwLock::new(ContextInner {
                id: uuid::Uuid::new_v4().to_string(),
                execution_id: execution_id.to_string(),
                data,
                history: Vec::new(),
                metadata: ContextMetadata {
                    created: now,
                    updated: now,
                    total_tokens: 0,
                    entry_count: 0,
                    size,
                },
            })),
        }
    }

    /// Rebuild a context from a persisted snapshot, e.g. when resuming.
    pub fn from_snapshot(snapshot: ContextSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ContextInner {
                id: snapshot.id,
                execution_id: snapshot.execution_id,
                data: snapshot.data,
                history: snapshot.history,
                metadata: snapshot.metadata,
            })),
        }
    }

    pub fn writer(&self) -> ContextWriter {
        ContextWriter {
            inner: Arc::clone(&self.inner),
        }
    }

    pub async fn id(&self) -> String {
        self.inner.read().await.id.clone()
    }

    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.read().await.data.get(key).cloned()
    }

    /// Record a value for downstream steps. Scheduler-only; executors go
    /// through ContextWriter.
    pub async fn set(&self, key: &str, value: serde_json::Value) {
        let mut inner = self.inner.write().await;
        inner.data.insert(key.to_string(), value);
        inner.metadata.size = data_size(&inner.data);
        inner.metadata.updated = Utc::now();
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.inner.read().await.history.clone()
    }

    pub async fn total_tokens(&self) -> u64 {
        self.inner.read().await.metadata.total_tokens
    }

    pub async fn snapshot(&self) -> ContextSnapshot {
        self.inner.read().await.snapshot()
    }
}

impl ContextInner {
    fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            id: self.id.clone(),
            execution_id: self.execution_id.clone(),
            data: self.data.clone(),
            history: self.history.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

impl ContextWriter {
    /// Append one history entry. Every completed step attempt records
    /// exactly one.
    pub async fn append_history(&self, step_id: &str, summary: impl Into<String>) {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        inner.history.push(HistoryEntry {
            step_id: step_id.to_string(),
            timestamp: now,
            summary: summary.into(),
        });
        inner.metadata.entry_count = inner.history.len();
        inner.metadata.updated = now;
    }

    /// Point-in-time copy for handing to a provider invocation.
    pub async fn snapshot(&self) -> ContextSnapshot {
        self.inner.read().await.snapshot()
    }

    /// Add the provider-reported token cost to the running ledger.
    pub async fn add_tokens(&self, tokens: u64) {
        if tokens == 0 {
            return;
        }
        let mut inner = self.inner.write().await;
        inner.metadata.total_tokens += tokens;
        inner.metadata.updated = Utc::now();
    }
}

fn data_size(data: &HashMap<String, serde_json::Value>) -> usize {
    data.iter()
        .map(|(k, v)| k.len() + v.to_string().len())
        .sum()
}
