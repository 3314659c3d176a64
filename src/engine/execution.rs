// ABOUTME: Durable execution records and result aggregation
// ABOUTME: Defines per-step records, the persisted Execution entity, and ExecutionResult

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::context::{ContextMetadata, ContextSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Ready,
    Running,
    Retrying,
    Succeeded,
    Failed,
    Skipped,
}

/// Per-step slice of the durable execution record. Carries enough detail
/// (status, attempts, last error) to diagnose a run without logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub status: StepStatus,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// The durable, queryable record of one workflow run. Created when
/// execution begins, mutated by the scheduler after every step
/// transition, never deleted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub steps: HashMap<String, StepRecord>,
    pub context: ContextSnapshot,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Outcome of one step after its retry loop finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub attempts: u32,
    pub tokens_used: u64,
    pub duration: Duration,
}

/// Aggregate result returned to the caller once every step is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub step_results: HashMap<String, StepResult>,
    pub context: ContextSnapshot,
    pub summary: ExecutionSummary,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total_steps: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Execution {
    pub fn new(workflow_id: &str, step_ids: impl IntoIterator<Item = String>) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let steps = step_ids
            .into_iter()
            .map(|step_id| (step_id, StepRecord::new()))
            .collect();

        Self {
            workflow_id: workflow_id.to_string(),
            status: ExecutionStatus::Pending,
            steps,
            context: ContextSnapshot {
                id: String::new(),
                execution_id: id.clone(),
                data: HashMap::new(),
                history: Vec::new(),
                metadata: ContextMetadata {
                    created: now,
                    updated: now,
                    total_tokens: 0,
                    entry_count: 0,
                    size: 0,
                },
            },
            id,
            started_at: now,
            completed_at: None,
        }
    }

    pub fn step(&self, step_id: &str) -> Option<&StepRecord> {
        self.steps.get(step_id)
    }

    pub fn step_status(&self, step_id: &str) -> Option<StepStatus> {
        self.steps.get(step_id).map(|r| r.status)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// True once no step can make further progress.
    pub fn all_steps_terminal(&self) -> bool {
        self.steps.values().all(|r| r.status.is_terminal())
    }

    pub fn counts(&self) -> ExecutionSummary {
        let mut summary = ExecutionSummary {
            total_steps: self.steps.len(),
            ..Default::default()
        };
        for record in self.steps.values() {
            match record.status {
                StepStatus::Succeeded => summary.succeeded += 1,
                StepStatus::Failed => summary.failed += 1,
                StepStatus::Skipped => summary.skipped += 1,
                _ => {}
            }
        }
        summary
    }
}

impl StepRecord {
    pub fn new() -> Self {
        Self {
            status: StepStatus::Pending,
            attempts: 0,
            started_at: None,
            ended_at: None,
            error: None,
        }
    }

    pub fn mark_started(&mut self) {
        self.status = StepStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_retrying(&mut self, attempts: u32) {
        self.status = StepStatus::Retrying;
        self.attempts = attempts;
    }

    pub fn mark_terminal(&mut self, status: StepStatus, attempts: u32, error: Option<String>) {
        self.status = status;
        self.attempts = attempts;
        self.ended_at = Some(Utc::now());
        self.error = error;
    }

    pub fn mark_skipped(&mut self, reason: impl Into<String>) {
        self.status = StepStatus::Skipped;
        self.ended_at = Some(Utc::now());
        self.error = Some(reason.into());
    }
}

impl Default for StepRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Ready => "ready",
            StepStatus::Running => "running",
            StepStatus::Retrying => "retrying",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}
