// ABOUTME: Engine owning the agent registry, store, and loaded workflows
// ABOUTME: Exposes workflow CRUD, execution, cancellation, and the status API

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{info, warn};

use super::context::Context;
use super::error::{EngineError, Result};
use super::execution::{Execution, ExecutionResult};
use super::scheduler::Scheduler;
use crate::agents::AgentRegistry;
use crate::model::{Workflow, WorkflowValidator};
use crate::store::{ExecutionFilter, ExecutionStore, StoreError};

/// Owns its registry and store references, constructed once per process
/// and passed explicitly. There are no ambient globals.
pub struct Engine {
    registry: Arc<AgentRegistry>,
    store: Arc<dyn ExecutionStore>,
    scheduler: Scheduler,
    workflows: RwLock<HashMap<String, Workflow>>,
    active: Mutex<HashMap<String, watch::Sender<bool>>>,
}

impl Engine {
    pub fn new(registry: AgentRegistry, store: Arc<dyn ExecutionStore>) -> Self {
        let registry = Arc::new(registry);
        let scheduler = Scheduler::new(Arc::clone(&registry), Arc::clone(&store));
        Self {
            registry,
            store,
            scheduler,
            workflows: RwLock::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Validate and register a workflow definition. Invalid workflows are
    /// rejected here, before any execution starts.
    pub async fn load_workflow(&self, workflow: Workflow) -> Result<()> {
        let report = WorkflowValidator::new().validate(&workflow);
        for warning in &report.warnings {
            warn!("Workflow {} validation warning: {}", workflow.id, warning);
        }
        if !report.is_valid {
            return Err(EngineError::ValidationFailed {
                errors: report.error_messages(),
            });
        }

        for step in workflow.steps.values() {
            if !self.registry.contains(&step.agent) {
                warn!(
                    "Workflow {} step {} references unregistered agent '{}'",
                    workflow.id, step.id, step.agent
                );
            }
        }

        info!("Loaded workflow {} ({})", workflow.id, workflow.name);
        self.workflows
            .write()
            .await
            .insert(workflow.id.clone(), workflow);
        Ok(())
    }

    pub async fn workflow(&self, workflow_id: &str) -> Option<Workflow> {
        self.workflows.read().await.get(workflow_id).cloned()
    }

    pub async fn workflow_ids(&self) -> Vec<String> {
        self.workflows.read().await.keys().cloned().collect()
    }

    /// Execute a loaded workflow to completion and return the aggregate
    /// result. The execution is cancellable via `cancel` while in flight.
    pub async fn execute(
        &self,
        workflow_id: &str,
        initial_data: HashMap<String, serde_json::Value>,
    ) -> Result<ExecutionResult> {
        let workflow = self.workflow(workflow_id).await.ok_or_else(|| {
            EngineError::WorkflowNotFound {
                workflow_id: workflow_id.to_string(),
            }
        })?;

        let execution = Execution::new(&workflow.id, workflow.step_ids());
        let context = Context::with_data(&execution.id, initial_data);
        let execution_id = execution.id.clone();

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.active
            .lock()
            .await
            .insert(execution_id.clone(), cancel_tx);

        let result = self
            .scheduler
            .run(&workflow, execution, context, cancel_rx)
            .await;

        self.active.lock().await.remove(&execution_id);
        result
    }

    /// Resume a non-terminal execution from its persisted record. Steps
    /// already succeeded are never re-run.
    pub async fn resume(&self, execution_id: &str) -> Result<ExecutionResult> {
        let execution = self.execution_status(execution_id).await?;
        if execution.is_terminal() {
            return Err(EngineError::NotResumable {
                execution_id: execution_id.to_string(),
                status: execution.status.to_string(),
            });
        }

        let workflow = self.workflow(&execution.workflow_id).await.ok_or_else(|| {
            EngineError::WorkflowNotFound {
                workflow_id: execution.workflow_id.clone(),
            }
        })?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.active
            .lock()
            .await
            .insert(execution_id.to_string(), cancel_tx);

        let result = self.scheduler.resume(&workflow, execution, cancel_rx).await;

        self.active.lock().await.remove(execution_id);
        result
    }

    /// Signal cancellation to an in-flight execution. Returns false when
    /// the execution is not currently running in this process.
    pub async fn cancel(&self, execution_id: &str) -> bool {
        let active = self.active.lock().await;
        match active.get(execution_id) {
            Some(sender) => sender.send(true).is_ok(),
            None => false,
        }
    }

    /// Read-only query over an in-flight or completed execution.
    pub async fn execution_status(&self, execution_id: &str) -> Result<Execution> {
        self.store.load(execution_id).await.map_err(|e| match e {
            StoreError::NotFound { execution_id } => {
                EngineError::ExecutionNotFound { execution_id }
            }
            other => other.into(),
        })
    }

    pub async fn list_executions(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>> {
        Ok(self.store.list(filter).await?)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{FnProvider, Invocation};
    use crate::engine::ExecutionStatus;
    use crate::store::MemoryStore;

    fn engine_with_noop() -> Engine {
        let mut registry = AgentRegistry::new();
        registry.register(
            "noop",
            Arc::new(FnProvider::new(|_task, _ctx| async move {
                Ok(Invocation::default())
            })),
        );
        Engine::new(registry, Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_execute_unknown_workflow() {
        let engine = engine_with_noop();
        let err = engine.execute("missing", HashMap::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::WorkflowNotFound { .. }));
    }

    #[tokio::test]
    async fn test_load_and_execute() {
        let engine = engine_with_noop();
        let workflow = Workflow::from_yaml(
            r#"
id: hello
name: Hello
steps:
  greet:
    agent: noop
"#,
        )
        .unwrap();

        engine.load_workflow(workflow).await.unwrap();
        assert_eq!(engine.workflow_ids().await, vec!["hello"]);

        let result = engine.execute("hello", HashMap::new()).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);

        let execution = engine.execution_status(&result.execution_id).await.unwrap();
        assert_eq!(execution.workflow_id, "hello");
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_workflow() {
        let engine = engine_with_noop();
        let workflow = Workflow::from_yaml(
            r#"
id: cyclic
name: Cyclic
steps:
  a: { agent: noop, depends_on: [b] }
  b: { agent: noop, depends_on: [a] }
"#,
        )
        .unwrap();

        let err = engine.load_workflow(workflow).await.unwrap_err();
        assert!(matches!(err, EngineError::ValidationFailed { .. }));
    }

    #[tokio::test]
    async fn test_status_of_unknown_execution() {
        let engine = engine_with_noop();
        let err = engine.execution_status("ghost").await.unwrap_err();
        assert!(matches!(err, EngineError::ExecutionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_cancel_unknown_execution() {
        let engine = engine_with_noop();
        assert!(!engine.cancel("ghost").await);
    }
}
