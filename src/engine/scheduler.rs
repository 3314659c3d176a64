// ABOUTME: Ready-set DAG scheduling over a single coordinator loop
// ABOUTME: Dispatches steps up to the concurrency cap and serializes all state transitions

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use super::context::Context;
use super::error::{EngineError, Result};
use super::execution::{
    Execution, ExecutionResult, ExecutionStatus, StepResult, StepStatus,
};
use super::executor::{StepEvent, StepExecutor};
use crate::agents::AgentRegistry;
use crate::model::{Workflow, WorkflowValidator};
use crate::store::ExecutionStore;

/// Whether a dependency lets its dependent proceed, blocks it, or is still
/// in flight.
enum DepState {
    Satisfied,
    Blocked,
    Waiting,
}

pub struct Scheduler {
    registry: Arc<AgentRegistry>,
    store: Arc<dyn ExecutionStore>,
}

impl Scheduler {
    pub fn new(registry: Arc<AgentRegistry>, store: Arc<dyn ExecutionStore>) -> Self {
        Self { registry, store }
    }

    /// Execute a workflow from scratch. Validates first; a malformed
    /// workflow never creates an execution record.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        initial_data: HashMap<String, serde_json::Value>,
        cancel: watch::Receiver<bool>,
    ) -> Result<ExecutionResult> {
        let report = WorkflowValidator::new().validate(workflow);
        for warning in &report.warnings {
            warn!("Workflow {} validation warning: {}", workflow.id, warning);
        }
        if !report.is_valid {
            return Err(EngineError::ValidationFailed {
                errors: report.error_messages(),
            });
        }

        let execution = Execution::new(&workflow.id, workflow.step_ids());
        let context = Context::with_data(&execution.id, initial_data);
        self.run(workflow, execution, context, cancel).await
    }

    /// Resume a previously persisted execution. Succeeded steps are never
    /// re-run; interrupted steps fall back to pending and the ready set is
    /// recomputed from the persisted records.
    pub async fn resume(
        &self,
        workflow: &Workflow,
        mut execution: Execution,
        cancel: watch::Receiver<bool>,
    ) -> Result<ExecutionResult> {
        for record in execution.steps.values_mut() {
            if matches!(
                record.status,
                StepStatus::Ready | StepStatus::Running | StepStatus::Retrying
            ) {
                record.status = StepStatus::Pending;
            }
        }
        let context = Context::from_snapshot(execution.context.clone());
        self.run(workflow, execution, context, cancel).await
    }

    #[instrument(
        skip(self, workflow, execution, context, cancel),
        fields(workflow_id = %workflow.id, execution_id = %execution.id)
    )]
    pub(crate) async fn run(
        &self,
        workflow: &Workflow,
        mut execution: Execution,
        context: Context,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<ExecutionResult> {
        info!(
            "Starting execution of workflow {} ({} steps, max_concurrent {})",
            workflow.id,
            workflow.steps.len(),
            workflow.config.max_concurrent
        );

        execution.status = ExecutionStatus::Running;
        execution.context = context.snapshot().await;
        // The initial and final records are always persisted so the status
        // API can see the execution; per-transition saves follow save_state.
        self.store.save(&execution).await?;

        let (event_tx, mut event_rx) =
            mpsc::channel::<StepEvent>(workflow.steps.len().max(16));
        let mut running: HashSet<String> = HashSet::new();
        let mut step_results: HashMap<String, StepResult> = HashMap::new();
        let mut fail_fast_triggered = false;
        let mut cancelled = false;
        let mut cancel_open = true;

        loop {
            if !cancelled && *cancel.borrow() {
                info!("Cancellation observed; skipping all non-terminal steps");
                cancelled = true;
                for record in execution.steps.values_mut() {
                    if !record.status.is_terminal() {
                        record.mark_skipped("execution cancelled");
                    }
                }
                self.checkpoint(workflow, &mut execution, &context).await?;
            }

            if !cancelled && !fail_fast_triggered {
                self.propagate_skips(workflow, &mut execution);
                let applied_inline = self
                    .admit_ready(
                        workflow,
                        &mut execution,
                        &context,
                        &mut running,
                        &mut step_results,
                        &mut fail_fast_triggered,
                        &event_tx,
                        &cancel,
                    )
                    .await;
                self.checkpoint(workflow, &mut execution, &context).await?;
                if applied_inline {
                    // A step failed without ever dispatching (agent
                    // resolution). Its dependents need a fresh skip and
                    // ready computation before the loop may block or break.
                    continue;
                }
            }

            if running.is_empty() {
                if !cancelled && !fail_fast_triggered && !execution.all_steps_terminal() {
                    // Cannot happen when skip propagation reached a
                    // fixpoint; bail out rather than spin.
                    warn!("Scheduler stalled with no runnable steps; aborting loop");
                }
                break;
            }

            tokio::select! {
                event = event_rx.recv() => match event {
                    Some(StepEvent::Retrying { step_id, attempts }) => {
                        if !cancelled {
                            if let Some(record) = execution.steps.get_mut(&step_id) {
                                record.mark_retrying(attempts);
                            }
                            self.checkpoint(workflow, &mut execution, &context).await?;
                        }
                    }
                    Some(StepEvent::Finished { step_id, result }) => {
                        running.remove(&step_id);
                        if cancelled {
                            // In-flight work that lands after cancellation has
                            // no further effect on scheduling or state.
                            debug!("Discarding completion of {} after cancellation", step_id);
                            continue;
                        }
                        self.apply_finished(
                            workflow,
                            &mut execution,
                            &context,
                            &mut step_results,
                            &mut fail_fast_triggered,
                            step_id,
                            result,
                        )
                        .await;
                        self.checkpoint(workflow, &mut execution, &context).await?;
                    }
                    None => break,
                },
                // Wake promptly on cancellation instead of waiting for the
                // next step event. A dropped cancel handle disarms this arm.
                changed = cancel.changed(), if !cancelled && cancel_open => {
                    if changed.is_err() {
                        cancel_open = false;
                    }
                }
            }
        }

        self.finalize(workflow, &mut execution, &context, &mut step_results, cancelled)
            .await
    }

    /// Compute the ready set and dispatch up to the free concurrency
    /// budget, in declaration order for deterministic tie-breaking.
    /// Returns true when a terminal result was applied inline (a step that
    /// failed before dispatch), so the caller re-evaluates the ready set.
    #[allow(clippy::too_many_arguments)]
    async fn admit_ready(
        &self,
        workflow: &Workflow,
        execution: &mut Execution,
        context: &Context,
        running: &mut HashSet<String>,
        step_results: &mut HashMap<String, StepResult>,
        fail_fast_triggered: &mut bool,
        event_tx: &mpsc::Sender<StepEvent>,
        cancel: &watch::Receiver<bool>,
    ) -> bool {
        let mut applied_inline = false;
        // Surface readiness before admission so the persisted record
        // distinguishes "waiting on deps" from "waiting on capacity".
        let ready: Vec<String> = workflow
            .steps
            .keys()
            .filter(|step_id| self.is_ready(workflow, execution, step_id))
            .cloned()
            .collect();

        for step_id in &ready {
            if let Some(record) = execution.steps.get_mut(step_id) {
                record.status = StepStatus::Ready;
            }
        }

        let budget = workflow
            .config
            .max_concurrent
            .saturating_sub(running.len());

        for step_id in ready.into_iter().take(budget) {
            if *fail_fast_triggered {
                break;
            }
            let step = workflow.steps[&step_id].clone();

            let provider = match self.registry.resolve(&step.agent) {
                Some(provider) => provider,
                None => {
                    // Unknown provider is fatal for the step and never
                    // retried.
                    let result = StepResult {
                        step_id: step_id.clone(),
                        status: StepStatus::Failed,
                        output: None,
                        error: Some(
                            EngineError::AgentResolution {
                                step_id: step_id.clone(),
                                agent: step.agent.clone(),
                            }
                            .to_string(),
                        ),
                        attempts: 0,
                        tokens_used: 0,
                        duration: std::time::Duration::ZERO,
                    };
                    self.apply_finished(
                        workflow,
                        execution,
                        context,
                        step_results,
                        fail_fast_triggered,
                        step_id,
                        result,
                    )
                    .await;
                    applied_inline = true;
                    continue;
                }
            };

            if let Some(record) = execution.steps.get_mut(&step_id) {
                record.mark_started();
            }
            running.insert(step_id.clone());
            debug!("Dispatching step {} ({}/{} slots)", step_id, running.len(), workflow.config.max_concurrent);

            let events = event_tx.clone();
            let step_writer = context.writer();
            let step_cancel = cancel.clone();
            tokio::spawn(async move {
                let result = StepExecutor::run(
                    step,
                    provider,
                    step_writer,
                    step_cancel,
                    events.clone(),
                )
                .await;
                let _ = events
                    .send(StepEvent::Finished {
                        step_id: result.step_id.clone(),
                        result,
                    })
                    .await;
            });
        }

        applied_inline
    }

    /// Apply one terminal step result. The sole place a step becomes
    /// succeeded or failed, so transitions stay serialized.
    async fn apply_finished(
        &self,
        workflow: &Workflow,
        execution: &mut Execution,
        context: &Context,
        step_results: &mut HashMap<String, StepResult>,
        fail_fast_triggered: &mut bool,
        step_id: String,
        result: StepResult,
    ) {
        let optional = workflow
            .steps
            .get(&step_id)
            .map(|s| s.optional)
            .unwrap_or(false);

        if let Some(record) = execution.steps.get_mut(&step_id) {
            record.mark_terminal(result.status, result.attempts, result.error.clone());
        }

        match result.status {
            StepStatus::Succeeded => {
                info!(
                    "Step {} succeeded after {} attempt(s)",
                    step_id, result.attempts
                );
                if let Some(ref output) = result.output {
                    context.set(&step_id, output.clone()).await;
                }
            }
            StepStatus::Failed if optional => {
                warn!(
                    "Optional step {} failed after {} attempt(s); dependents will be skipped",
                    step_id, result.attempts
                );
            }
            StepStatus::Failed => {
                warn!(
                    "Step {} failed fatally after {} attempt(s): {:?}",
                    step_id, result.attempts, result.error
                );
                if workflow.config.fail_fast && !*fail_fast_triggered {
                    info!("fail_fast: skipping all not-yet-started steps");
                    *fail_fast_triggered = true;
                    for record in execution.steps.values_mut() {
                        if matches!(record.status, StepStatus::Pending | StepStatus::Ready) {
                            record.mark_skipped("fail_fast triggered by another step");
                        }
                    }
                }
            }
            _ => {}
        }

        step_results.insert(step_id, result);
    }

    /// A step is ready when it has not started and every dependency is
    /// satisfied: succeeded, or terminally failed/skipped but optional.
    fn is_ready(&self, workflow: &Workflow, execution: &Execution, step_id: &str) -> bool {
        let status = match execution.step_status(step_id) {
            Some(status) => status,
            None => return false,
        };
        if !matches!(status, StepStatus::Pending | StepStatus::Ready) {
            return false;
        }

        workflow.steps[step_id].depends_on.iter().all(|dep| {
            matches!(
                self.dep_state(workflow, execution, dep),
                DepState::Satisfied
            )
        })
    }

    fn dep_state(&self, workflow: &Workflow, execution: &Execution, dep_id: &str) -> DepState {
        let optional = workflow
            .steps
            .get(dep_id)
            .map(|s| s.optional)
            .unwrap_or(false);
        match execution.step_status(dep_id) {
            Some(StepStatus::Succeeded) => DepState::Satisfied,
            Some(StepStatus::Failed) | Some(StepStatus::Skipped) => {
                if optional {
                    DepState::Satisfied
                } else {
                    DepState::Blocked
                }
            }
            _ => DepState::Waiting,
        }
    }

    /// Mark steps whose non-optional dependency failed or was skipped.
    /// Runs to a fixpoint so skips propagate transitively through the DAG.
    fn propagate_skips(&self, workflow: &Workflow, execution: &mut Execution) {
        loop {
            let to_skip: Vec<String> = workflow
                .steps
                .iter()
                .filter(|(step_id, step)| {
                    matches!(
                        execution.step_status(step_id),
                        Some(StepStatus::Pending) | Some(StepStatus::Ready)
                    ) && step.depends_on.iter().any(|dep| {
                        matches!(self.dep_state(workflow, execution, dep), DepState::Blocked)
                    })
                })
                .map(|(step_id, _)| step_id.clone())
                .collect();

            if to_skip.is_empty() {
                break;
            }
            for step_id in to_skip {
                debug!("Skipping step {}: upstream failure", step_id);
                if let Some(record) = execution.steps.get_mut(&step_id) {
                    record.mark_skipped("dependency failed");
                }
            }
        }
    }

    async fn checkpoint(
        &self,
        workflow: &Workflow,
        execution: &mut Execution,
        context: &Context,
    ) -> Result<()> {
        execution.context = context.snapshot().await;
        if workflow.config.save_state {
            self.store.save(execution).await?;
        }
        Ok(())
    }

    async fn finalize(
        &self,
        workflow: &Workflow,
        execution: &mut Execution,
        context: &Context,
        step_results: &mut HashMap<String, StepResult>,
        cancelled: bool,
    ) -> Result<ExecutionResult> {
        // Steps that never produced a result (skipped or cancelled before
        // dispatch) still get an entry in the aggregate.
        for (step_id, record) in &execution.steps {
            if !step_results.contains_key(step_id) && record.status.is_terminal() {
                step_results.insert(
                    step_id.clone(),
                    StepResult {
                        step_id: step_id.clone(),
                        status: record.status,
                        output: None,
                        error: record.error.clone(),
                        attempts: record.attempts,
                        tokens_used: 0,
                        duration: std::time::Duration::ZERO,
                    },
                );
            }
        }

        let fatal_failure = execution.steps.iter().any(|(step_id, record)| {
            record.status == StepStatus::Failed
                && !workflow
                    .steps
                    .get(step_id)
                    .map(|s| s.optional)
                    .unwrap_or(false)
        });

        execution.status = if cancelled {
            ExecutionStatus::Cancelled
        } else if fatal_failure {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        };
        execution.completed_at = Some(chrono::Utc::now());
        execution.context = context.snapshot().await;
        self.store.save(execution).await?;

        let summary = execution.counts();
        info!(
            "Execution {} finished with status {} ({} succeeded, {} failed, {} skipped)",
            execution.id, execution.status, summary.succeeded, summary.failed, summary.skipped
        );

        Ok(ExecutionResult {
            execution_id: execution.id.clone(),
            status: execution.status,
            step_results: step_results.clone(),
            context: execution.context.clone(),
            summary,
        })
    }
}
