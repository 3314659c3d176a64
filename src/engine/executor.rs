// ABOUTME: Single-step execution with retry, backoff, and timeout enforcement
// ABOUTME: Transient failures stay here; only exhausted-retry failures surface

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use super::context::ContextWriter;
use super::execution::{StepResult, StepStatus};
use crate::agents::CapabilityProvider;
use crate::model::Step;

/// Progress and completion events flowing back to the scheduler. All
/// Execution/Context transitions are applied by the coordinator, one at a
/// time, from these messages.
#[derive(Debug)]
pub enum StepEvent {
    Retrying { step_id: String, attempts: u32 },
    Finished { step_id: String, result: StepResult },
}

pub struct StepExecutor;

impl StepExecutor {
    /// Run one step to a terminal result. Attempts the provider call up to
    /// `retry_policy.max_attempts` times, sleeping the policy delay between
    /// attempts but never after the last. An attempt that outlives
    /// `step.timeout` counts as a failed attempt, not a crash.
    ///
    /// Every completed attempt appends one history entry and credits the
    /// provider-reported token cost. The executor holds only the
    /// append-only context view; destructive mutation stays with the
    /// scheduler. After cancellation is observed no further context
    /// mutation is applied.
    pub async fn run(
        step: Step,
        provider: Arc<dyn CapabilityProvider>,
        writer: ContextWriter,
        mut cancel: watch::Receiver<bool>,
        events: mpsc::Sender<StepEvent>,
    ) -> StepResult {
        let started = Instant::now();
        let max_attempts = step.retry_policy.max_attempts.max(1);
        let mut tokens_total = 0u64;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if *cancel.borrow() {
                return Self::cancelled_result(&step.id, attempt - 1, started);
            }

            debug!(
                "Executing step {} (attempt {}/{})",
                step.id, attempt, max_attempts
            );

            let snapshot = writer.snapshot().await;
            let invoke = provider.invoke(step.task.clone(), snapshot);
            let work = async {
                match step.timeout {
                    Some(limit) => match timeout(limit, invoke).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(anyhow::anyhow!(
                            "attempt timed out after {:?}",
                            limit
                        )),
                    },
                    None => invoke.await,
                }
            };
            tokio::pin!(work);

            // A hung provider must not outlive cancellation, so the attempt
            // races the cancel signal. A dropped cancel handle also ends the
            // attempt: the run it belonged to is gone.
            let attempt_outcome = loop {
                tokio::select! {
                    outcome = &mut work => break outcome,
                    changed = cancel.changed() => {
                        if changed.is_err() || *cancel.borrow() {
                            return Self::cancelled_result(&step.id, attempt - 1, started);
                        }
                    }
                }
            };

            if *cancel.borrow() {
                return Self::cancelled_result(&step.id, attempt, started);
            }

            match attempt_outcome {
                Ok(invocation) => {
                    tokens_total += invocation.tokens_used;
                    writer.add_tokens(invocation.tokens_used).await;
                    writer
                        .append_history(
                            &step.id,
                            format!("attempt {} succeeded", attempt),
                        )
                        .await;

                    return StepResult {
                        step_id: step.id.clone(),
                        status: StepStatus::Succeeded,
                        output: Some(invocation.output),
                        error: None,
                        attempts: attempt,
                        tokens_used: tokens_total,
                        duration: started.elapsed(),
                    };
                }
                Err(e) => {
                    warn!(
                        "Step {} attempt {}/{} failed: {}",
                        step.id, attempt, max_attempts, e
                    );
                    writer
                        .append_history(
                            &step.id,
                            format!("attempt {} failed: {}", attempt, e),
                        )
                        .await;
                    last_error = Some(e.to_string());

                    if attempt < max_attempts {
                        let _ = events
                            .send(StepEvent::Retrying {
                                step_id: step.id.clone(),
                                attempts: attempt,
                            })
                            .await;

                        let delay = step.retry_policy.delay_for(attempt + 1);
                        debug!("Waiting {:?} before retrying {}", delay, step.id);
                        tokio::select! {
                            _ = sleep(delay) => {}
                            _ = cancel.changed() => {
                                if *cancel.borrow() {
                                    return Self::cancelled_result(&step.id, attempt, started);
                                }
                            }
                        }
                    }
                }
            }
        }

        StepResult {
            step_id: step.id.clone(),
            status: StepStatus::Failed,
            output: None,
            error: last_error,
            attempts: max_attempts,
            tokens_used: tokens_total,
            duration: started.elapsed(),
        }
    }

    fn cancelled_result(step_id: &str, attempts: u32, started: Instant) -> StepResult {
        StepResult {
            step_id: step_id.to_string(),
            status: StepStatus::Skipped,
            output: None,
            error: Some("execution cancelled".to_string()),
            attempts,
            tokens_used: 0,
            duration: started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{FnProvider, Invocation};
    use crate::engine::Context;
    use crate::model::{Backoff, RetryPolicy};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn step_with_policy(max_attempts: u32) -> Step {
        Step {
            id: "step".to_string(),
            name: None,
            agent: "test".to_string(),
            task: serde_json::Value::Null,
            depends_on: Vec::new(),
            parallel: false,
            optional: false,
            retry_policy: RetryPolicy {
                max_attempts,
                delay: Duration::from_millis(5),
                backoff: Backoff::Linear,
            },
            timeout: None,
        }
    }

    fn channels() -> (
        watch::Sender<bool>,
        watch::Receiver<bool>,
        mpsc::Sender<StepEvent>,
        mpsc::Receiver<StepEvent>,
    ) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (event_tx, event_rx) = mpsc::channel(16);
        (cancel_tx, cancel_rx, event_tx, event_rx)
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let provider = Arc::new(FnProvider::new(|_task, _ctx| async move {
            Ok(Invocation {
                output: serde_json::json!("done"),
                tokens_used: 11,
            })
        }));
        let context = Context::new("exec");
        let (_cancel_tx, cancel, events, _rx) = channels();

        let result =
            StepExecutor::run(step_with_policy(3), provider, context.writer(), cancel, events)
                .await;

        assert_eq!(result.status, StepStatus::Succeeded);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.tokens_used, 11);
        assert_eq!(context.total_tokens().await, 11);
        assert_eq!(context.history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);
        let provider = Arc::new(FnProvider::new(move |_task, _ctx| {
            let calls = Arc::clone(&calls_clone);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    anyhow::bail!("transient failure")
                }
                Ok(Invocation::default())
            }
        }));
        let context = Context::new("exec");
        let (_cancel_tx, cancel, events, mut event_rx) = channels();

        let result =
            StepExecutor::run(step_with_policy(3), provider, context.writer(), cancel, events)
                .await;

        assert_eq!(result.status, StepStatus::Succeeded);
        assert_eq!(result.attempts, 3);
        // One history entry per completed attempt.
        assert_eq!(context.history().await.len(), 3);

        // Two retrying events were emitted before the final attempt.
        let mut retry_events = 0;
        while let Ok(event) = event_rx.try_recv() {
            if matches!(event, StepEvent::Retrying { .. }) {
                retry_events += 1;
            }
        }
        assert_eq!(retry_events, 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail() {
        let provider = Arc::new(FnProvider::new(|_task, _ctx| async move {
            anyhow::bail!("always broken")
        }));
        let context = Context::new("exec");
        let (_cancel_tx, cancel, events, _rx) = channels();

        let result =
            StepExecutor::run(step_with_policy(2), provider, context.writer(), cancel, events)
                .await;

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.attempts, 2);
        assert!(result.error.unwrap().contains("always broken"));
        assert_eq!(context.history().await.len(), 2);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failed_attempt() {
        let provider = Arc::new(FnProvider::new(|_task, _ctx| async move {
            sleep(Duration::from_secs(60)).await;
            Ok(Invocation::default())
        }));
        let context = Context::new("exec");
        let (_cancel_tx, cancel, events, _rx) = channels();

        let mut step = step_with_policy(1);
        step.timeout = Some(Duration::from_millis(20));

        let result = StepExecutor::run(step, provider, context.writer(), cancel, events).await;

        assert_eq!(result.status, StepStatus::Failed);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancellation_stops_retrying() {
        let provider = Arc::new(FnProvider::new(|_task, _ctx| async move {
            anyhow::bail!("fails to trigger retry sleep")
        }));
        let context = Context::new("exec");
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (event_tx, _event_rx) = mpsc::channel(16);

        let mut step = step_with_policy(10);
        step.retry_policy.delay = Duration::from_secs(30);

        let handle = tokio::spawn(StepExecutor::run(
            step,
            provider,
            context.writer(),
            cancel_rx,
            event_tx,
        ));

        sleep(Duration::from_millis(50)).await;
        cancel_tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("executor returned promptly")
            .unwrap();
        assert_eq!(result.status, StepStatus::Skipped);
        assert!(result.error.unwrap().contains("cancelled"));
    }
}
