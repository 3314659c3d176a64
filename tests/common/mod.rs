// ABOUTME: Common utilities and helpers for integration tests
// ABOUTME: Provides workflow builders and scripted capability providers

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use lodestar::agents::{AgentRegistry, CapabilityProvider, FnProvider, Invocation};
use lodestar::engine::Engine;
use lodestar::model::Workflow;
use lodestar::store::{ExecutionStore, MemoryStore};

/// Opt-in test logging, driven by RUST_LOG.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct TestWorkflowBuilder {
    id: String,
    name: String,
    max_concurrent: usize,
    fail_fast: bool,
    save_state: bool,
    steps: Vec<TestStep>,
}

pub struct TestStep {
    pub id: String,
    pub agent: String,
    pub depends_on: Vec<String>,
    pub optional: bool,
    pub max_attempts: Option<u32>,
    pub retry_delay: Option<String>,
    pub backoff: Option<String>,
    pub timeout: Option<String>,
}

impl TestStep {
    pub fn new(id: &str, agent: &str) -> Self {
        Self {
            id: id.to_string(),
            agent: agent.to_string(),
            depends_on: Vec::new(),
            optional: false,
            max_attempts: None,
            retry_delay: None,
            backoff: None,
            timeout: None,
        }
    }

    pub fn depends_on(mut self, deps: Vec<&str>) -> Self {
        self.depends_on = deps.into_iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, delay: &str) -> Self {
        self.max_attempts = Some(max_attempts);
        self.retry_delay = Some(delay.to_string());
        self
    }

    pub fn with_timeout(mut self, timeout: &str) -> Self {
        self.timeout = Some(timeout.to_string());
        self
    }
}

impl TestWorkflowBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: format!("Test workflow: {}", id),
            max_concurrent: 4,
            fail_fast: false,
            save_state: true,
            steps: Vec::new(),
        }
    }

    pub fn max_concurrent(mut self, limit: usize) -> Self {
        self.max_concurrent = limit;
        self
    }

    pub fn fail_fast(mut self) -> Self {
        self.fail_fast = true;
        self
    }

    pub fn without_checkpoints(mut self) -> Self {
        self.save_state = false;
        self
    }

    pub fn step(mut self, step: TestStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn add_step(self, id: &str, agent: &str) -> Self {
        self.step(TestStep::new(id, agent))
    }

    pub fn add_dependent_step(self, id: &str, agent: &str, deps: Vec<&str>) -> Self {
        self.step(TestStep::new(id, agent).depends_on(deps))
    }

    pub fn build(&self) -> Workflow {
        Workflow::from_yaml(&self.generate_yaml()).expect("test workflow should parse")
    }

    pub fn generate_yaml(&self) -> String {
        let mut yaml = format!("id: {}\nname: \"{}\"\n", self.id, self.name);
        yaml.push_str(&format!(
            "config:\n  max_concurrent: {}\n  fail_fast: {}\n  save_state: {}\n",
            self.max_concurrent, self.fail_fast, self.save_state
        ));

        yaml.push_str("steps:\n");
        for step in &self.steps {
            yaml.push_str(&format!("  {}:\n", step.id));
            yaml.push_str(&format!("    agent: {}\n", step.agent));
            yaml.push_str(&format!("    task: {{ name: {} }}\n", step.id));

            if !step.depends_on.is_empty() {
                yaml.push_str("    depends_on:\n");
                for dep in &step.depends_on {
                    yaml.push_str(&format!("      - {}\n", dep));
                }
            }

            if step.optional {
                yaml.push_str("    optional: true\n");
            }

            if let Some(attempts) = step.max_attempts {
                yaml.push_str("    retry:\n");
                yaml.push_str(&format!("      max_attempts: {}\n", attempts));
                if let Some(delay) = &step.retry_delay {
                    yaml.push_str(&format!("      delay: {}\n", delay));
                }
                if let Some(backoff) = &step.backoff {
                    yaml.push_str(&format!("      backoff: {}\n", backoff));
                }
            }

            if let Some(timeout) = &step.timeout {
                yaml.push_str(&format!("    timeout: {}\n", timeout));
            }
        }

        yaml
    }
}

/// Records which steps ran and in what order, and tracks how many provider
/// invocations overlap at any moment.
#[derive(Default)]
pub struct RunProbe {
    order: std::sync::Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl RunProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_start(&self, step: &str) {
        self.order.lock().unwrap().push(step.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn record_end(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn order(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }

    pub fn ran(&self, step: &str) -> bool {
        self.order().iter().any(|s| s == step)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Provider that succeeds immediately, echoing the step's task payload.
pub fn noop_provider() -> Arc<dyn CapabilityProvider> {
    Arc::new(FnProvider::new(|task, _ctx| async move {
        Ok(Invocation {
            output: task,
            tokens_used: 0,
        })
    }))
}

/// Provider that sleeps briefly before succeeding, reporting start and end
/// to the probe so tests can assert on ordering and concurrency.
pub fn probed_provider(probe: Arc<RunProbe>, delay: Duration) -> Arc<dyn CapabilityProvider> {
    Arc::new(FnProvider::new(move |task, _ctx| {
        let probe = Arc::clone(&probe);
        async move {
            let step = task
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            probe.record_start(&step);
            tokio::time::sleep(delay).await;
            probe.record_end();
            Ok(Invocation {
                output: json!({ "step": step }),
                tokens_used: 10,
            })
        }
    }))
}

/// Provider that always fails.
pub fn failing_provider(message: &str) -> Arc<dyn CapabilityProvider> {
    let message = message.to_string();
    Arc::new(FnProvider::new(move |_task, _ctx| {
        let message = message.clone();
        async move { Err(anyhow::anyhow!(message)) }
    }))
}

/// Provider that fails the first `failures` invocations, then succeeds.
pub fn flaky_provider(failures: u32) -> Arc<dyn CapabilityProvider> {
    let calls = Arc::new(AtomicU32::new(0));
    Arc::new(FnProvider::new(move |_task, _ctx| {
        let calls = Arc::clone(&calls);
        async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < failures {
                Err(anyhow::anyhow!("transient failure {}", n + 1))
            } else {
                Ok(Invocation {
                    output: json!({ "attempts": n + 1 }),
                    tokens_used: 5,
                })
            }
        }
    }))
}

/// Provider that never completes on its own; used for timeout and
/// cancellation tests.
pub fn hanging_provider() -> Arc<dyn CapabilityProvider> {
    Arc::new(FnProvider::new(|_task, _ctx| async move {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Invocation::default())
    }))
}

pub fn engine_with(
    providers: Vec<(&str, Arc<dyn CapabilityProvider>)>,
) -> (Engine, Arc<MemoryStore>) {
    let mut registry = AgentRegistry::new();
    for (id, provider) in providers {
        registry.register(id, provider);
    }
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(registry, Arc::clone(&store) as Arc<dyn ExecutionStore>);
    (engine, store)
}
