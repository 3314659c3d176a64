// ABOUTME: Capability-provider trait and agent registry
// ABOUTME: Steps delegate their work to providers resolved by string id

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::ContextSnapshot;

/// What a provider hands back for one invocation. Token cost is 0 when the
/// provider does not report one.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub output: serde_json::Value,
    pub tokens_used: u64,
}

/// An opaque unit of work execution. Implementations perform the actual
/// step work (content generation, deployment, whatever the step's task
/// payload describes) and must return promptly when their future is
/// dropped on cancellation or timeout.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    async fn invoke(
        &self,
        task: serde_json::Value,
        context: ContextSnapshot,
    ) -> anyhow::Result<Invocation>;
}

/// Registry mapping agent id to provider, resolved once at engine
/// construction rather than per call.
#[derive(Default)]
pub struct AgentRegistry {
    providers: HashMap<String, Arc<dyn CapabilityProvider>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        agent_id: impl Into<String>,
        provider: Arc<dyn CapabilityProvider>,
    ) {
        self.providers.insert(agent_id.into(), provider);
    }

    pub fn resolve(&self, agent_id: &str) -> Option<Arc<dyn CapabilityProvider>> {
        self.providers.get(agent_id).cloned()
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.providers.contains_key(agent_id)
    }

    pub fn agent_ids(&self) -> Vec<&str> {
        self.providers.keys().map(|k| k.as_str()).collect()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.agent_ids())
            .finish()
    }
}

/// Closure-backed provider for embedders and tests that don't need a full
/// provider type.
pub struct FnProvider {
    func: Box<
        dyn Fn(serde_json::Value, ContextSnapshot) -> BoxFuture<'static, anyhow::Result<Invocation>>
            + Send
            + Sync,
    >,
}

impl FnProvider {
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(serde_json::Value, ContextSnapshot) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Invocation>> + Send + 'static,
    {
        Self {
            func: Box::new(move |task, context| Box::pin(func(task, context))),
        }
    }
}

#[async_trait]
impl CapabilityProvider for FnProvider {
    async fn invoke(
        &self,
        task: serde_json::Value,
        context: ContextSnapshot,
    ) -> anyhow::Result<Invocation> {
        (self.func)(task, context).await
    }
}
