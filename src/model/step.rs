// ABOUTME: Step definition structures and retry policy configuration
// ABOUTME: Defines the immutable per-step description within a workflow

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Usually omitted in YAML; backfilled from the steps map key.
    #[serde(default)]
    pub id: String,
    pub name: Option<String>,
    /// Capability-provider identifier, resolved by the agent registry.
    pub agent: String,
    /// Opaque payload handed to the provider.
    #[serde(default)]
    pub task: serde_json::Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Hint that this step may run alongside siblings sharing its
    /// dependency set. Never bypasses the global concurrency cap.
    #[serde(default)]
    pub parallel: bool,
    /// A failed optional step does not fail the workflow; its dependents
    /// are skipped instead of blocked.
    #[serde(default)]
    pub optional: bool,
    #[serde(default, alias = "retry")]
    pub retry_policy: RetryPolicy,
    /// Wall-clock bound on a single attempt.
    #[serde(with = "humantime_serde", default)]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(with = "humantime_serde", default = "default_delay")]
    pub delay: Duration,
    #[serde(default)]
    pub backoff: Backoff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    #[default]
    Linear,
    Exponential,
}

impl Step {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

impl RetryPolicy {
    /// Delay to sleep before the given 1-based attempt number.
    /// Linear backoff sleeps the base delay every time; exponential
    /// doubles per attempt: `delay * 2^(attempt - 1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Linear => self.delay,
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.delay.saturating_mul(factor)
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay: default_delay(),
            backoff: Backoff::default(),
        }
    }
}

fn default_max_attempts() -> u32 {
    1
}

fn default_delay() -> Duration {
    Duration::from_secs(1)
}
