// ABOUTME: Main library module for the lodestar workflow engine
// ABOUTME: Exports all core modules and provides the public API

pub mod agents;
pub mod engine;
pub mod model;
pub mod store;

// Re-export commonly used types
pub use agents::{AgentRegistry, CapabilityProvider, FnProvider, Invocation};
pub use engine::{
    Context, ContextSnapshot, Engine, Execution, ExecutionResult, ExecutionStatus, StepResult,
    StepStatus,
};
pub use model::{RetryPolicy, Step, Workflow, WorkflowConfig, WorkflowValidator};
pub use store::{ExecutionFilter, ExecutionStore, FileStore, MemoryStore};

// Error handling
pub type Result<T> = anyhow::Result<T>;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
