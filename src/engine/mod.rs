// ABOUTME: Execution engine module for the lodestar workflow engine
// ABOUTME: Handles scheduling, step execution, shared context, and execution state

pub mod api;
pub mod context;
pub mod error;
pub mod execution;
pub mod executor;
pub mod scheduler;

pub use api::Engine;
pub use context::{Context, ContextSnapshot, ContextWriter, HistoryEntry};
pub use error::{EngineError, Result};
pub use execution::{
    Execution, ExecutionResult, ExecutionStatus, ExecutionSummary, StepRecord, StepResult,
    StepStatus,
};
pub use executor::StepExecutor;
pub use scheduler::Scheduler;
