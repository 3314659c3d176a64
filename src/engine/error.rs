// ABOUTME: Error types for workflow execution engine operations
// ABOUTME: Defines the runtime error taxonomy from validation to fatal step failure

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Workflow validation failed:\n{}", errors.join("\n"))]
    ValidationFailed { errors: Vec<String> },

    #[error("Workflow not found: {workflow_id}")]
    WorkflowNotFound { workflow_id: String },

    #[error("Execution not found: {execution_id}")]
    ExecutionNotFound { execution_id: String },

    #[error("Unknown capability provider '{agent}' for step '{step_id}'")]
    AgentResolution { step_id: String, agent: String },

    #[error("Execution '{execution_id}' cannot be resumed from status {status}")]
    NotResumable {
        execution_id: String,
        status: String,
    },

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Definition error: {0}")]
    Definition(#[from] crate::model::DefinitionError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
