// ABOUTME: Error types for workflow definition loading and validation
// ABOUTME: Defines specific error types for the model module

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DefinitionError {
    #[error("Failed to read workflow file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Workflow is missing an id")]
    MissingId,

    #[error("Workflow is missing a name")]
    MissingName,

    #[error("Empty workflow: no steps defined")]
    EmptyWorkflow,

    #[error("Step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("Circular dependency closed at step '{step}'")]
    CircularDependency { step: String },

    #[error("Invalid step configuration for '{step}': {reason}")]
    InvalidStep { step: String, reason: String },
}

pub type Result<T> = std::result::Result<T, DefinitionError>;
