// ABOUTME: Model module for workflow definitions
// ABOUTME: Exports workflow parsing, validation, and step data structures

pub mod error;
pub mod step;
pub mod validation;
pub mod workflow;

pub use error::{DefinitionError, ValidationError};
pub use step::{Backoff, RetryPolicy, Step};
pub use validation::{DependencyGraph, ValidationReport, WorkflowValidator};
pub use workflow::{Workflow, WorkflowConfig};
