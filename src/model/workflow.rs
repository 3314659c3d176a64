// ABOUTME: Core workflow data structures and definition loading
// ABOUTME: Defines the immutable Workflow DAG description and its config

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

use super::error::{DefinitionError, Result, ValidationError};
use super::step::Step;

fn default_version() -> String {
    "1.0".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// Steps keyed by id; insertion order is the deterministic tie-break
    /// when several steps become ready at once.
    pub steps: IndexMap<String, Step>,
    #[serde(default)]
    pub config: WorkflowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default = "default_save_state")]
    pub save_state: bool,
}

impl Workflow {
    /// Parse a workflow definition from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut workflow: Workflow =
            serde_yaml::from_str(content).map_err(DefinitionError::YamlError)?;
        workflow.normalize();
        workflow.validate_structure()?;
        Ok(workflow)
    }

    /// Parse a workflow definition from a YAML file.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .await
            .map_err(DefinitionError::IoError)?;
        Self::from_yaml(&content)
    }

    /// Backfill step ids from map keys so definitions can omit them.
    fn normalize(&mut self) {
        for (step_id, step) in &mut self.steps {
            if step.id.is_empty() {
                step.id = step_id.clone();
            }
        }
    }

    /// Cheap structural checks applied at parse time. Full DAG validation
    /// lives in WorkflowValidator.
    fn validate_structure(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::MissingId.into());
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingName.into());
        }
        if self.steps.is_empty() {
            return Err(ValidationError::EmptyWorkflow.into());
        }
        if self.config.max_concurrent == 0 {
            return Err(DefinitionError::MissingField(
                "config.max_concurrent must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn step_ids(&self) -> Vec<String> {
        self.steps.keys().cloned().collect()
    }

    pub fn get_step(&self, step_id: &str) -> Option<&Step> {
        self.steps.get(step_id)
    }

    pub fn has_step(&self, step_id: &str) -> bool {
        self.steps.contains_key(step_id)
    }

    /// All steps that name the given step in their depends_on set.
    pub fn dependents_of(&self, step_id: &str) -> Vec<String> {
        self.steps
            .iter()
            .filter_map(|(id, step)| {
                if step.depends_on.iter().any(|d| d == step_id) {
                    Some(id.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(DefinitionError::YamlError)
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            fail_fast: false,
            save_state: default_save_state(),
        }
    }
}

fn default_max_concurrent() -> usize {
    4
}

fn default_save_state() -> bool {
    true
}
