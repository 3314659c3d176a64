// ABOUTME: Workflow validation logic and dependency graph checking
// ABOUTME: Detects cycles, dangling references, and suspicious structures

use petgraph::algo::toposort;
use petgraph::graph::NodeIndex;
use petgraph::{Direction, Graph};
use std::collections::{HashMap, HashSet, VecDeque};

use super::error::ValidationError;
use super::workflow::Workflow;

/// Step count above which a warning is surfaced.
const LARGE_WORKFLOW_THRESHOLD: usize = 200;

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
    pub is_valid: bool,
}

pub struct WorkflowValidator;

impl WorkflowValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a complete workflow. Pure function over the definition;
    /// never touches execution state.
    pub fn validate(&self, workflow: &Workflow) -> ValidationReport {
        let mut report = ValidationReport::new();

        if workflow.id.trim().is_empty() {
            report.errors.push(ValidationError::MissingId);
        }
        if workflow.name.trim().is_empty() {
            report.errors.push(ValidationError::MissingName);
        }
        if workflow.steps.is_empty() {
            report.errors.push(ValidationError::EmptyWorkflow);
            report.is_valid = false;
            return report;
        }

        self.validate_dependencies(workflow, &mut report);
        self.validate_steps(workflow, &mut report);
        self.check_unreachable_steps(workflow, &mut report);
        self.check_parallel_hints(workflow, &mut report);

        if workflow.steps.len() > LARGE_WORKFLOW_THRESHOLD {
            report.warnings.push(format!(
                "Workflow has {} steps; consider splitting it",
                workflow.steps.len()
            ));
        }

        report.is_valid = report.errors.is_empty();
        report
    }

    fn validate_dependencies(&self, workflow: &Workflow, report: &mut ValidationReport) {
        // Every depends_on entry must name an existing step.
        for (step_id, step) in &workflow.steps {
            for dep in &step.depends_on {
                if !workflow.steps.contains_key(dep) {
                    report.errors.push(ValidationError::UnknownDependency {
                        step: step_id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        if let Err(step) = self.detect_cycle(workflow) {
            report
                .errors
                .push(ValidationError::CircularDependency { step });
        }
    }

    /// Detect a cycle in the dependency relation. Returns the step id at
    /// which the cycle is closed.
    fn detect_cycle(&self, workflow: &Workflow) -> std::result::Result<(), String> {
        let mut graph = Graph::<String, ()>::new();
        let mut node_map: HashMap<String, NodeIndex> = HashMap::new();

        for step_id in workflow.steps.keys() {
            let node = graph.add_node(step_id.clone());
            node_map.insert(step_id.clone(), node);
        }

        for (step_id, step) in &workflow.steps {
            let step_node = node_map[step_id];
            for dep in &step.depends_on {
                if let Some(&dep_node) = node_map.get(dep) {
                    graph.add_edge(dep_node, step_node, ());
                }
            }
        }

        match toposort(&graph, None) {
            Ok(_) => Ok(()),
            Err(cycle) => Err(graph[cycle.node_id()].clone()),
        }
    }

    fn validate_steps(&self, workflow: &Workflow, report: &mut ValidationReport) {
        for (step_id, step) in &workflow.steps {
            if step.agent.trim().is_empty() {
                report.errors.push(ValidationError::InvalidStep {
                    step: step_id.clone(),
                    reason: "agent id cannot be empty".to_string(),
                });
            }
            if step.retry_policy.max_attempts == 0 {
                report.errors.push(ValidationError::InvalidStep {
                    step: step_id.clone(),
                    reason: "retry max_attempts must be at least 1".to_string(),
                });
            }
            if step.depends_on.iter().any(|d| d == step_id) {
                report.errors.push(ValidationError::InvalidStep {
                    step: step_id.clone(),
                    reason: "step depends on itself".to_string(),
                });
            }
        }
    }

    /// Steps never reachable from a root are a symptom of a typo in
    /// depends_on; surfaced as warnings because cycles already error.
    fn check_unreachable_steps(&self, workflow: &Workflow, report: &mut ValidationReport) {
        let graph = DependencyGraph::from_workflow(workflow);
        let roots = graph.roots();

        if roots.is_empty() {
            report
                .warnings
                .push("No root steps found - all steps have dependencies".to_string());
            return;
        }

        let mut reachable = HashSet::new();
        let mut queue = VecDeque::from(roots);
        while let Some(current) = queue.pop_front() {
            if reachable.insert(current.clone()) {
                for dependent in graph.dependents(&current) {
                    if !reachable.contains(&dependent) {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        for step_id in workflow.steps.keys() {
            if !reachable.contains(step_id) {
                report
                    .warnings
                    .push(format!("Step '{}' is unreachable", step_id));
            }
        }
    }

    /// Every step marked parallel usually means missing dependencies.
    fn check_parallel_hints(&self, workflow: &Workflow, report: &mut ValidationReport) {
        if workflow.steps.len() > 1 && workflow.steps.values().all(|s| s.parallel) {
            report.warnings.push(
                "Every step is marked parallel; check whether dependencies are missing"
                    .to_string(),
            );
        }
    }
}

/// Queryable graph view over a workflow's dependency relation.
pub struct DependencyGraph {
    graph: Graph<String, ()>,
    indices: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn from_workflow(workflow: &Workflow) -> Self {
        let mut graph = Graph::new();
        let mut indices = HashMap::new();

        for step_id in workflow.steps.keys() {
            let node = graph.add_node(step_id.clone());
            indices.insert(step_id.clone(), node);
        }
        for (step_id, step) in &workflow.steps {
            let step_node = indices[step_id];
            for dep in &step.depends_on {
                if let Some(&dep_node) = indices.get(dep) {
                    graph.add_edge(dep_node, step_node, ());
                }
            }
        }

        Self { graph, indices }
    }

    pub fn dependents(&self, step_id: &str) -> Vec<String> {
        match self.indices.get(step_id) {
            Some(&node) => self
                .graph
                .neighbors_directed(node, Direction::Outgoing)
                .map(|n| self.graph[n].clone())
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn dependencies(&self, step_id: &str) -> Vec<String> {
        match self.indices.get(step_id) {
            Some(&node) => self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .map(|n| self.graph[n].clone())
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn roots(&self) -> Vec<String> {
        self.indices
            .iter()
            .filter_map(|(id, &node)| {
                self.graph
                    .neighbors_directed(node, Direction::Incoming)
                    .next()
                    .is_none()
                    .then(|| id.clone())
            })
            .collect()
    }
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            is_valid: true,
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.to_string()).collect()
    }
}

impl Default for WorkflowValidator {
    fn default() -> Self {
        Self::new()
    }
}
