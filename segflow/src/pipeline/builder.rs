//! Pipeline builder with validation.

use super::Pipeline;
use crate::core::ExecutionMode;
use crate::errors::{ContractErrorInfo, CycleDetectedError, PipelineValidationError};
use crate::step::Step;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use tracing::debug;

static STEP_NAME: OnceLock<Option<Regex>> = OnceLock::new();

/// Returns true if `name` is usable as a step name (and cache directory).
#[must_use]
pub fn is_valid_step_name(name: &str) -> bool {
    STEP_NAME
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(name))
}

/// Builder for creating validated pipelines.
///
/// Steps may be added in any order. Per-step checks (name, mode, adapter)
/// run on insertion; graph checks (missing upstream, cycles) run in
/// [`PipelineBuilder::build`].
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    /// The pipeline name.
    name: String,
    /// The mode every unit must match.
    mode: ExecutionMode,
    /// The steps, shared by reference with any pipeline built from them.
    steps: HashMap<String, Arc<Step>>,
    /// Insertion order for steps.
    step_order: Vec<String>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>, mode: ExecutionMode) -> Self {
        Self {
            name: name.into(),
            mode,
            steps: HashMap::new(),
            step_order: Vec::new(),
        }
    }

    pub(super) fn from_parts(
        name: String,
        mode: ExecutionMode,
        steps: HashMap<String, Arc<Step>>,
        step_order: Vec<String>,
    ) -> Self {
        Self {
            name,
            mode,
            steps,
            step_order,
        }
    }

    /// Renames the pipeline being built.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Adds a step, consuming and returning the builder.
    ///
    /// # Errors
    ///
    /// Returns an error if the step fails validation.
    pub fn step(mut self, step: Step) -> Result<Self, PipelineValidationError> {
        self.add_step(step)?;
        Ok(self)
    }

    /// Adds a step.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or taken, the unit does not
    /// match the pipeline's mode, or the adapter is inconsistent.
    pub fn add_step(&mut self, step: Step) -> Result<(), PipelineValidationError> {
        if self.steps.contains_key(step.name()) {
            return Err(PipelineValidationError::new(format!(
                "Step '{}' is already defined",
                step.name()
            ))
            .with_steps(vec![step.name().to_string()])
            .with_error_info(
                ContractErrorInfo::new(
                    "CONTRACT-004-DUPLICATE",
                    format!("Duplicate step name '{}'", step.name()),
                )
                .with_fix_hint("Rename one of the steps; names are cache keys."),
            ));
        }
        validate_step(&step, self.mode)?;

        debug!(pipeline = %self.name, step = %step.name(), "step added");
        self.step_order.push(step.name().to_string());
        self.steps.insert(step.name().to_string(), Arc::new(step));
        Ok(())
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the execution mode.
    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if a step with this name was added.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    /// Builds the pipeline rooted at `terminal`.
    ///
    /// Steps that the terminal does not (transitively) depend on are left
    /// out of the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the builder is empty, the terminal or an upstream
    /// reference is unknown, or the graph has a cycle.
    pub fn build(self, terminal: &str) -> Result<Pipeline, PipelineValidationError> {
        if self.steps.is_empty() {
            return Err(PipelineValidationError::new("Pipeline has no steps").with_error_info(
                ContractErrorInfo::new("CONTRACT-004-EMPTY", "Cannot build an empty pipeline"),
            ));
        }
        if !self.steps.contains_key(terminal) {
            return Err(missing_dependency("<terminal>", terminal));
        }

        for name in &self.step_order {
            let step = &self.steps[name];
            for upstream in step.upstream() {
                if !self.steps.contains_key(upstream) {
                    return Err(missing_dependency(name, upstream));
                }
            }
        }

        self.detect_cycles()?;

        let reachable = ancestors(&self.steps, terminal);
        let pruned: Vec<&String> = self
            .step_order
            .iter()
            .filter(|name| !reachable.contains(name.as_str()))
            .collect();
        if !pruned.is_empty() {
            debug!(pipeline = %self.name, terminal, ?pruned, "dropping steps unreachable from terminal");
        }

        let step_order: Vec<String> = self
            .step_order
            .iter()
            .filter(|name| reachable.contains(name.as_str()))
            .cloned()
            .collect();
        let steps: HashMap<String, Arc<Step>> = self
            .steps
            .into_iter()
            .filter(|(name, _)| reachable.contains(name.as_str()))
            .collect();

        Ok(Pipeline::new(self.name, self.mode, steps, step_order, terminal.to_string()))
    }

    /// Detects cycles in the dependency graph.
    fn detect_cycles(&self) -> Result<(), CycleDetectedError> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for name in &self.step_order {
            if !visited.contains(name) {
                if let Some(cycle) = self.dfs_cycle(name, &mut visited, &mut rec_stack, &mut path) {
                    return Err(CycleDetectedError::new(cycle));
                }
            }
        }

        Ok(())
    }

    fn dfs_cycle(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        visited.insert(node.to_string());
        rec_stack.insert(node.to_string());
        path.push(node.to_string());

        if let Some(step) = self.steps.get(node) {
            for dep in step.upstream() {
                if !visited.contains(dep) {
                    if let Some(cycle) = self.dfs_cycle(dep, visited, rec_stack, path) {
                        return Some(cycle);
                    }
                } else if rec_stack.contains(dep) {
                    let cycle_start = path.iter().position(|n| n == dep).unwrap_or(0);
                    let mut cycle: Vec<String> = path[cycle_start..].to_vec();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
            }
        }

        path.pop();
        rec_stack.remove(node);
        None
    }
}

/// Per-step checks shared by the builder and the pipeline patch operations.
pub(super) fn validate_step(step: &Step, mode: ExecutionMode) -> Result<(), PipelineValidationError> {
    if !is_valid_step_name(step.name()) {
        return Err(PipelineValidationError::new(format!(
            "Invalid step name '{}'",
            step.name()
        ))
        .with_steps(vec![step.name().to_string()])
        .with_error_info(ContractErrorInfo::new(
            "CONTRACT-004-NAME",
            "Step names must be identifiers",
        )));
    }

    if step.upstream().iter().any(|u| u == step.name()) {
        return Err(CycleDetectedError::new(vec![step.name().to_string(), step.name().to_string()]).into());
    }

    if step.mode() != mode {
        return Err(PipelineValidationError::new(format!(
            "Step '{}' has a {} unit but the pipeline is {}",
            step.name(),
            step.mode(),
            mode
        ))
        .with_steps(vec![step.name().to_string()])
        .with_error_info(
            ContractErrorInfo::new("CONTRACT-004-MODE", "Unit does not match the execution mode")
                .with_context_entry("unit", step.unit().name()),
        ));
    }

    if let Some(adapter) = step.adapter() {
        if let Some(target) = adapter.duplicate_target() {
            return Err(PipelineValidationError::new(format!(
                "Adapter of step '{}' routes input '{target}' more than once",
                step.name()
            ))
            .with_steps(vec![step.name().to_string()])
            .with_error_info(ContractErrorInfo::new(
                "CONTRACT-004-ADAPTER",
                "Each input key needs exactly one source",
            )));
        }
    }
    step.check_adapter_sources()?;

    Ok(())
}

fn missing_dependency(step: &str, dep: &str) -> PipelineValidationError {
    PipelineValidationError::new(format!("Step '{step}' depends on unknown step '{dep}'"))
        .with_steps(vec![step.to_string(), dep.to_string()])
        .with_error_info(
            ContractErrorInfo::new("CONTRACT-004-MISSING_DEP", format!("Dependency '{dep}' not found"))
                .with_fix_hint("Add the upstream step to the pipeline before building."),
        )
}

/// Returns `root` and every step it transitively depends on.
pub(super) fn ancestors(steps: &HashMap<String, Arc<Step>>, root: &str) -> HashSet<String> {
    let mut seen = HashSet::new();
    let mut stack = vec![root.to_string()];
    while let Some(name) = stack.pop() {
        if let Some(step) = steps.get(&name) {
            stack.extend(step.upstream().iter().cloned());
        }
        seen.insert(name);
    }
    seen
}
