//! Immutable, validated step graphs.

use super::builder::{ancestors, validate_step, PipelineBuilder};
use crate::core::ExecutionMode;
use crate::errors::{Result, SegflowError};
use crate::step::{Adapter, Step};
use crate::units::Unit;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// A directed acyclic graph of steps rooted at one terminal step.
///
/// Pipelines never change after they are built. Patch operations return a
/// new pipeline that shares every untouched step with the original by
/// reference, so a variant can never leak into the graph it came from.
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// The pipeline name.
    name: String,
    /// The mode every unit matches.
    mode: ExecutionMode,
    /// Step definitions.
    steps: HashMap<String, Arc<Step>>,
    /// Insertion order, kept for deterministic traversal.
    step_order: Vec<String>,
    /// Execution order (topologically sorted).
    execution_order: Vec<String>,
    /// The step whose output is the pipeline's output.
    terminal: String,
}

impl Pipeline {
    pub(super) fn new(
        name: String,
        mode: ExecutionMode,
        steps: HashMap<String, Arc<Step>>,
        step_order: Vec<String>,
        terminal: String,
    ) -> Self {
        let execution_order = topological_sort(&steps, &step_order);
        Self {
            name,
            mode,
            steps,
            step_order,
            execution_order,
            terminal,
        }
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

    /// Returns the terminal step's name.
    #[must_use]
    pub fn terminal(&self) -> &str {
        &self.terminal
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the pipeline has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns true if a step with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    /// Returns the step names in insertion order.
    #[must_use]
    pub fn step_names(&self) -> &[String] {
        &self.step_order
    }

    /// Returns every step in dependency order.
    #[must_use]
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Looks a step up by name.
    ///
    /// # Errors
    ///
    /// Returns `UnknownStepName` if no such step exists.
    pub fn get_step(&self, name: &str) -> Result<&Step> {
        self.steps
            .get(name)
            .map(AsRef::as_ref)
            .ok_or_else(|| SegflowError::unknown_step(name))
    }

    /// Returns the shared handle of a step.
    ///
    /// # Errors
    ///
    /// Returns `UnknownStepName` if no such step exists.
    pub fn step_handle(&self, name: &str) -> Result<&Arc<Step>> {
        self.steps.get(name).ok_or_else(|| SegflowError::unknown_step(name))
    }

    /// Returns the upstream-to-downstream edges.
    ///
    /// An upstream listed twice by the same step yields two edges.
    #[must_use]
    pub fn edges(&self) -> Vec<(String, String)> {
        self.step_order
            .iter()
            .flat_map(|name| {
                self.steps[name]
                    .upstream()
                    .iter()
                    .map(move |upstream| (upstream.clone(), name.clone()))
            })
            .collect()
    }

    /// Returns the steps that list `name` as upstream, in insertion order.
    #[must_use]
    pub fn downstream_of(&self, name: &str) -> Vec<&str> {
        self.step_order
            .iter()
            .filter(|candidate| self.steps[*candidate].upstream().iter().any(|u| u == name))
            .map(String::as_str)
            .collect()
    }

    /// Returns `target` and its ancestors in dependency order.
    ///
    /// # Errors
    ///
    /// Returns `UnknownStepName` if `target` does not exist.
    pub fn plan_for(&self, target: &str) -> Result<Vec<&str>> {
        if !self.contains(target) {
            return Err(SegflowError::unknown_step(target));
        }
        let needed = ancestors(&self.steps, target);
        Ok(self
            .execution_order
            .iter()
            .filter(|name| needed.contains(name.as_str()))
            .map(String::as_str)
            .collect())
    }

    /// Returns a variant whose step `name` runs `unit`.
    ///
    /// The step keeps its name, upstream list, wiring and cache policy, so
    /// unmodified ancestors keep their cache keys.
    ///
    /// # Errors
    ///
    /// `UnknownStepName` for a bad name, `Validation` if the unit does not
    /// match the pipeline's mode.
    pub fn with_unit(&self, name: &str, unit: Unit) -> Result<Self> {
        self.patch(name, |step| step.replace_unit(unit))
    }

    /// Returns a variant whose step `name` runs `unit` with new wiring.
    ///
    /// Use this when the replacement unit expects different input keys.
    ///
    /// # Errors
    ///
    /// `UnknownStepName` for a bad name, `Validation` if the unit or the new
    /// adapter is inconsistent with the step.
    pub fn with_wiring(
        &self,
        name: &str,
        unit: Unit,
        external_inputs: Vec<String>,
        adapter: Option<Adapter>,
    ) -> Result<Self> {
        self.patch(name, |step| {
            step.replace_unit(unit);
            step.replace_wiring(external_inputs, adapter);
        })
    }

    fn patch(&self, name: &str, apply: impl FnOnce(&mut Step)) -> Result<Self> {
        let mut step = Step::clone(self.step_handle(name)?);
        apply(&mut step);
        validate_step(&step, self.mode)?;

        debug!(pipeline = %self.name, step = %name, unit = %step.unit().name(), "step patched");
        let mut variant = self.clone();
        variant.steps.insert(name.to_string(), Arc::new(step));
        Ok(variant)
    }

    /// Returns the sub-pipeline rooted at `name`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownStepName` if `name` does not exist.
    pub fn subgraph(&self, name: &str) -> Result<Self> {
        if !self.contains(name) {
            return Err(SegflowError::unknown_step(name));
        }
        let keep = ancestors(&self.steps, name);
        let steps = self
            .steps
            .iter()
            .filter(|(step, _)| keep.contains(step.as_str()))
            .map(|(step, handle)| (step.clone(), Arc::clone(handle)))
            .collect();
        let step_order = self
            .step_order
            .iter()
            .filter(|step| keep.contains(step.as_str()))
            .cloned()
            .collect();
        Ok(Self::new(self.name.clone(), self.mode, steps, step_order, name.to_string()))
    }

    /// Returns a copy of this pipeline under a new name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Reopens the pipeline for extension; existing steps stay shared.
    #[must_use]
    pub fn into_builder(self) -> PipelineBuilder {
        PipelineBuilder::from_parts(self.name, self.mode, self.steps, self.step_order)
    }
}

/// Performs topological sort on the step graph.
fn topological_sort(steps: &HashMap<String, Arc<Step>>, step_order: &[String]) -> Vec<String> {
    fn visit(
        node: &str,
        steps: &HashMap<String, Arc<Step>>,
        visited: &mut HashSet<String>,
        result: &mut Vec<String>,
    ) {
        if !visited.insert(node.to_string()) {
            return;
        }
        if let Some(step) = steps.get(node) {
            for dep in step.upstream() {
                visit(dep, steps, visited, result);
            }
        }
        result.push(node.to_string());
    }

    let mut result = Vec::new();
    let mut visited = HashSet::new();

    // Visit in insertion order for determinism
    for name in step_order {
        visit(name, steps, &mut visited, &mut result);
    }

    result
}
