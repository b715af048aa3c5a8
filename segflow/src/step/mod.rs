//! Steps: the named vertices of a pipeline.
//!
//! A step wraps one processing unit together with its wiring: the upstream
//! steps it reads from, the external fields it may read directly, an
//! optional adapter and a cache policy.

mod adapter;
mod policy;

pub use adapter::{squeeze, Adapter, AdapterEntry, PostFn, Source};
pub use policy::{CachePolicy, StreamCaching};

use crate::core::{ExecutionMode, StepData};
use crate::errors::{Result, SegflowError, UndeclaredDependencyError};
use crate::units::Unit;
use std::collections::HashMap;

/// A named graph vertex.
#[derive(Debug, Clone)]
pub struct Step {
    name: String,
    unit: Unit,
    upstream: Vec<String>,
    external_inputs: Vec<String>,
    adapter: Option<Adapter>,
    cache: CachePolicy,
}

impl Step {
    /// Creates a step with no wiring and caching disabled.
    pub fn new(name: impl Into<String>, unit: Unit) -> Self {
        Self {
            name: name.into(),
            unit,
            upstream: Vec::new(),
            external_inputs: Vec::new(),
            adapter: None,
            cache: CachePolicy::default(),
        }
    }

    /// Sets the upstream steps. Repeating a name is allowed.
    #[must_use]
    pub fn with_upstream(mut self, upstream: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.upstream = upstream.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the external fields this step may read.
    #[must_use]
    pub fn with_external_inputs(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.external_inputs = Vec::new();
        for field in fields {
            let field = field.into();
            if !self.external_inputs.contains(&field) {
                self.external_inputs.push(field);
            }
        }
        self
    }

    /// Sets the adapter.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Adapter) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Sets the cache policy.
    #[must_use]
    pub fn with_cache(mut self, cache: CachePolicy) -> Self {
        self.cache = cache;
        self
    }

    /// Returns the step name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the processing unit.
    #[must_use]
    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    /// Returns the upstream step names in declaration order.
    #[must_use]
    pub fn upstream(&self) -> &[String] {
        &self.upstream
    }

    /// Returns the distinct upstream step names in first-seen order.
    #[must_use]
    pub fn distinct_upstream(&self) -> Vec<&str> {
        let mut seen = Vec::with_capacity(self.upstream.len());
        for name in &self.upstream {
            if !seen.contains(&name.as_str()) {
                seen.push(name.as_str());
            }
        }
        seen
    }

    /// Returns the declared external fields.
    #[must_use]
    pub fn external_inputs(&self) -> &[String] {
        &self.external_inputs
    }

    /// Returns the adapter, if any.
    #[must_use]
    pub fn adapter(&self) -> Option<&Adapter> {
        self.adapter.as_ref()
    }

    /// Returns the cache policy.
    #[must_use]
    pub fn cache(&self) -> &CachePolicy {
        &self.cache
    }

    /// Returns the execution mode of the step's unit.
    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.unit.mode()
    }

    pub(crate) fn replace_unit(&mut self, unit: Unit) {
        self.unit = unit;
    }

    pub(crate) fn replace_wiring(&mut self, external_inputs: Vec<String>, adapter: Option<Adapter>) {
        self.external_inputs = external_inputs;
        self.adapter = adapter;
    }

    /// Checks that every adapter source is declared by this step.
    ///
    /// # Errors
    ///
    /// Returns `UndeclaredDependencyError` for the first undeclared source.
    pub fn check_adapter_sources(&self) -> Result<(), UndeclaredDependencyError> {
        let Some(adapter) = &self.adapter else {
            return Ok(());
        };
        for entry in adapter.entries() {
            match &entry.source {
                Source::Step { step, .. } if !self.upstream.contains(step) => {
                    return Err(UndeclaredDependencyError::upstream(&self.name, step));
                }
                Source::External { field } if !self.external_inputs.contains(field) => {
                    return Err(UndeclaredDependencyError::external(&self.name, field));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Builds the unit's named inputs.
    ///
    /// With an adapter, inputs are resolved entry by entry. Without one,
    /// the declared external fields are merged with every upstream output
    /// map in declaration order, later keys overwriting earlier ones.
    ///
    /// # Errors
    ///
    /// `MissingExternalInput` or `MissingOutputKey` when a source is absent.
    pub fn resolve_inputs(
        &self,
        external: &StepData,
        upstream: &HashMap<&str, &StepData>,
    ) -> Result<StepData> {
        if let Some(adapter) = &self.adapter {
            return adapter.resolve(&self.name, external, upstream);
        }

        let mut inputs = StepData::new();
        for field in &self.external_inputs {
            let value = external
                .get(field)
                .cloned()
                .ok_or_else(|| SegflowError::MissingExternalInput {
                    step: self.name.clone(),
                    key: field.clone(),
                })?;
            inputs.insert(field.clone(), value);
        }
        for name in &self.upstream {
            let outputs = upstream.get(name.as_str()).ok_or_else(|| {
                SegflowError::Internal(format!(
                    "step '{}' resolved before its upstream '{name}'",
                    self.name
                ))
            })?;
            inputs.extend(outputs.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Ok(inputs)
    }
}
