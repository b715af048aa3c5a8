//! Declarative routing of upstream and external values into a step's inputs.

use crate::core::StepData;
use crate::errors::{Result, SegflowError};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A one-argument function applied to a resolved value before delivery.
pub type PostFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Where an adapter entry reads its value from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Source {
    /// A named output of an upstream step.
    Step {
        /// The upstream step name.
        step: String,
        /// The output key of that step.
        key: String,
    },
    /// A field of the external input bundle.
    External {
        /// The field name.
        field: String,
    },
}

impl Source {
    /// Addresses an upstream step's output.
    pub fn step(step: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Step {
            step: step.into(),
            key: key.into(),
        }
    }

    /// Addresses an external bundle field.
    pub fn external(field: impl Into<String>) -> Self {
        Self::External {
            field: field.into(),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step { step, key } => write!(f, "{step}.{key}"),
            Self::External { field } => write!(f, "<external>.{field}"),
        }
    }
}

/// One routing rule.
#[derive(Clone)]
pub struct AdapterEntry {
    /// The input key the step's unit receives.
    pub target: String,
    /// Where the value comes from.
    pub source: Source,
    /// Optional post-processing of the resolved value.
    pub post: Option<PostFn>,
}

impl fmt::Debug for AdapterEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterEntry")
            .field("target", &self.target)
            .field("source", &self.source)
            .field("post", &self.post.is_some())
            .finish()
    }
}

/// Maps a step's expected input keys to their sources.
///
/// Entries keep insertion order. Target keys are unique; the builder rejects
/// an adapter that routes the same key twice.
#[derive(Debug, Clone, Default)]
pub struct Adapter {
    entries: Vec<AdapterEntry>,
}

impl Adapter {
    /// Creates an empty adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes `target` from `source`.
    #[must_use]
    pub fn route(mut self, target: impl Into<String>, source: Source) -> Self {
        self.entries.push(AdapterEntry {
            target: target.into(),
            source,
            post: None,
        });
        self
    }

    /// Routes `target` from `source`, applying `post` to the resolved value.
    #[must_use]
    pub fn route_with<F>(mut self, target: impl Into<String>, source: Source, post: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.entries.push(AdapterEntry {
            target: target.into(),
            source,
            post: Some(Arc::new(post)),
        });
        self
    }

    /// Returns the routing entries.
    #[must_use]
    pub fn entries(&self) -> &[AdapterEntry] {
        &self.entries
    }

    /// Returns the first target key routed more than once, if any.
    #[must_use]
    pub fn duplicate_target(&self) -> Option<&str> {
        let mut seen = std::collections::HashSet::new();
        self.entries
            .iter()
            .find(|entry| !seen.insert(entry.target.as_str()))
            .map(|entry| entry.target.as_str())
    }

    /// Returns the source routed into `target`.
    #[must_use]
    pub fn source_of(&self, target: &str) -> Option<&Source> {
        self.entries
            .iter()
            .find(|entry| entry.target == target)
            .map(|entry| &entry.source)
    }

    /// Resolves the step's inputs entry by entry.
    ///
    /// `upstream` maps step names to their (already computed) outputs.
    ///
    /// # Errors
    ///
    /// `MissingOutputKey` when a step source or its key is absent,
    /// `MissingExternalInput` when an external field is absent.
    pub fn resolve(
        &self,
        step: &str,
        external: &StepData,
        upstream: &HashMap<&str, &StepData>,
    ) -> Result<StepData> {
        let mut inputs = StepData::with_capacity(self.entries.len());
        for entry in &self.entries {
            let value = match &entry.source {
                Source::Step { step: source_step, key } => upstream
                    .get(source_step.as_str())
                    .and_then(|outputs| outputs.get(key))
                    .cloned()
                    .ok_or_else(|| SegflowError::MissingOutputKey {
                        step: step.to_string(),
                        source_step: source_step.clone(),
                        key: key.clone(),
                    })?,
                Source::External { field } => {
                    external
                        .get(field)
                        .cloned()
                        .ok_or_else(|| SegflowError::MissingExternalInput {
                            step: step.to_string(),
                            key: field.clone(),
                        })?
                }
            };
            let value = match &entry.post {
                Some(post) => post(value),
                None => value,
            };
            inputs.insert(entry.target.clone(), value);
        }
        Ok(inputs)
    }
}

/// Removes one level of nesting from single-element arrays.
///
/// `[[1, 2, 3]]` becomes `[1, 2, 3]`; anything else is returned unchanged.
#[must_use]
pub fn squeeze(value: Value) -> Value {
    match value {
        Value::Array(mut items) if items.len() == 1 => items.remove(0),
        other => other,
    }
}
