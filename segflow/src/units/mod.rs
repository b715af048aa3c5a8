//! The capability contract every processing unit implements.
//!
//! A unit is the swappable worker inside a step. Eager units map one named
//! input map to one named output map; streaming units map a lazy stream of
//! input batches to a lazy stream of output batches. A pipeline picks one
//! implementation per step when it is built, never while it runs.

mod identity;

pub use identity::Identity;

use crate::core::{ExecutionMode, InputStream, OutputStream, StepData};
use crate::errors::UnitError;
use async_trait::async_trait;
use futures::StreamExt;
use std::fmt::{self, Debug};
use std::sync::Arc;

/// An eager processing unit.
#[async_trait]
pub trait Transformer: Send + Sync + Debug {
    /// Returns a short label for logs (usually the implementation's name).
    fn name(&self) -> &str;

    /// Applies the unit to fully materialized inputs.
    async fn transform(&self, inputs: StepData) -> Result<StepData, UnitError>;

    /// Fits the unit on its inputs, then applies it.
    ///
    /// Stateless units keep the default, which only applies.
    async fn fit_transform(&self, inputs: StepData) -> Result<StepData, UnitError> {
        self.transform(inputs).await
    }
}

/// A streaming processing unit.
///
/// The returned stream must be lazy: it may only pull from `inputs` when it
/// is itself polled.
pub trait StreamTransformer: Send + Sync + Debug {
    /// Returns a short label for logs.
    fn name(&self) -> &str;

    /// Wires the unit between an input batch stream and an output batch stream.
    fn transform_stream(&self, inputs: InputStream) -> OutputStream;
}

/// A step's processing unit, in one of the two execution flavors.
#[derive(Clone)]
pub enum Unit {
    /// Materializes its whole output.
    Eager(Arc<dyn Transformer>),
    /// Produces a lazy batch stream.
    Streaming(Arc<dyn StreamTransformer>),
}

impl Unit {
    /// Wraps an eager transformer.
    pub fn eager(transformer: impl Transformer + 'static) -> Self {
        Self::Eager(Arc::new(transformer))
    }

    /// Wraps a streaming transformer.
    pub fn streaming(transformer: impl StreamTransformer + 'static) -> Self {
        Self::Streaming(Arc::new(transformer))
    }

    /// Lifts an eager transformer into a streaming unit applied batch by batch.
    pub fn per_batch(transformer: impl Transformer + 'static) -> Self {
        Self::Streaming(Arc::new(PerBatch::new(Arc::new(transformer))))
    }

    /// A pass-through unit for the requested mode.
    #[must_use]
    pub fn identity(mode: ExecutionMode) -> Self {
        match mode {
            ExecutionMode::Eager => Self::eager(Identity),
            ExecutionMode::Streaming => Self::streaming(Identity),
        }
    }

    /// Returns the execution mode this unit supports.
    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        match self {
            Self::Eager(_) => ExecutionMode::Eager,
            Self::Streaming(_) => ExecutionMode::Streaming,
        }
    }

    /// Returns the unit's label.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Eager(t) => t.name(),
            Self::Streaming(t) => t.name(),
        }
    }

    /// Returns true if both handles point at the same unit instance.
    #[must_use]
    pub fn same_instance(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Eager(a), Self::Eager(b)) => Arc::ptr_eq(a, b),
            (Self::Streaming(a), Self::Streaming(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Debug for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unit")
            .field("mode", &self.mode())
            .field("name", &self.name())
            .finish()
    }
}

/// Applies an eager transformer to every batch of a stream.
#[derive(Debug, Clone)]
pub struct PerBatch {
    inner: Arc<dyn Transformer>,
}

impl PerBatch {
    /// Creates a per-batch adapter around an eager transformer.
    #[must_use]
    pub fn new(inner: Arc<dyn Transformer>) -> Self {
        Self { inner }
    }
}

impl StreamTransformer for PerBatch {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn transform_stream(&self, inputs: InputStream) -> OutputStream {
        let inner = Arc::clone(&self.inner);
        inputs
            .then(move |batch| {
                let inner = Arc::clone(&inner);
                async move { inner.transform(batch).await }
            })
            .boxed()
    }
}

/// A closure-based eager unit.
pub struct FnTransformer<F>
where
    F: Fn(StepData) -> Result<StepData, UnitError> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnTransformer<F>
where
    F: Fn(StepData) -> Result<StepData, UnitError> + Send + Sync,
{
    /// Creates a new closure-based unit.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnTransformer<F>
where
    F: Fn(StepData) -> Result<StepData, UnitError> + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTransformer")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F> Transformer for FnTransformer<F>
where
    F: Fn(StepData) -> Result<StepData, UnitError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn transform(&self, inputs: StepData) -> Result<StepData, UnitError> {
        (self.func)(inputs)
    }
}
