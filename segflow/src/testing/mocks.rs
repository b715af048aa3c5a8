//! Mock units for testing.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::core::{InputStream, OutputStream, StepData};
use crate::errors::UnitError;
use crate::units::{StreamTransformer, Transformer};

type UnitFn = Arc<dyn Fn(StepData) -> Result<StepData, UnitError> + Send + Sync>;

/// An eager unit that records its calls and delegates to a closure.
pub struct MockUnit {
    name: String,
    func: UnitFn,
    calls: Mutex<usize>,
    fit_calls: Mutex<usize>,
    inputs: Mutex<Vec<StepData>>,
}

impl MockUnit {
    /// Creates a mock computing its outputs with `func`.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(StepData) -> Result<StepData, UnitError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
            calls: Mutex::new(0),
            fit_calls: Mutex::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Creates a mock returning its inputs.
    #[must_use]
    pub fn passthrough(name: impl Into<String>) -> Self {
        Self::new(name, Ok)
    }

    /// Returns the number of invocations, fitting or not.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }

    /// Returns the number of `fit_transform` invocations.
    #[must_use]
    pub fn fit_count(&self) -> usize {
        *self.fit_calls.lock()
    }

    /// Returns the inputs of every invocation.
    #[must_use]
    pub fn recorded_inputs(&self) -> Vec<StepData> {
        self.inputs.lock().clone()
    }

    fn invoke(&self, inputs: StepData) -> Result<StepData, UnitError> {
        *self.calls.lock() += 1;
        self.inputs.lock().push(inputs.clone());
        (self.func)(inputs)
    }
}

impl fmt::Debug for MockUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockUnit")
            .field("name", &self.name)
            .field("calls", &self.call_count())
            .finish()
    }
}

#[async_trait]
impl Transformer for MockUnit {
    fn name(&self) -> &str {
        &self.name
    }

    async fn transform(&self, inputs: StepData) -> Result<StepData, UnitError> {
        self.invoke(inputs)
    }

    async fn fit_transform(&self, inputs: StepData) -> Result<StepData, UnitError> {
        *self.fit_calls.lock() += 1;
        self.invoke(inputs)
    }
}

/// A unit that always fails, in both modes.
#[derive(Debug)]
pub struct FailingUnit {
    name: String,
    error: String,
}

impl FailingUnit {
    /// Creates a failing unit.
    #[must_use]
    pub fn new(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: error.into(),
        }
    }
}

#[async_trait]
impl Transformer for FailingUnit {
    fn name(&self) -> &str {
        &self.name
    }

    async fn transform(&self, _inputs: StepData) -> Result<StepData, UnitError> {
        Err(anyhow::anyhow!("{}", self.error))
    }
}

impl StreamTransformer for FailingUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform_stream(&self, inputs: InputStream) -> OutputStream {
        let error = self.error.clone();
        inputs
            .map(move |_| Err(anyhow::anyhow!("{error}")))
            .boxed()
    }
}

/// Splits the array under `input` into batches of `batch_size` items.
///
/// The streaming counterpart of a data loader: one input batch becomes
/// `ceil(len / batch_size)` output batches under `output`.
#[derive(Debug, Clone)]
pub struct ChunkingStream {
    name: String,
    input: String,
    output: String,
    batch_size: usize,
    emitted: Arc<AtomicUsize>,
}

impl ChunkingStream {
    /// Creates a chunking unit.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        input: impl Into<String>,
        output: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            name: name.into(),
            input: input.into(),
            output: output.into(),
            batch_size: batch_size.max(1),
            emitted: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns the number of batches produced so far.
    #[must_use]
    pub fn emitted(&self) -> usize {
        self.emitted.load(Ordering::SeqCst)
    }

    /// Returns a handle that keeps counting after the unit is moved.
    #[must_use]
    pub fn emitted_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.emitted)
    }
}

impl StreamTransformer for ChunkingStream {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform_stream(&self, inputs: InputStream) -> OutputStream {
        let Self {
            input,
            output,
            batch_size,
            emitted,
            ..
        } = self.clone();
        inputs
            .flat_map(move |batch| {
                let chunks: Vec<Result<StepData, UnitError>> = match batch.get(&input).and_then(|v| v.as_array()) {
                    Some(items) => items
                        .chunks(batch_size)
                        .map(|chunk| Ok(StepData::from([(output.clone(), Value::Array(chunk.to_vec()))])))
                        .collect(),
                    None => vec![Err(anyhow::anyhow!("input '{input}' is not an array"))],
                };
                let emitted = Arc::clone(&emitted);
                stream::iter(chunks).inspect(move |_| {
                    emitted.fetch_add(1, Ordering::SeqCst);
                })
            })
            .boxed()
    }
}

/// A streaming source that never ends.
///
/// Emits `{"tick": n}` for n = 0, 1, 2, ... once its first input arrives.
#[derive(Debug, Clone, Default)]
pub struct EndlessStream {
    emitted: Arc<AtomicUsize>,
}

impl EndlessStream {
    /// Creates an endless source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle to the number of batches produced so far.
    #[must_use]
    pub fn emitted_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.emitted)
    }
}

impl StreamTransformer for EndlessStream {
    fn name(&self) -> &str {
        "EndlessStream"
    }

    fn transform_stream(&self, inputs: InputStream) -> OutputStream {
        let emitted = Arc::clone(&self.emitted);
        inputs
            .take(1)
            .flat_map(move |_| {
                let emitted = Arc::clone(&emitted);
                stream::iter(0_u64..).map(move |tick| {
                    emitted.fetch_add(1, Ordering::SeqCst);
                    Ok(StepData::from([("tick".to_string(), Value::from(tick))]))
                })
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn data(key: &str, value: Value) -> StepData {
        StepData::from([(key.to_string(), value)])
    }

    #[tokio::test]
    async fn test_mock_unit_counts_calls() {
        let unit = MockUnit::passthrough("mock");

        unit.transform(data("x", json!(1))).await.unwrap();
        unit.fit_transform(data("x", json!(2))).await.unwrap();

        assert_eq!(unit.call_count(), 2);
        assert_eq!(unit.fit_count(), 1);
        assert_eq!(unit.recorded_inputs()[1], data("x", json!(2)));
    }

    #[tokio::test]
    async fn test_failing_unit() {
        let unit = FailingUnit::new("fail", "boom");
        let err = Transformer::transform(&unit, StepData::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn test_chunking_stream() {
        let unit = ChunkingStream::new("loader", "X", "datagen", 2);
        let inputs = stream::iter(vec![data("X", json!([1, 2, 3, 4, 5]))]).boxed();

        let batches: Vec<_> = unit
            .transform_stream(inputs)
            .map(Result::unwrap)
            .collect()
            .await;

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2], data("datagen", json!([5])));
        assert_eq!(unit.emitted(), 3);
    }

    #[tokio::test]
    async fn test_endless_stream_is_lazy() {
        let unit = EndlessStream::new();
        let counter = unit.emitted_counter();
        let inputs = stream::iter(vec![StepData::new()]).boxed();

        let first: Vec<_> = unit.transform_stream(inputs).take(3).collect().await;

        assert_eq!(first.len(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
