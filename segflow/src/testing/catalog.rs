//! A deterministic unit catalog for graph and executor tests.
//!
//! Every stub maps integers element-wise, so chunking a stream never
//! changes the concatenated result and eager and streaming runs of the
//! same graph produce the same output.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::mocks::{ChunkingStream, FailingUnit};
use crate::core::{ExecutionMode, StepData};
use crate::errors::{Result, UnitError};
use crate::segmentation::{UnitCatalog, UnitKind};
use crate::units::{Transformer, Unit};

type CallCounts = Arc<Mutex<HashMap<&'static str, usize>>>;

/// One output key computed element-wise from one input key.
#[derive(Debug, Clone, Copy)]
struct Route {
    output: &'static str,
    input: &'static str,
    op: fn(i64) -> i64,
    /// Wraps the result in a one-element array, like a splitter does.
    nested: bool,
}

const fn route(output: &'static str, input: &'static str, op: fn(i64) -> i64) -> Route {
    Route {
        output,
        input,
        op,
        nested: false,
    }
}

const fn nested(output: &'static str, input: &'static str, op: fn(i64) -> i64) -> Route {
    Route {
        output,
        input,
        op,
        nested: true,
    }
}

fn same(x: i64) -> i64 {
    x
}

fn double(x: i64) -> i64 {
    x * 2
}

fn triple(x: i64) -> i64 {
    x * 3
}

fn increment(x: i64) -> i64 {
    x + 1
}

fn negate(x: i64) -> i64 {
    -x
}

/// The stub's outputs for each kind.
fn routes(kind: &UnitKind) -> Vec<Route> {
    match kind {
        UnitKind::XySplit { .. } => vec![nested("X", "meta", same), nested("y", "meta", negate)],
        UnitKind::Loader { .. } => vec![route("datagen", "X", same)],
        UnitKind::Model { weighted: false, .. } => {
            vec![route("multichannel_map_prediction", "datagen", double)]
        }
        UnitKind::Model { weighted: true, .. } => {
            vec![route("multichannel_map_prediction", "datagen", triple)]
        }
        UnitKind::DenseCrf { .. } => vec![route("crf_images", "images", increment)],
        UnitKind::Resizer => vec![route("resized_images", "images", same)],
        UnitKind::CategoryMapper => vec![route("categorized_images", "images", increment)],
        UnitKind::MaskEroder { .. } => vec![route("eroded_images", "images", same)],
        UnitKind::Labeler => vec![route("labeled_images", "images", same)],
        UnitKind::MaskDilator { .. } => vec![route("dilated_images", "images", same)],
        UnitKind::ScoreBuilder => vec![
            route("images", "images", same),
            route("scores", "probabilities", same),
        ],
        UnitKind::PredictionCrop { .. } => vec![route("cropped_images", "images", same)],
    }
}

/// Applies `op` to every integer in `value`, recursing into arrays.
fn map_ints(value: &Value, op: fn(i64) -> i64) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(|v| map_ints(v, op)).collect()),
        Value::Number(n) => n.as_i64().map_or_else(|| value.clone(), |x| Value::from(op(x))),
        other => other.clone(),
    }
}

/// An eager stub unit.
#[derive(Debug)]
struct StubUnit {
    label: &'static str,
    routes: Vec<Route>,
    calls: CallCounts,
}

#[async_trait]
impl Transformer for StubUnit {
    fn name(&self) -> &str {
        self.label
    }

    async fn transform(&self, inputs: StepData) -> Result<StepData, UnitError> {
        *self.calls.lock().entry(self.label).or_default() += 1;
        self.routes
            .iter()
            .map(|r| -> Result<(String, Value), UnitError> {
                let value = inputs
                    .get(r.input)
                    .ok_or_else(|| anyhow::anyhow!("{}: missing input '{}'", self.label, r.input))?;
                let mapped = map_ints(value, r.op);
                let mapped = if r.nested { Value::Array(vec![mapped]) } else { mapped };
                Ok((r.output.to_string(), mapped))
            })
            .collect()
    }
}

/// Builds stub units and counts how often each one runs.
///
/// Eager pipelines get element-wise stubs. Streaming pipelines get the same
/// stubs lifted per batch, except loaders, which split `X` into batches of
/// `batch_size` items.
#[derive(Debug, Default)]
pub struct StubCatalog {
    calls: CallCounts,
    failing: HashSet<&'static str>,
}

impl StubCatalog {
    /// Creates a catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every unit with this label fail.
    #[must_use]
    pub fn failing(mut self, label: &'static str) -> Self {
        self.failing.insert(label);
        self
    }

    /// Returns how often units with this label ran (per batch when streaming).
    #[must_use]
    pub fn calls(&self, label: &str) -> usize {
        self.calls.lock().get(label).copied().unwrap_or(0)
    }

    /// Returns the total number of unit invocations.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }
}

impl UnitCatalog for StubCatalog {
    fn build(&self, kind: &UnitKind, mode: ExecutionMode) -> Result<Unit> {
        let label = kind.label();
        if self.failing.contains(label) {
            let unit = FailingUnit::new(label, format!("{label} exploded"));
            return Ok(match mode {
                ExecutionMode::Eager => Unit::eager(unit),
                ExecutionMode::Streaming => Unit::streaming(unit),
            });
        }

        let stub = StubUnit {
            label,
            routes: routes(kind),
            calls: Arc::clone(&self.calls),
        };
        Ok(match (mode, kind) {
            (ExecutionMode::Eager, _) => Unit::eager(stub),
            (ExecutionMode::Streaming, UnitKind::Loader { batch_size, .. }) => {
                Unit::streaming(ChunkingStream::new(label, "X", "datagen", *batch_size))
            }
            (ExecutionMode::Streaming, _) => Unit::per_batch(stub),
        })
    }
}
