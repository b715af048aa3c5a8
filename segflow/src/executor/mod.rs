//! Pipeline execution.
//!
//! One [`Executor`] serves any number of pipelines. It owns the cache
//! store, the fingerprinting policy and the event sink; every invocation
//! gets its own run id for log correlation.
//!
//! - Eager pipelines are run with [`Executor::transform`],
//!   [`Executor::fit_transform`] or [`Executor::run_until`].
//! - Streaming pipelines are run with [`Executor::stream`] or
//!   [`Executor::stream_until`], which return a lazy [`BatchStream`].

mod eager;
mod streaming;

use crate::cache::{CacheEntry, CacheStore, ContentFingerprinter, DiskCache, Fingerprinter};
use crate::core::{drain, BatchStream, ExecutionMode, RunMode, StepData};
use crate::errors::{Result, SegflowError};
use crate::events::{names, EventSink, NoOpEventSink};
use crate::pipeline::Pipeline;
use crate::step::Step;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

/// Runs pipelines against a cache and an event sink.
#[derive(Debug, Clone)]
pub struct Executor {
    cache: Option<Arc<dyn CacheStore>>,
    fingerprinter: Arc<dyn Fingerprinter>,
    event_sink: Arc<dyn EventSink>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    /// Creates an executor without a cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache: None,
            fingerprinter: Arc::new(ContentFingerprinter),
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the cache store.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Uses a [`DiskCache`] rooted at `root`.
    #[must_use]
    pub fn with_disk_cache(self, root: impl Into<PathBuf>) -> Self {
        self.with_cache(Arc::new(DiskCache::new(root)))
    }

    /// Sets the fingerprinting policy.
    #[must_use]
    pub fn with_fingerprinter(mut self, fingerprinter: Arc<dyn Fingerprinter>) -> Self {
        self.fingerprinter = fingerprinter;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Returns true if a cache store is configured.
    #[must_use]
    pub fn has_cache(&self) -> bool {
        self.cache.is_some()
    }

    /// Applies an eager pipeline to `external` and returns the terminal output.
    ///
    /// # Errors
    ///
    /// Any resolution, unit or cache failure aborts the run.
    pub async fn transform(&self, pipeline: &Pipeline, external: &StepData) -> Result<StepData> {
        self.run_until(pipeline, pipeline.terminal(), RunMode::Transform, external).await
    }

    /// Fits and applies an eager pipeline.
    ///
    /// # Errors
    ///
    /// Any resolution, unit or cache failure aborts the run.
    pub async fn fit_transform(&self, pipeline: &Pipeline, external: &StepData) -> Result<StepData> {
        self.run_until(pipeline, pipeline.terminal(), RunMode::Fit, external).await
    }

    /// Runs an eager pipeline up to `target`, touching only its ancestors.
    ///
    /// # Errors
    ///
    /// `UnknownStepName` for a bad target, `ModeMismatch` for a streaming
    /// pipeline, and any failure raised while running the ancestors.
    pub async fn run_until(
        &self,
        pipeline: &Pipeline,
        target: &str,
        run_mode: RunMode,
        external: &StepData,
    ) -> Result<StepData> {
        ensure_mode(pipeline, ExecutionMode::Eager)?;
        let ctx = self.context(pipeline);
        let span = info_span!("segflow.run", pipeline = %pipeline.name(), run_id = %ctx.run_id, %run_mode, terminal = %target);
        eager::run(&ctx, pipeline, target, run_mode, external)
            .instrument(span)
            .await
    }

    /// Starts a streaming pipeline and returns its terminal batch stream.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// `ModeMismatch` for an eager pipeline, or a resolution error for a
    /// root step. Failures after start-up arrive as the stream's last item.
    pub fn stream(&self, pipeline: &Pipeline, external: &StepData) -> Result<BatchStream> {
        self.stream_until(pipeline, pipeline.terminal(), external)
    }

    /// Starts a streaming pipeline up to `target`.
    ///
    /// # Errors
    ///
    /// See [`Executor::stream`].
    pub fn stream_until(&self, pipeline: &Pipeline, target: &str, external: &StepData) -> Result<BatchStream> {
        ensure_mode(pipeline, ExecutionMode::Streaming)?;
        let ctx = self.context(pipeline);
        streaming::start(ctx, pipeline, target, external)
    }

    /// Applies a pipeline in whichever mode it was built for.
    ///
    /// Streaming output is drained into one map.
    ///
    /// # Errors
    ///
    /// The first failure of the run.
    pub async fn run(&self, pipeline: &Pipeline, external: &StepData) -> Result<StepData> {
        match pipeline.mode() {
            ExecutionMode::Eager => self.transform(pipeline, external).await,
            ExecutionMode::Streaming => drain(self.stream(pipeline, external)?).await,
        }
    }

    fn context(&self, pipeline: &Pipeline) -> RunContext {
        RunContext {
            run_id: Uuid::new_v4().to_string(),
            pipeline: pipeline.name().to_string(),
            cache: self.cache.clone(),
            fingerprinter: Arc::clone(&self.fingerprinter),
            event_sink: Arc::clone(&self.event_sink),
        }
    }
}

fn ensure_mode(pipeline: &Pipeline, expected: ExecutionMode) -> Result<()> {
    if pipeline.mode() == expected {
        return Ok(());
    }
    Err(SegflowError::ModeMismatch {
        pipeline: pipeline.name().to_string(),
        expected: pipeline.mode().to_string(),
        requested: expected.to_string(),
    })
}

/// Per-invocation services shared by every step of one run.
#[derive(Debug, Clone)]
pub(crate) struct RunContext {
    run_id: String,
    pipeline: String,
    cache: Option<Arc<dyn CacheStore>>,
    fingerprinter: Arc<dyn Fingerprinter>,
    event_sink: Arc<dyn EventSink>,
}

impl RunContext {
    fn emit(&self, event_type: &str, step: &str, extra: Value) {
        let mut data = json!({
            "step": step,
            "pipeline": self.pipeline,
            "run_id": self.run_id,
        });
        if let (Some(target), Value::Object(extra)) = (data.as_object_mut(), extra) {
            target.extend(extra);
        }
        self.event_sink.emit(event_type, Some(data));
    }

    fn fingerprint(&self, step: &Step, run_mode: RunMode, inputs: &StepData) -> String {
        self.fingerprinter
            .fingerprint(step.name(), step.unit().name(), run_mode, inputs)
    }

    /// Reads a cached result; a corrupted entry counts as a miss.
    async fn lookup(&self, step: &str, fingerprint: &str) -> Result<Option<CacheEntry>> {
        let Some(cache) = &self.cache else {
            return Ok(None);
        };
        match cache.get(step, fingerprint).await {
            Ok(entry) => Ok(entry),
            Err(err @ SegflowError::CacheCorruption { .. }) => {
                warn!(step, fingerprint, error = %err, "ignoring corrupted cache entry");
                self.emit(names::CACHE_CORRUPTED, step, json!({ "fingerprint": fingerprint }));
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn store(&self, entry: &CacheEntry) -> Result<()> {
        match &self.cache {
            Some(cache) => cache.put(entry).await,
            None => Ok(()),
        }
    }
}
