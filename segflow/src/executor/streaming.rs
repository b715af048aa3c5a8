//! Streaming execution: every step turns a lazy batch stream into another.
//!
//! Each step of the plan runs as one producer task. A producer pulls the
//! zip of its upstream subscriptions (one per distinct upstream step),
//! resolves every zipped item through the step's adapter and forwards the
//! unit's output batches to one bounded channel per consumer. A root step
//! receives a single input batch resolved from the external bundle.
//!
//! The first failure anywhere is kept in a shared slot and becomes the last
//! item of the terminal stream. Dropping the terminal stream aborts every
//! producer.

use super::RunContext;
use crate::cache::{CacheEntry, CachePayload};
use crate::core::{BatchStream, InputStream, OutputStream, RunMode, StepData};
use crate::errors::{Result, SegflowError};
use crate::events::names;
use crate::pipeline::Pipeline;
use crate::step::{Step, StreamCaching};
use crate::units::{StreamTransformer, Unit};
use futures::future;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info_span, Instrument};

/// Batches a producer may run ahead of its slowest consumer.
const CHANNEL_CAPACITY: usize = 1;

/// Holds the first error raised by any producer of a run.
#[derive(Debug, Clone, Default)]
struct FailureSlot(Arc<Mutex<Option<SegflowError>>>);

impl FailureSlot {
    /// Records `err` unless an earlier failure is already recorded.
    fn record(&self, err: SegflowError) {
        let mut slot = self.0.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn is_set(&self) -> bool {
        self.0.lock().is_some()
    }

    fn take(&self) -> Option<SegflowError> {
        self.0.lock().take()
    }
}

/// Aborts the producer tasks when the terminal stream is dropped.
#[derive(Debug, Default)]
struct AbortOnDrop(Vec<JoinHandle<()>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Everything one producer task owns.
struct Producer {
    ctx: RunContext,
    step: Arc<Step>,
    unit: Arc<dyn StreamTransformer>,
    inputs: InputStream,
    consumers: Vec<mpsc::Sender<StepData>>,
    failure: FailureSlot,
}

pub(super) fn start(
    ctx: RunContext,
    pipeline: &Pipeline,
    target: &str,
    external: &StepData,
) -> Result<BatchStream> {
    let plan = pipeline.plan_for(target)?;
    let external = Arc::new(external.clone());
    let failure = FailureSlot::default();

    // One channel per (consumer, distinct upstream) pair, plus the terminal one.
    let mut senders: HashMap<&str, Vec<mpsc::Sender<StepData>>> = HashMap::new();
    let mut receivers: HashMap<&str, Vec<(String, mpsc::Receiver<StepData>)>> = HashMap::new();
    for &name in &plan {
        for upstream in pipeline.get_step(name)?.distinct_upstream() {
            let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
            senders.entry(upstream).or_default().push(tx);
            receivers
                .entry(name)
                .or_default()
                .push((upstream.to_string(), rx));
        }
    }
    let (terminal_tx, mut terminal_rx) = mpsc::channel(CHANNEL_CAPACITY);
    senders.entry(target).or_default().push(terminal_tx);

    let span = info_span!("segflow.stream", pipeline = %pipeline.name(), run_id = %ctx.run_id, terminal = %target);
    let mut producers = Vec::with_capacity(plan.len());
    for &name in &plan {
        let step = Arc::clone(pipeline.step_handle(name)?);
        let Unit::Streaming(unit) = step.unit().clone() else {
            return Err(SegflowError::Internal(format!(
                "step '{name}' has an eager unit in a streaming pipeline"
            )));
        };

        let inputs = match receivers.remove(name) {
            Some(subscriptions) => zip_upstream(
                Arc::clone(&step),
                subscriptions,
                Arc::clone(&external),
                failure.clone(),
            ),
            None => {
                let batch = step.resolve_inputs(&external, &HashMap::new())?;
                stream::once(future::ready(batch)).boxed()
            }
        };

        producers.push(Producer {
            ctx: ctx.clone(),
            step,
            unit,
            inputs,
            consumers: senders.remove(name).unwrap_or_default(),
            failure: failure.clone(),
        });
    }

    let guard = AbortOnDrop(
        producers
            .into_iter()
            .map(|producer| tokio::spawn(producer.run().instrument(span.clone())))
            .collect(),
    );

    let batches = stream::poll_fn(move |cx| terminal_rx.poll_recv(cx)).map(Ok);
    let tail = stream::once(async move {
        let mut guard = guard;
        for handle in &mut guard.0 {
            if let Err(join_error) = handle.await {
                if join_error.is_panic() {
                    failure.record(SegflowError::Internal(format!(
                        "streaming producer panicked: {join_error}"
                    )));
                }
            }
        }
        failure.take()
    })
    .filter_map(future::ready)
    .map(Err);

    Ok(batches.chain(tail).boxed())
}

/// Zips one subscription per distinct upstream step into resolved inputs.
fn zip_upstream(
    step: Arc<Step>,
    subscriptions: Vec<(String, mpsc::Receiver<StepData>)>,
    external: Arc<StepData>,
    failure: FailureSlot,
) -> InputStream {
    stream::unfold(subscriptions, move |mut subscriptions| {
        let step = Arc::clone(&step);
        let external = Arc::clone(&external);
        let failure = failure.clone();
        async move {
            let mut received: Vec<(String, StepData)> = Vec::with_capacity(subscriptions.len());
            let mut ended = 0;
            for (upstream, rx) in &mut subscriptions {
                match rx.recv().await {
                    Some(batch) => received.push((upstream.clone(), batch)),
                    None => ended += 1,
                }
            }

            if ended > 0 {
                if ended < subscriptions.len() {
                    failure.record(SegflowError::StreamMisaligned {
                        step: step.name().to_string(),
                    });
                }
                return None;
            }

            let upstream: HashMap<&str, &StepData> =
                received.iter().map(|(name, batch)| (name.as_str(), batch)).collect();
            match step.resolve_inputs(&external, &upstream) {
                Ok(inputs) => Some((inputs, subscriptions)),
                Err(err) => {
                    failure.record(err);
                    None
                }
            }
        }
    })
    .boxed()
}

impl Producer {
    async fn run(self) {
        let Self {
            ctx,
            step,
            unit,
            inputs,
            mut consumers,
            failure,
        } = self;
        let name = step.name().to_string();
        let policy = *step.cache();

        ctx.emit(names::STEP_STARTED, &name, json!({ "unit": unit.name() }));
        let outcome = if policy.is_enabled() && policy.streaming == StreamCaching::Materialize {
            materialized(&ctx, &step, unit.as_ref(), inputs, &mut consumers, &failure).await
        } else {
            if policy.is_enabled() {
                debug!(step = %name, "streaming step bypasses its cache flags");
            }
            forward(unit.transform_stream(inputs), &name, &mut consumers).await
        };

        match outcome {
            Ok(sent) => {
                if failure.is_set() {
                    // The input ended because an upstream step failed.
                    return;
                }
                ctx.emit(names::STEP_COMPLETED, &name, json!({ "batches": sent }));
            }
            Err(err) => {
                error!(step = %name, error = %err, "streaming step failed");
                ctx.emit(names::STEP_FAILED, &name, json!({ "error": err.to_string() }));
                failure.record(err);
            }
        }
    }
}

/// Forwards output batches until the stream ends or every consumer is gone.
async fn forward(
    mut outputs: OutputStream,
    step: &str,
    consumers: &mut Vec<mpsc::Sender<StepData>>,
) -> Result<usize> {
    let mut sent = 0;
    while let Some(item) = outputs.next().await {
        let batch = item.map_err(|source| SegflowError::unit_failure(step, source))?;
        if !broadcast(consumers, batch).await {
            debug!(step, sent, "all consumers gone, stopping producer");
            break;
        }
        sent += 1;
    }
    Ok(sent)
}

/// Drains the step, serves or fills its cache entry, then re-emits.
///
/// Nothing is computed or persisted once a failure is recorded.
async fn materialized(
    ctx: &RunContext,
    step: &Step,
    unit: &dyn StreamTransformer,
    inputs: InputStream,
    consumers: &mut Vec<mpsc::Sender<StepData>>,
    failure: &FailureSlot,
) -> Result<usize> {
    let name = step.name();
    let policy = step.cache();
    let drained: Vec<StepData> = inputs.collect().await;
    if failure.is_set() {
        debug!(step = %name, "input ended by an upstream failure, skipping");
        return Ok(0);
    }

    let digest_input = StepData::from([(
        "batches".to_string(),
        Value::Array(
            drained
                .iter()
                .map(|batch| Value::Object(batch.clone().into_iter().collect()))
                .collect(),
        ),
    )]);
    let fingerprint = ctx.fingerprint(step, RunMode::Transform, &digest_input);

    let cached = if policy.reuse_if_present {
        ctx.lookup(name, &fingerprint).await?
    } else {
        None
    };
    let batches = match cached {
        Some(entry) => {
            debug!(step = %name, %fingerprint, "cache hit");
            ctx.emit(names::STEP_CACHE_HIT, name, json!({ "fingerprint": fingerprint }));
            match entry.payload {
                CachePayload::Batches(batches) => batches,
                CachePayload::Materialized(data) => vec![data],
            }
        }
        None => {
            let produced: Vec<_> = unit
                .transform_stream(stream::iter(drained).boxed())
                .collect()
                .await;
            let batches = produced
                .into_iter()
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|source| SegflowError::unit_failure(name, source))?;
            if failure.is_set() {
                return Ok(0);
            }
            if policy.persist {
                ctx.store(&CacheEntry::batches(name, fingerprint, batches.clone()))
                    .await?;
            }
            batches
        }
    };

    forward(
        stream::iter(batches.into_iter().map(Ok)).boxed(),
        name,
        consumers,
    )
    .await
}

/// Sends a batch to every live consumer; returns false once none is left.
async fn broadcast(consumers: &mut Vec<mpsc::Sender<StepData>>, batch: StepData) -> bool {
    let mut live = Vec::with_capacity(consumers.len());
    for tx in consumers.drain(..) {
        if tx.send(batch.clone()).await.is_ok() {
            live.push(tx);
        }
    }
    *consumers = live;
    !consumers.is_empty()
}
