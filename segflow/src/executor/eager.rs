//! Eager execution: every step materializes its full output.
//!
//! Steps become ready once all of their upstream steps have produced an
//! output. Ready steps are polled concurrently on the calling task and each
//! step runs at most once per invocation.

use super::RunContext;
use crate::cache::{CacheEntry, CachePayload};
use crate::core::{concat_batches, RunMode, StepData};
use crate::errors::{Result, SegflowError};
use crate::events::names;
use crate::pipeline::Pipeline;
use crate::step::Step;
use crate::units::Unit;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

pub(super) async fn run(
    ctx: &RunContext,
    pipeline: &Pipeline,
    target: &str,
    run_mode: RunMode,
    external: &StepData,
) -> Result<StepData> {
    let plan = pipeline.plan_for(target)?;
    debug!(steps = plan.len(), "eager plan resolved");

    // Track in-degree (number of upstream steps without output) for each step
    let mut in_degree: HashMap<&str, usize> = HashMap::with_capacity(plan.len());
    for name in &plan {
        in_degree.insert(*name, pipeline.get_step(name)?.distinct_upstream().len());
    }

    let mut outputs: HashMap<String, StepData> = HashMap::with_capacity(plan.len());
    let mut active = FuturesUnordered::new();

    for name in plan.iter().filter(|name| in_degree[*name] == 0) {
        let step = Arc::clone(pipeline.step_handle(name)?);
        let inputs = step.resolve_inputs(external, &HashMap::new())?;
        active.push(execute_step(ctx, step, inputs, run_mode));
    }

    // Dropping `active` on an early return abandons every sibling still running.
    while let Some(result) = active.next().await {
        let (name, output) = result?;
        outputs.insert(name.clone(), output);

        for child in pipeline.downstream_of(&name) {
            let Some(count) = in_degree.get_mut(child) else {
                continue;
            };
            *count = count.saturating_sub(1);
            if *count > 0 {
                continue;
            }

            let step = Arc::clone(pipeline.step_handle(child)?);
            let upstream: HashMap<&str, &StepData> = step
                .distinct_upstream()
                .into_iter()
                .filter_map(|u| outputs.get(u).map(|out| (u, out)))
                .collect();
            let inputs = step.resolve_inputs(external, &upstream)?;
            active.push(execute_step(ctx, step, inputs, run_mode));
        }
    }

    outputs.remove(target).ok_or_else(|| {
        SegflowError::Internal(format!("step '{target}' never became ready"))
    })
}

async fn execute_step(
    ctx: &RunContext,
    step: Arc<Step>,
    inputs: StepData,
    run_mode: RunMode,
) -> Result<(String, StepData)> {
    let name = step.name().to_string();
    let policy = *step.cache();
    let fingerprint = policy
        .is_enabled()
        .then(|| ctx.fingerprint(&step, run_mode, &inputs));

    if let (Some(fingerprint), true) = (&fingerprint, policy.reuse_if_present) {
        if let Some(entry) = ctx.lookup(&name, fingerprint).await? {
            debug!(step = %name, %fingerprint, "cache hit");
            ctx.emit(names::STEP_CACHE_HIT, &name, json!({ "fingerprint": fingerprint }));
            let output = match entry.payload {
                CachePayload::Materialized(data) => data,
                CachePayload::Batches(batches) => concat_batches(batches),
            };
            return Ok((name, output));
        }
    }

    let Unit::Eager(unit) = step.unit() else {
        return Err(SegflowError::Internal(format!(
            "step '{name}' has a streaming unit in an eager pipeline"
        )));
    };

    ctx.emit(names::STEP_STARTED, &name, json!({ "unit": unit.name() }));
    let started = Instant::now();
    let result = match run_mode {
        RunMode::Fit => unit.fit_transform(inputs).await,
        RunMode::Transform => unit.transform(inputs).await,
    };
    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

    let output = match result {
        Ok(output) => output,
        Err(source) => {
            error!(step = %name, error = %source, "unit failed");
            ctx.emit(
                names::STEP_FAILED,
                &name,
                json!({ "error": source.to_string(), "duration_ms": duration_ms }),
            );
            return Err(SegflowError::unit_failure(name, source));
        }
    };

    if let (Some(fingerprint), true) = (fingerprint, policy.persist) {
        ctx.store(&CacheEntry::materialized(&name, fingerprint, output.clone()))
            .await?;
    }

    let mut keys: Vec<&String> = output.keys().collect();
    keys.sort();
    ctx.emit(
        names::STEP_COMPLETED,
        &name,
        json!({ "duration_ms": duration_ms, "keys": keys }),
    );
    Ok((name, output))
}
