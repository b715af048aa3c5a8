//! Integration tests for pipeline construction and execution.

#[cfg(test)]
mod tests {
    use crate::cache::{CacheStore, DiskCache, InMemoryCache};
    use crate::core::{drain, ExecutionMode, RunMode, StepData};
    use crate::errors::SegflowError;
    use crate::events::{names, CollectingEventSink};
    use crate::executor::Executor;
    use crate::pipeline::{Pipeline, PipelineBuilder};
    use crate::segmentation::{build_pipeline, steps, PipelineKind};
    use crate::step::{Adapter, CachePolicy, Source, Step, StreamCaching};
    use crate::testing::{
        cached_config, uncached_config, ChunkingStream, EndlessStream, FailingUnit, MockUnit,
        StubCatalog, TestBundle,
    };
    use crate::units::{FnTransformer, Identity, PerBatch, Transformer, Unit};
    use futures::StreamExt;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    fn data(pairs: &[(&str, Value)]) -> StepData {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn ints(value: &Value) -> Vec<i64> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_i64().unwrap())
            .collect()
    }

    fn mock(unit: &Arc<MockUnit>) -> Unit {
        Unit::Eager(Arc::clone(unit) as Arc<dyn Transformer>)
    }

    /// `a` reads `x`; `b` adds one, `c` adds two, `d` sums both.
    fn diamond(a: &Arc<MockUnit>, policy: CachePolicy) -> Pipeline {
        let add = |n: i64| {
            move |inputs: StepData| -> Result<StepData, anyhow::Error> {
                let v = inputs["v"].as_i64().unwrap_or_default();
                Ok(data(&[("out", json!(v + n))]))
            }
        };
        PipelineBuilder::new("diamond", ExecutionMode::Eager)
            .step(
                Step::new("a", mock(a))
                    .with_external_inputs(["x"])
                    .with_cache(policy),
            )
            .unwrap()
            .step(
                Step::new("b", Unit::eager(FnTransformer::new("plus_one", add(1))))
                    .with_upstream(["a"])
                    .with_adapter(Adapter::new().route("v", Source::step("a", "x"))),
            )
            .unwrap()
            .step(
                Step::new("c", Unit::eager(FnTransformer::new("plus_two", add(2))))
                    .with_upstream(["a"])
                    .with_adapter(Adapter::new().route("v", Source::step("a", "x"))),
            )
            .unwrap()
            .step(
                Step::new(
                    "d",
                    Unit::eager(FnTransformer::new("sum", |inputs: StepData| {
                        let total: i64 = inputs.values().filter_map(Value::as_i64).sum();
                        Ok(data(&[("total", json!(total))]))
                    })),
                )
                .with_upstream(["b", "c"])
                .with_adapter(
                    Adapter::new()
                        .route("left", Source::step("b", "out"))
                        .route("right", Source::step("c", "out")),
                ),
            )
            .unwrap()
            .build("d")
            .unwrap()
    }

    #[tokio::test]
    async fn test_loader_model_scenario() {
        let loader = FnTransformer::new("double", |inputs: StepData| {
            let doubled: Vec<i64> = ints(&inputs["raw"]).into_iter().map(|x| x * 2).collect();
            Ok(data(&[("datagen", json!(doubled))]))
        });
        let model = FnTransformer::new("sum", |inputs: StepData| {
            let total: i64 = ints(&inputs["datagen"]).into_iter().sum();
            Ok(data(&[("prediction", json!(total))]))
        });
        let pipeline = PipelineBuilder::new("scenario", ExecutionMode::Eager)
            .step(
                Step::new("loader", Unit::eager(loader))
                    .with_external_inputs(["raw"])
                    .with_adapter(Adapter::new().route("raw", Source::external("raw"))),
            )
            .unwrap()
            .step(Step::new("model", Unit::eager(model)).with_upstream(["loader"]))
            .unwrap()
            .build("model")
            .unwrap();

        let output = Executor::new()
            .transform(&pipeline, &data(&[("raw", json!([1, 2, 3]))]))
            .await
            .unwrap();

        assert_eq!(output, data(&[("prediction", json!(12))]));
    }

    #[tokio::test]
    async fn test_diamond_runs_shared_ancestor_once() {
        let a = Arc::new(MockUnit::passthrough("source"));
        let pipeline = diamond(&a, CachePolicy::disabled());

        let output = Executor::new()
            .transform(&pipeline, &data(&[("x", json!(10))]))
            .await
            .unwrap();

        assert_eq!(output["total"], json!(23));
        assert_eq!(a.call_count(), 1);
    }

    #[tokio::test]
    async fn test_run_until_touches_only_ancestors() {
        let a = Arc::new(MockUnit::passthrough("source"));
        let pipeline = diamond(&a, CachePolicy::disabled());
        let sink = Arc::new(CollectingEventSink::new());
        let executor = Executor::new().with_event_sink(sink.clone());

        let output = executor
            .run_until(&pipeline, "b", RunMode::Transform, &data(&[("x", json!(1))]))
            .await
            .unwrap();

        assert_eq!(output["out"], json!(2));
        assert_eq!(sink.count(names::STEP_COMPLETED), 2);
        assert!(sink.types_for_step("c").is_empty());
    }

    #[tokio::test]
    async fn test_cache_idempotence() {
        let a = Arc::new(MockUnit::passthrough("source"));
        let pipeline = diamond(&a, CachePolicy::persist_and_reuse());
        let cache = Arc::new(InMemoryCache::new());
        let sink = Arc::new(CollectingEventSink::new());
        let executor = Executor::new()
            .with_cache(cache.clone())
            .with_event_sink(sink.clone());
        let bundle = data(&[("x", json!(5))]);

        let first = executor.transform(&pipeline, &bundle).await.unwrap();
        let second = executor.transform(&pipeline, &bundle).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(a.call_count(), 1);
        assert_eq!(cache.entries_for("a"), 1);
        assert_eq!(sink.count(names::STEP_CACHE_HIT), 1);

        executor
            .transform(&pipeline, &data(&[("x", json!(6))]))
            .await
            .unwrap();
        assert_eq!(a.call_count(), 2);
    }

    #[tokio::test]
    async fn test_fit_and_transform_use_separate_entries() {
        let a = Arc::new(MockUnit::passthrough("source"));
        let pipeline = diamond(&a, CachePolicy::persist_and_reuse());
        let executor = Executor::new().with_cache(Arc::new(InMemoryCache::new()));
        let bundle = data(&[("x", json!(5))]);

        executor.fit_transform(&pipeline, &bundle).await.unwrap();
        executor.transform(&pipeline, &bundle).await.unwrap();

        assert_eq!(a.fit_count(), 1);
        assert_eq!(a.call_count(), 2);
    }

    #[tokio::test]
    async fn test_persist_only_and_reuse_only() {
        let cache = Arc::new(InMemoryCache::new());
        let executor = Executor::new().with_cache(cache.clone());
        let bundle = data(&[("x", json!(5))]);

        let writer = Arc::new(MockUnit::passthrough("source"));
        let pipeline = diamond(&writer, CachePolicy::persist_only());
        executor.transform(&pipeline, &bundle).await.unwrap();
        executor.transform(&pipeline, &bundle).await.unwrap();
        assert_eq!(writer.call_count(), 2);
        assert_eq!(cache.entries_for("a"), 1);

        let reader = Arc::new(MockUnit::passthrough("source"));
        let pipeline = diamond(&reader, CachePolicy::reuse_only());
        executor.transform(&pipeline, &bundle).await.unwrap();
        assert_eq!(reader.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unet_inference_output() {
        let catalog = StubCatalog::new();
        let pipeline =
            build_pipeline(PipelineKind::Unet, &uncached_config(false), &catalog, false).unwrap();

        let output = Executor::new()
            .transform(&pipeline, &TestBundle::new().build())
            .await
            .unwrap();

        assert_eq!(ints(&output["y_pred"]), vec![3, 5, 7, 9, 11]);
        assert_eq!(ints(&output["y_scores"]), vec![2, 4, 6, 8, 10]);
        // Listed twice upstream of the loader, run once.
        assert_eq!(catalog.calls("xy_split"), 1);
        assert_eq!(catalog.calls("loader"), 1);
    }

    #[tokio::test]
    async fn test_unet_train_reads_validation_split() {
        let catalog = StubCatalog::new();
        let pipeline =
            build_pipeline(PipelineKind::Unet, &uncached_config(false), &catalog, true).unwrap();
        let executor = Executor::new();

        let output = executor
            .fit_transform(&pipeline, &TestBundle::new().train_mode(true).build())
            .await
            .unwrap();
        assert_eq!(ints(&output["y_pred"]), vec![3, 5, 7, 9, 11]);
        assert_eq!(catalog.calls("xy_split"), 2);

        let err = executor
            .fit_transform(&pipeline, &TestBundle::new().without("meta_valid").build())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SegflowError::MissingExternalInput { ref step, ref key }
                if step == steps::XY_INFERENCE && key == "meta_valid"
        ));
    }

    #[tokio::test]
    async fn test_refinement_disabled_wiring() {
        let catalog = StubCatalog::new();
        let pipeline =
            build_pipeline(PipelineKind::Unet, &uncached_config(false), &catalog, false).unwrap();

        let edges = pipeline.edges();
        assert!(edges.contains(&(steps::UNET.to_string(), steps::MASK_RESIZE.to_string())));
        assert!(edges.iter().all(|(from, to)| from != steps::DENSE_CRF && to != steps::DENSE_CRF));

        let mut config = uncached_config(false);
        config.postprocessor.crf.apply_crf = true;
        let refined = build_pipeline(PipelineKind::Unet, &config, &catalog, false).unwrap();
        let output = Executor::new()
            .transform(&refined, &TestBundle::new().build())
            .await
            .unwrap();
        // The stub CRF adds one before the category mapper adds another.
        assert_eq!(ints(&output["y_pred"]), vec![4, 6, 8, 10, 12]);
    }

    #[tokio::test]
    async fn test_variant_isolation_and_shared_cache() {
        let catalog = StubCatalog::new();
        let config = cached_config(false);
        let cache = Arc::new(InMemoryCache::new());
        let executor = Executor::new().with_cache(cache.clone());
        let bundle = TestBundle::new().build();

        let plain = build_pipeline(PipelineKind::Unet, &config, &catalog, false).unwrap();
        let weighted = build_pipeline(PipelineKind::UnetWeighted, &config, &catalog, false).unwrap();

        let plain_out = executor.transform(&plain, &bundle).await.unwrap();
        let weighted_out = executor.transform(&weighted, &bundle).await.unwrap();

        assert_eq!(ints(&plain_out["y_pred"]), vec![3, 5, 7, 9, 11]);
        assert_eq!(ints(&weighted_out["y_pred"]), vec![4, 7, 10, 13, 16]);

        // The splitter is shared and served from the cache; patched steps ran.
        assert_eq!(catalog.calls("xy_split"), 1);
        assert_eq!(catalog.calls("loader"), 1);
        assert_eq!(catalog.calls("loader_distances"), 1);
        assert_eq!(catalog.calls("unet_weighted"), 1);
        assert_eq!(cache.entries_for(steps::LOADER), 2);

        // The base pipeline is untouched by the derivation.
        assert_eq!(plain.get_step(steps::LOADER).unwrap().unit().name(), "loader");
        assert_eq!(plain.get_step(steps::UNET).unwrap().unit().name(), "unet");

        let again = executor.transform(&plain, &bundle).await.unwrap();
        assert_eq!(again, plain_out);
        assert_eq!(catalog.calls("unet"), 1);
    }

    #[tokio::test]
    async fn test_streaming_matches_eager() {
        for apply_crf in [false, true] {
            for kind in PipelineKind::all() {
                let mut eager_config = uncached_config(false);
                let mut stream_config = uncached_config(true);
                eager_config.postprocessor.crf.apply_crf = apply_crf;
                stream_config.postprocessor.crf.apply_crf = apply_crf;

                let eager = build_pipeline(kind, &eager_config, &StubCatalog::new(), false).unwrap();
                let streaming =
                    build_pipeline(kind, &stream_config, &StubCatalog::new(), false).unwrap();
                let bundle = TestBundle::new().build();

                let executor = Executor::new();
                let expected = executor.transform(&eager, &bundle).await.unwrap();
                let actual = executor.run(&streaming, &bundle).await.unwrap();

                assert_eq!(actual, expected, "{kind} (crf: {apply_crf})");
            }
        }
    }

    #[tokio::test]
    async fn test_streaming_batches_follow_loader() {
        let catalog = StubCatalog::new();
        let pipeline =
            build_pipeline(PipelineKind::Unet, &uncached_config(true), &catalog, false).unwrap();

        let batches: Vec<_> = Executor::new()
            .stream(&pipeline, &TestBundle::new().build())
            .unwrap()
            .collect()
            .await;

        // Five images in batches of two.
        assert_eq!(batches.len(), 3);
        let last = batches[2].as_ref().unwrap();
        assert_eq!(ints(&last["y_pred"]), vec![11]);
        assert_eq!(catalog.calls("unet"), 3);
        assert_eq!(catalog.calls("xy_split"), 1);
    }

    #[tokio::test]
    async fn test_stream_cancellation_stops_producers() {
        let source = EndlessStream::new();
        let emitted = source.emitted_counter();
        let pipeline = PipelineBuilder::new("endless", ExecutionMode::Streaming)
            .step(Step::new("source", Unit::streaming(source)))
            .unwrap()
            .step(Step::new("sink", Unit::streaming(Identity)).with_upstream(["source"]))
            .unwrap()
            .build("sink")
            .unwrap();

        let mut stream = Executor::new().stream(&pipeline, &StepData::new()).unwrap();
        for tick in 0..3 {
            let batch = stream.next().await.unwrap().unwrap();
            assert_eq!(batch["tick"], json!(tick));
        }
        drop(stream);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_drop = emitted.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(emitted.load(Ordering::SeqCst), after_drop);
        // Bounded channels keep the source a few batches ahead at most.
        assert!(after_drop <= 8, "source ran ahead: {after_drop}");
    }

    #[tokio::test]
    async fn test_failure_attribution_eager() {
        let catalog = StubCatalog::new().failing("labeler");
        let cache = Arc::new(InMemoryCache::new());
        let sink = Arc::new(CollectingEventSink::new());
        let executor = Executor::new()
            .with_cache(cache.clone())
            .with_event_sink(sink.clone());
        let pipeline =
            build_pipeline(PipelineKind::Unet, &cached_config(false), &catalog, false).unwrap();

        let err = executor
            .transform(&pipeline, &TestBundle::new().build())
            .await
            .unwrap_err();

        assert!(matches!(err, SegflowError::UnitExecutionFailure { .. }));
        assert_eq!(err.step(), Some(steps::LABELER));
        assert!(err.to_string().contains("labeler exploded"));
        assert_eq!(cache.entries_for(steps::LABELER), 0);
        assert_eq!(cache.entries_for(steps::MASK_EROSION), 1);
        assert_eq!(cache.entries_for(steps::SCORE_BUILDER), 0);
        assert_eq!(sink.count(names::STEP_FAILED), 1);
        assert_eq!(catalog.calls("mask_dilator"), 0);
    }

    #[tokio::test]
    async fn test_failure_attribution_streaming() {
        let catalog = StubCatalog::new().failing("labeler");
        let pipeline =
            build_pipeline(PipelineKind::Unet, &uncached_config(true), &catalog, false).unwrap();

        let err = Executor::new()
            .run(&pipeline, &TestBundle::new().build())
            .await
            .unwrap_err();

        assert_eq!(err.step(), Some(steps::LABELER));
    }

    #[tokio::test]
    async fn test_corrupted_disk_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskCache::new(dir.path());
        let a = Arc::new(MockUnit::passthrough("source"));
        let pipeline = diamond(&a, CachePolicy::persist_and_reuse());
        let sink = Arc::new(CollectingEventSink::new());
        let executor = Executor::new()
            .with_disk_cache(dir.path())
            .with_event_sink(sink.clone());
        let bundle = data(&[("x", json!(3))]);

        let expected = executor.transform(&pipeline, &bundle).await.unwrap();
        let entries: Vec<_> = std::fs::read_dir(disk.step_dir("a"))
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(entries.len(), 1);
        std::fs::write(&entries[0], "{ not json").unwrap();

        let recovered = executor.transform(&pipeline, &bundle).await.unwrap();
        assert_eq!(recovered, expected);
        assert_eq!(a.call_count(), 2);
        assert_eq!(sink.count(names::CACHE_CORRUPTED), 1);

        // The recompute overwrote the damaged entry.
        executor.transform(&pipeline, &bundle).await.unwrap();
        assert_eq!(a.call_count(), 2);
        let fingerprint = entries[0].file_stem().unwrap().to_str().unwrap();
        assert!(disk.get("a", fingerprint).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_materialized_streaming_cache() {
        let unit = Arc::new(MockUnit::new("negate", |inputs: StepData| {
            let negated: Vec<i64> = ints(&inputs["datagen"]).into_iter().map(|x| -x).collect();
            Ok(data(&[("out", json!(negated))]))
        }));
        let cache = Arc::new(InMemoryCache::new());
        let pipeline = PipelineBuilder::new("materialize", ExecutionMode::Streaming)
            .step(
                Step::new(
                    "loader",
                    Unit::streaming(ChunkingStream::new("loader", "X", "datagen", 1)),
                )
                .with_external_inputs(["X"]),
            )
            .unwrap()
            .step(
                Step::new(
                    "negate",
                    Unit::streaming(PerBatch::new(Arc::clone(&unit) as Arc<dyn Transformer>)),
                )
                .with_upstream(["loader"])
                .with_cache(CachePolicy::persist_and_reuse().with_streaming(StreamCaching::Materialize)),
            )
            .unwrap()
            .build("negate")
            .unwrap();
        let executor = Executor::new().with_cache(cache.clone());
        let bundle = data(&[("X", json!([1, 2, 3]))]);

        let first = executor.run(&pipeline, &bundle).await.unwrap();
        let second = executor.run(&pipeline, &bundle).await.unwrap();

        assert_eq!(first["out"], json!([-1, -2, -3]));
        assert_eq!(first, second);
        assert_eq!(unit.call_count(), 3);
        assert_eq!(cache.entries_for("negate"), 1);
    }

    #[tokio::test]
    async fn test_materialized_step_not_persisted_after_upstream_failure() {
        let flaky = MockUnit::new("flaky", |inputs: StepData| -> Result<StepData, anyhow::Error> {
            if inputs["datagen"] == json!([2]) {
                anyhow::bail!("bad batch");
            }
            Ok(inputs)
        });
        let cache = Arc::new(InMemoryCache::new());
        let pipeline = PipelineBuilder::new("materialize_failure", ExecutionMode::Streaming)
            .step(
                Step::new(
                    "loader",
                    Unit::streaming(ChunkingStream::new("loader", "X", "datagen", 1)),
                )
                .with_external_inputs(["X"]),
            )
            .unwrap()
            .step(
                Step::new("flaky", Unit::streaming(PerBatch::new(Arc::new(flaky))))
                    .with_upstream(["loader"]),
            )
            .unwrap()
            .step(
                Step::new("mat", Unit::streaming(Identity))
                    .with_upstream(["flaky"])
                    .with_cache(
                        CachePolicy::persist_and_reuse().with_streaming(StreamCaching::Materialize),
                    ),
            )
            .unwrap()
            .build("mat")
            .unwrap();
        let executor = Executor::new().with_cache(cache.clone());

        let err = executor
            .run(&pipeline, &data(&[("X", json!([1, 2, 3]))]))
            .await
            .unwrap_err();

        assert_eq!(err.step(), Some("flaky"));
        assert_eq!(cache.entries_for("mat"), 0);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_bypassed_streaming_cache() {
        let catalog = StubCatalog::new();
        let cache = Arc::new(InMemoryCache::new());
        let pipeline =
            build_pipeline(PipelineKind::Unet, &cached_config(true), &catalog, false).unwrap();
        let executor = Executor::new().with_cache(cache.clone());

        executor.run(&pipeline, &TestBundle::new().build()).await.unwrap();

        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_mode_mismatch() {
        let catalog = StubCatalog::new();
        let eager =
            build_pipeline(PipelineKind::Unet, &uncached_config(false), &catalog, false).unwrap();
        let streaming =
            build_pipeline(PipelineKind::Unet, &uncached_config(true), &catalog, false).unwrap();
        let executor = Executor::new();
        let bundle = TestBundle::new().build();

        let Err(err) = executor.stream(&eager, &bundle) else {
            panic!("streaming an eager pipeline must fail");
        };
        assert!(matches!(err, SegflowError::ModeMismatch { .. }));

        let err = executor.transform(&streaming, &bundle).await.unwrap_err();
        assert!(matches!(
            err,
            SegflowError::ModeMismatch { ref expected, ref requested, .. }
                if expected == "streaming" && requested == "eager"
        ));
    }

    #[tokio::test]
    async fn test_missing_output_key() {
        let pipeline = PipelineBuilder::new("missing", ExecutionMode::Eager)
            .step(Step::new("a", Unit::eager(Identity)).with_external_inputs(["x"]))
            .unwrap()
            .step(
                Step::new("b", Unit::eager(Identity))
                    .with_upstream(["a"])
                    .with_adapter(Adapter::new().route("v", Source::step("a", "nope"))),
            )
            .unwrap()
            .build("b")
            .unwrap();

        let err = Executor::new()
            .transform(&pipeline, &data(&[("x", json!(1))]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SegflowError::MissingOutputKey { ref step, ref source_step, ref key }
                if step == "b" && source_step == "a" && key == "nope"
        ));
    }

    #[tokio::test]
    async fn test_missing_external_input_streaming() {
        let pipeline =
            build_pipeline(PipelineKind::Unet, &uncached_config(true), &StubCatalog::new(), false)
                .unwrap();

        let Err(err) = Executor::new().stream(&pipeline, &TestBundle::new().without("meta").build())
        else {
            panic!("a root step without its input must fail at start-up");
        };
        assert!(matches!(err, SegflowError::MissingExternalInput { ref key, .. } if key == "meta"));

        let err = Executor::new()
            .run(&pipeline, &TestBundle::new().without("target_sizes").build())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SegflowError::MissingExternalInput { ref step, .. } if step == steps::MASK_RESIZE
        ));
    }

    #[tokio::test]
    async fn test_misaligned_streams() {
        let pipeline = PipelineBuilder::new("misaligned", ExecutionMode::Streaming)
            .step(
                Step::new("ones", Unit::streaming(ChunkingStream::new("ones", "X", "datagen", 1)))
                    .with_external_inputs(["X"]),
            )
            .unwrap()
            .step(
                Step::new("pairs", Unit::streaming(ChunkingStream::new("pairs", "X", "datagen", 2)))
                    .with_external_inputs(["X"]),
            )
            .unwrap()
            .step(
                Step::new("join", Unit::streaming(Identity))
                    .with_upstream(["ones", "pairs"])
                    .with_adapter(
                        Adapter::new()
                            .route("left", Source::step("ones", "datagen"))
                            .route("right", Source::step("pairs", "datagen")),
                    ),
            )
            .unwrap()
            .build("join")
            .unwrap();

        let stream = Executor::new()
            .stream(&pipeline, &data(&[("X", json!([1, 2, 3]))]))
            .unwrap();
        let err = drain(stream).await.unwrap_err();

        assert!(matches!(err, SegflowError::StreamMisaligned { ref step } if step == "join"));
    }

    #[tokio::test]
    async fn test_streaming_unit_failure_keeps_first_error() {
        let pipeline = PipelineBuilder::new("failing", ExecutionMode::Streaming)
            .step(
                Step::new("loader", Unit::streaming(ChunkingStream::new("loader", "X", "datagen", 1)))
                    .with_external_inputs(["X"]),
            )
            .unwrap()
            .step(
                Step::new("broken", Unit::streaming(FailingUnit::new("broken", "bad batch")))
                    .with_upstream(["loader"]),
            )
            .unwrap()
            .step(
                Step::new("join", Unit::streaming(Identity))
                    .with_upstream(["loader", "broken"]),
            )
            .unwrap()
            .build("join")
            .unwrap();

        let err = Executor::new()
            .run(&pipeline, &data(&[("X", json!([1, 2, 3]))]))
            .await
            .unwrap_err();

        assert_eq!(err.step(), Some("broken"));
    }
}
