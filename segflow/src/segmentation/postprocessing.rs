//! Mask postprocessing chain shared by every variant.

use super::{steps, BuildContext, UnitKind};
use crate::errors::Result;
use crate::pipeline::PipelineBuilder;
use crate::step::{Adapter, CachePolicy, Source, Step};

/// Adds `[dense_crf ->] mask_resize -> ... -> score_builder` after `model`.
///
/// `loader` is read only by `dense_crf`, which is present when
/// `postprocessor.crf.apply_crf` is set. Returns the score builder's name.
///
/// # Errors
///
/// Propagates catalog and validation errors.
pub fn mask_postprocessing(
    builder: &mut PipelineBuilder,
    ctx: &BuildContext<'_>,
    loader: &str,
    model: &str,
) -> Result<&'static str> {
    let post = &ctx.config().postprocessor;
    let cache = ctx.config().execution.cache.postprocessing;
    // Morphology outputs are recomputed on every run.
    let no_reuse = CachePolicy {
        reuse_if_present: false,
        ..cache
    };

    let resize = Step::new(steps::MASK_RESIZE, ctx.unit(&UnitKind::Resizer)?)
        .with_external_inputs(["target_sizes"])
        .with_cache(cache);
    let resize = if post.crf.apply_crf {
        builder.add_step(
            Step::new(
                steps::DENSE_CRF,
                ctx.unit(&UnitKind::DenseCrf {
                    params: post.crf.params.clone(),
                })?,
            )
            .with_upstream([loader, model])
            .with_adapter(
                Adapter::new()
                    .route("images", Source::step(model, "multichannel_map_prediction"))
                    .route("raw_images_generator", Source::step(loader, "datagen")),
            )
            .with_cache(cache),
        )?;
        resize.with_upstream([steps::DENSE_CRF]).with_adapter(
            Adapter::new()
                .route("images", Source::step(steps::DENSE_CRF, "crf_images"))
                .route("target_sizes", Source::external("target_sizes")),
        )
    } else {
        resize.with_upstream([model]).with_adapter(
            Adapter::new()
                .route("images", Source::step(model, "multichannel_map_prediction"))
                .route("target_sizes", Source::external("target_sizes")),
        )
    };
    builder.add_step(resize)?;

    let chain = [
        (steps::CATEGORY_MAPPER, UnitKind::CategoryMapper, steps::MASK_RESIZE, "resized_images", cache),
        (
            steps::MASK_EROSION,
            UnitKind::MaskEroder {
                params: post.mask_erosion.clone(),
            },
            steps::CATEGORY_MAPPER,
            "categorized_images",
            no_reuse,
        ),
        (steps::LABELER, UnitKind::Labeler, steps::MASK_EROSION, "eroded_images", cache),
        (
            steps::MASK_DILATION,
            UnitKind::MaskDilator {
                params: post.mask_dilation.clone(),
            },
            steps::LABELER,
            "labeled_images",
            no_reuse,
        ),
    ];
    for (name, kind, source, key, policy) in chain {
        builder.add_step(
            Step::new(name, ctx.unit(&kind)?)
                .with_upstream([source])
                .with_adapter(Adapter::new().route("images", Source::step(source, key)))
                .with_cache(policy),
        )?;
    }

    builder.add_step(
        Step::new(steps::SCORE_BUILDER, ctx.unit(&UnitKind::ScoreBuilder)?)
            .with_upstream([steps::MASK_DILATION, steps::MASK_RESIZE])
            .with_adapter(
                Adapter::new()
                    .route("images", Source::step(steps::MASK_DILATION, "dilated_images"))
                    .route("probabilities", Source::step(steps::MASK_RESIZE, "resized_images")),
            )
            .with_cache(cache),
    )?;

    Ok(steps::SCORE_BUILDER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::pipeline::Pipeline;
    use crate::testing::StubCatalog;
    use pretty_assertions::assert_eq;

    fn build(config: &PipelineConfig) -> Pipeline {
        let catalog = StubCatalog::new();
        let ctx = BuildContext::new(config, &catalog);
        let mut builder = PipelineBuilder::new("post", ctx.mode());
        builder
            .add_step(Step::new(steps::LOADER, ctx.identity()).with_external_inputs(["datagen"]))
            .unwrap();
        builder
            .add_step(
                Step::new(steps::UNET, ctx.identity())
                    .with_external_inputs(["multichannel_map_prediction"]),
            )
            .unwrap();
        let terminal = mask_postprocessing(&mut builder, &ctx, steps::LOADER, steps::UNET).unwrap();
        builder.build(terminal).unwrap()
    }

    #[test]
    fn test_resize_reads_model_without_crf() {
        let pipeline = build(&PipelineConfig::default());

        assert!(!pipeline.contains(steps::DENSE_CRF));
        assert!(!pipeline.contains(steps::LOADER));
        assert_eq!(
            pipeline.get_step(steps::MASK_RESIZE).unwrap().upstream(),
            [steps::UNET.to_string()]
        );
    }

    #[test]
    fn test_crf_inserted_before_resize() {
        let mut config = PipelineConfig::default();
        config.postprocessor.crf.apply_crf = true;
        let pipeline = build(&config);

        assert_eq!(
            pipeline.get_step(steps::DENSE_CRF).unwrap().upstream(),
            [steps::LOADER.to_string(), steps::UNET.to_string()]
        );
        assert_eq!(
            pipeline.get_step(steps::MASK_RESIZE).unwrap().upstream(),
            [steps::DENSE_CRF.to_string()]
        );
    }

    #[test]
    fn test_morphology_never_reuses() {
        let mut config = PipelineConfig::default();
        config.execution.cache.postprocessing = CachePolicy::persist_and_reuse();
        let pipeline = build(&config);

        for name in [steps::MASK_EROSION, steps::MASK_DILATION] {
            let policy = pipeline.get_step(name).unwrap().cache();
            assert!(policy.persist);
            assert!(!policy.reuse_if_present);
        }
        assert!(pipeline.get_step(steps::LABELER).unwrap().cache().reuse_if_present);
    }

    #[test]
    fn test_score_builder_wiring() {
        let pipeline = build(&PipelineConfig::default());
        let order = pipeline.execution_order();
        let position = |name: &str| order.iter().position(|n| n == name).unwrap();

        assert!(position(steps::MASK_DILATION) < position(steps::SCORE_BUILDER));
        assert_eq!(pipeline.terminal(), steps::SCORE_BUILDER);
        assert_eq!(
            pipeline.downstream_of(steps::MASK_RESIZE),
            vec![steps::CATEGORY_MAPPER, steps::SCORE_BUILDER]
        );
    }
}
