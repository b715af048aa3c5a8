//! Splitter and loader sub-graph.

use super::{steps, BuildContext, LoaderFlavor, UnitKind};
use crate::errors::Result;
use crate::pipeline::PipelineBuilder;
use crate::step::{squeeze, Adapter, Source, Step};
use serde::{Deserialize, Serialize};

/// The network's output layout, which decides the splitter and loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// One segmentation head.
    #[default]
    Single,
    /// Several heads trained together.
    Multitask,
}

impl ModelType {
    fn splitter(self, ctx: &BuildContext<'_>) -> UnitKind {
        let params = match self {
            Self::Single => &ctx.config().xy_splitter,
            Self::Multitask => &ctx.config().xy_splitter_multitask,
        };
        UnitKind::XySplit {
            params: params.clone(),
        }
    }

    fn loader(self) -> LoaderFlavor {
        match self {
            Self::Single => LoaderFlavor::Metadata,
            Self::Multitask => LoaderFlavor::MetadataMultitask,
        }
    }

    /// Multitask targets are per-head lists and must keep their nesting.
    fn squeezes_targets(self) -> bool {
        self == Self::Single
    }
}

/// Adds the splitters and the loader; returns the loader's step name.
///
/// In train mode `xy_train` splits `meta` and `xy_inference` splits
/// `meta_valid`; the loader reads both. In inference mode `xy_inference`
/// splits `meta` and is listed twice as the loader's upstream.
///
/// # Errors
///
/// Propagates catalog and validation errors.
pub fn preprocessing(
    builder: &mut PipelineBuilder,
    ctx: &BuildContext<'_>,
    model_type: ModelType,
    train_mode: bool,
) -> Result<&'static str> {
    let cache = ctx.config().execution.cache.preprocessing;
    let splitter = model_type.splitter(ctx);

    let split_step = |name: &str, meta_field: &str| -> Result<Step> {
        Ok(Step::new(name, ctx.unit(&splitter)?)
            .with_external_inputs([meta_field, "train_mode"])
            .with_adapter(
                Adapter::new()
                    .route("meta", Source::external(meta_field))
                    .route("train_mode", Source::external("train_mode")),
            )
            .with_cache(cache))
    };

    let target = |adapter: Adapter, name: &str, source: &str, key: &str| {
        if model_type.squeezes_targets() {
            adapter.route_with(name, Source::step(source, key), squeeze)
        } else {
            adapter.route(name, Source::step(source, key))
        }
    };

    let loader = Step::new(steps::LOADER, ctx.unit(&ctx.loader_kind(model_type.loader()))?)
        .with_external_inputs(["train_mode"])
        .with_cache(cache);

    let loader = if train_mode {
        builder.add_step(split_step(steps::XY_TRAIN, "meta")?)?;
        builder.add_step(split_step(steps::XY_INFERENCE, "meta_valid")?)?;

        let adapter = Adapter::new()
            .route_with("X", Source::step(steps::XY_TRAIN, "X"), squeeze)
            .route("train_mode", Source::external("train_mode"))
            .route_with("X_valid", Source::step(steps::XY_INFERENCE, "X"), squeeze);
        let adapter = target(adapter, "y", steps::XY_TRAIN, "y");
        let adapter = target(adapter, "y_valid", steps::XY_INFERENCE, "y");

        loader
            .with_upstream([steps::XY_TRAIN, steps::XY_INFERENCE])
            .with_adapter(adapter)
    } else {
        builder.add_step(split_step(steps::XY_INFERENCE, "meta")?)?;

        loader
            .with_upstream([steps::XY_INFERENCE, steps::XY_INFERENCE])
            .with_adapter(
                Adapter::new()
                    .route_with("X", Source::step(steps::XY_INFERENCE, "X"), squeeze)
                    .route_with("y", Source::step(steps::XY_INFERENCE, "y"), squeeze)
                    .route("train_mode", Source::external("train_mode")),
            )
    };

    builder.add_step(loader)?;
    Ok(steps::LOADER)
}
