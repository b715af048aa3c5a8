//! The four network variants, for training and inference.
//!
//! `unet` is built from scratch; the other variants derive from it by
//! patching units of existing steps, so every step they do not touch is
//! shared with the base graph and keeps its cache entries.

use super::{
    mask_postprocessing, output_step, preprocessing, steps, BuildContext, LoaderFlavor, ModelType,
    UnitCatalog, UnitKind,
};
use crate::config::PipelineConfig;
use crate::errors::{Result, SegflowError};
use crate::pipeline::{Pipeline, PipelineBuilder};
use crate::step::{Adapter, Source, Step};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Registry of buildable variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    /// Plain network.
    Unet,
    /// Distance-weighted loss.
    UnetWeighted,
    /// Padded inference.
    UnetPadded,
    /// Weighted training with padded inference.
    UnetWeightedPadded,
}

impl PipelineKind {
    /// Every variant, in registry order.
    #[must_use]
    pub fn all() -> [Self; 4] {
        [
            Self::Unet,
            Self::UnetWeighted,
            Self::UnetPadded,
            Self::UnetWeightedPadded,
        ]
    }

    /// Returns the registry name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unet => "unet",
            Self::UnetWeighted => "unet_weighted",
            Self::UnetPadded => "unet_padded",
            Self::UnetWeightedPadded => "unet_weighted_padded",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineKind {
    type Err = SegflowError;

    fn from_str(s: &str) -> Result<Self> {
        Self::all()
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| SegflowError::Config(format!("unknown pipeline '{s}'")))
    }
}

/// Builds `kind` for training (`train_mode`) or inference.
///
/// # Errors
///
/// Propagates catalog and validation errors.
pub fn build_pipeline(
    kind: PipelineKind,
    config: &PipelineConfig,
    catalog: &dyn UnitCatalog,
    train_mode: bool,
) -> Result<Pipeline> {
    let ctx = BuildContext::new(config, catalog);
    debug!(pipeline = %kind, train_mode, mode = %ctx.mode(), "building pipeline");
    match kind {
        PipelineKind::Unet => unet(&ctx, train_mode),
        PipelineKind::UnetWeighted => unet_weighted(&ctx, train_mode),
        PipelineKind::UnetPadded => unet_padded(&ctx, train_mode),
        PipelineKind::UnetWeightedPadded => unet_weighted_padded(&ctx, train_mode),
    }
}

/// Preprocessing, the network, postprocessing and `output`.
///
/// # Errors
///
/// Propagates catalog and validation errors.
pub fn unet(ctx: &BuildContext<'_>, train_mode: bool) -> Result<Pipeline> {
    let mut builder = PipelineBuilder::new(PipelineKind::Unet.as_str(), ctx.mode());
    let loader = preprocessing(&mut builder, ctx, ModelType::Single, train_mode)?;

    builder.add_step(
        Step::new(steps::UNET, ctx.unit(&ctx.model_kind(false))?)
            .with_upstream([loader])
            .with_cache(ctx.config().execution.cache.model),
    )?;

    let scores = mask_postprocessing(&mut builder, ctx, loader, steps::UNET)?;
    output_step(&mut builder, ctx, scores)?;
    Ok(builder.build(steps::OUTPUT)?)
}

/// `unet` with the distance loader and the weighted network.
///
/// # Errors
///
/// Propagates catalog and validation errors.
pub fn unet_weighted(ctx: &BuildContext<'_>, train_mode: bool) -> Result<Pipeline> {
    Ok(weighted(ctx, unet(ctx, train_mode)?)?.with_name(PipelineKind::UnetWeighted.as_str()))
}

/// `unet` for training; for inference the loader pads the images and the
/// prediction is cropped back before postprocessing.
///
/// # Errors
///
/// Propagates catalog and validation errors.
pub fn unet_padded(ctx: &BuildContext<'_>, train_mode: bool) -> Result<Pipeline> {
    let name = PipelineKind::UnetPadded.as_str();
    let base = unet(ctx, train_mode)?;
    if train_mode {
        return Ok(base.with_name(name));
    }

    let model = base.subgraph(steps::UNET)?.with_unit(
        steps::LOADER,
        ctx.unit(&ctx.loader_kind(LoaderFlavor::InferencePadding))?,
    )?;
    let mut builder = model.with_name(name).into_builder();
    let cache = ctx.config().execution.cache.model;

    builder.add_step(
        Step::new(
            steps::PREDICTION_CROP,
            ctx.unit(&UnitKind::PredictionCrop {
                params: ctx.config().postprocessor.prediction_crop.clone(),
            })?,
        )
        .with_upstream([steps::UNET])
        .with_adapter(
            Adapter::new().route("images", Source::step(steps::UNET, "multichannel_map_prediction")),
        )
        .with_cache(cache),
    )?;
    builder.add_step(
        Step::new(steps::PREDICTION_RENAMED, ctx.identity())
            .with_upstream([steps::PREDICTION_CROP])
            .with_adapter(Adapter::new().route(
                "multichannel_map_prediction",
                Source::step(steps::PREDICTION_CROP, "cropped_images"),
            ))
            .with_cache(cache),
    )?;

    let scores = mask_postprocessing(&mut builder, ctx, steps::LOADER, steps::PREDICTION_RENAMED)?;
    output_step(&mut builder, ctx, scores)?;
    Ok(builder.build(steps::OUTPUT)?)
}

/// `unet_padded`, weighted in training only.
///
/// # Errors
///
/// Propagates catalog and validation errors.
pub fn unet_weighted_padded(ctx: &BuildContext<'_>, train_mode: bool) -> Result<Pipeline> {
    let padded = unet_padded(ctx, train_mode)?;
    let pipeline = if train_mode { weighted(ctx, padded)? } else { padded };
    Ok(pipeline.with_name(PipelineKind::UnetWeightedPadded.as_str()))
}

fn weighted(ctx: &BuildContext<'_>, pipeline: Pipeline) -> Result<Pipeline> {
    pipeline
        .with_unit(steps::LOADER, ctx.unit(&ctx.loader_kind(LoaderFlavor::Distances))?)?
        .with_unit(steps::UNET, ctx.unit(&ctx.model_kind(true))?)
}
