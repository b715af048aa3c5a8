//! Image-segmentation pipeline graphs.
//!
//! The concrete transforms live outside this crate. Graph builders ask a
//! [`UnitCatalog`] for a unit of a given [`UnitKind`] and execution mode,
//! so choosing between eager and streaming implementations happens once,
//! while the graph is assembled.

mod postprocessing;
mod preprocessing;
mod variants;

pub use postprocessing::mask_postprocessing;
pub use preprocessing::{preprocessing, ModelType};
pub use variants::{build_pipeline, unet, unet_padded, unet_weighted, unet_weighted_padded, PipelineKind};

use crate::config::{Params, PipelineConfig};
use crate::core::ExecutionMode;
use crate::errors::{PipelineValidationError, Result};
use crate::pipeline::PipelineBuilder;
use crate::step::{Adapter, CachePolicy, Source, Step};
use crate::units::Unit;
use std::fmt;

/// Step names used by the segmentation graphs.
pub mod steps {
    /// Splits training metadata into inputs and targets.
    pub const XY_TRAIN: &str = "xy_train";
    /// Splits validation or inference metadata.
    pub const XY_INFERENCE: &str = "xy_inference";
    /// Produces the image data generator.
    pub const LOADER: &str = "loader";
    /// The segmentation network.
    pub const UNET: &str = "unet";
    /// Crops padded predictions back to the image size.
    pub const PREDICTION_CROP: &str = "prediction_crop";
    /// Renames the cropped prediction to the network's output key.
    pub const PREDICTION_RENAMED: &str = "prediction_renamed";
    /// Optional dense-CRF refinement.
    pub const DENSE_CRF: &str = "dense_crf";
    /// Resizes masks to the original image sizes.
    pub const MASK_RESIZE: &str = "mask_resize";
    /// Maps class probabilities to categories.
    pub const CATEGORY_MAPPER: &str = "category_mapper";
    /// Erodes category masks.
    pub const MASK_EROSION: &str = "mask_erosion";
    /// Labels object instances.
    pub const LABELER: &str = "labeler";
    /// Dilates labeled masks.
    pub const MASK_DILATION: &str = "mask_dilation";
    /// Scores every labeled object.
    pub const SCORE_BUILDER: &str = "score_builder";
    /// Exposes `y_pred` and `y_scores`.
    pub const OUTPUT: &str = "output";
}

/// Loader implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoaderFlavor {
    /// Loads images listed in the metadata.
    Metadata,
    /// Loads images and the per-task targets of a multitask model.
    MetadataMultitask,
    /// Loads images plus distance maps for the weighted loss.
    Distances,
    /// Pads inference images to a size the network accepts.
    InferencePadding,
}

/// The kind of unit a step needs, with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitKind {
    /// Splits metadata into `X` and `y`.
    XySplit {
        /// Splitter parameters.
        params: Params,
    },
    /// Turns `X`/`y` into a `datagen`.
    Loader {
        /// Which loader.
        flavor: LoaderFlavor,
        /// Loader parameters.
        params: Params,
        /// Items per streamed batch.
        batch_size: usize,
    },
    /// Predicts `multichannel_map_prediction` from `datagen`.
    Model {
        /// Trains with the distance-weighted loss.
        weighted: bool,
        /// Network parameters.
        params: Params,
    },
    /// Refines predictions into `crf_images`.
    DenseCrf {
        /// CRF parameters.
        params: Params,
    },
    /// Produces `resized_images`.
    Resizer,
    /// Produces `categorized_images`.
    CategoryMapper,
    /// Produces `eroded_images`.
    MaskEroder {
        /// Erosion parameters.
        params: Params,
    },
    /// Produces `labeled_images`.
    Labeler,
    /// Produces `dilated_images`.
    MaskDilator {
        /// Dilation parameters.
        params: Params,
    },
    /// Produces `images` and `scores`.
    ScoreBuilder,
    /// Produces `cropped_images`.
    PredictionCrop {
        /// Crop parameters.
        params: Params,
    },
}

impl UnitKind {
    /// Returns a short label for logs and errors.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::XySplit { .. } => "xy_split",
            Self::Loader { flavor, .. } => match flavor {
                LoaderFlavor::Metadata => "loader",
                LoaderFlavor::MetadataMultitask => "loader_multitask",
                LoaderFlavor::Distances => "loader_distances",
                LoaderFlavor::InferencePadding => "loader_inference_padding",
            },
            Self::Model { weighted: false, .. } => "unet",
            Self::Model { weighted: true, .. } => "unet_weighted",
            Self::DenseCrf { .. } => "dense_crf",
            Self::Resizer => "resizer",
            Self::CategoryMapper => "category_mapper",
            Self::MaskEroder { .. } => "mask_eroder",
            Self::Labeler => "labeler",
            Self::MaskDilator { .. } => "mask_dilator",
            Self::ScoreBuilder => "score_builder",
            Self::PredictionCrop { .. } => "prediction_crop",
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Supplies processing units to the graph builders.
pub trait UnitCatalog: Send + Sync {
    /// Builds the unit of `kind` for pipelines running in `mode`.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the kind is unsupported in `mode` or its
    /// parameters are rejected.
    fn build(&self, kind: &UnitKind, mode: ExecutionMode) -> Result<Unit>;
}

/// What every sub-builder needs: the configuration, the catalog and the mode.
#[derive(Clone, Copy)]
pub struct BuildContext<'a> {
    config: &'a PipelineConfig,
    catalog: &'a dyn UnitCatalog,
    mode: ExecutionMode,
}

impl fmt::Debug for BuildContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildContext").field("mode", &self.mode).finish()
    }
}

impl<'a> BuildContext<'a> {
    /// Creates a context; the mode comes from `execution.stream_mode`.
    #[must_use]
    pub fn new(config: &'a PipelineConfig, catalog: &'a dyn UnitCatalog) -> Self {
        Self {
            config,
            catalog,
            mode: config.execution_mode(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &'a PipelineConfig {
        self.config
    }

    /// Returns the execution mode.
    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Builds a unit for this context's mode.
    ///
    /// # Errors
    ///
    /// Propagates the catalog's error.
    pub fn unit(&self, kind: &UnitKind) -> Result<Unit> {
        self.catalog.build(kind, self.mode)
    }

    /// A pass-through unit for this context's mode.
    #[must_use]
    pub fn identity(&self) -> Unit {
        Unit::identity(self.mode)
    }

    /// The loader kind for `flavor`, with the matching parameter section.
    #[must_use]
    pub fn loader_kind(&self, flavor: LoaderFlavor) -> UnitKind {
        let params = match flavor {
            LoaderFlavor::InferencePadding => &self.config.loader_inference_padding,
            _ => &self.config.loader,
        };
        UnitKind::Loader {
            flavor,
            params: params.clone(),
            batch_size: self.config.execution.batch_size,
        }
    }

    /// The network kind.
    #[must_use]
    pub fn model_kind(&self, weighted: bool) -> UnitKind {
        UnitKind::Model {
            weighted,
            params: self.config.unet.clone(),
        }
    }
}

/// Adds the terminal `output` step renaming the score builder's results.
pub(crate) fn output_step(
    builder: &mut PipelineBuilder,
    ctx: &BuildContext<'_>,
    source: &str,
) -> std::result::Result<(), PipelineValidationError> {
    builder.add_step(
        Step::new(steps::OUTPUT, ctx.identity())
            .with_upstream([source])
            .with_adapter(
                Adapter::new()
                    .route("y_pred", Source::step(source, "images"))
                    .route("y_scores", Source::step(source, "scores")),
            )
            .with_cache(CachePolicy::disabled()),
    )
}
