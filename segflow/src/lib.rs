//! # Segflow
//!
//! Graph assembly, caching and execution for image-segmentation pipelines.
//!
//! Segflow provides:
//!
//! - **Steps and adapters**: named nodes whose inputs are routed declaratively
//!   from upstream outputs or an external input bundle
//! - **Immutable pipelines**: validated graphs that derive variants by
//!   patching individual steps while sharing the rest
//! - **Per-step caching**: content-fingerprinted entries on disk or in memory
//! - **Two execution modes**: eager (materialized values) and streaming
//!   (bounded, cancellable batch streams)
//! - **Segmentation graphs**: the `unet` family of variants, built against a
//!   pluggable catalog of processing units
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use segflow::prelude::*;
//!
//! let config = PipelineConfig::from_file("config.json")?;
//! let pipeline = build_pipeline(PipelineKind::UnetPadded, &config, &catalog, false)?;
//!
//! let output = config.executor().run(&pipeline, &bundle).await?;
//! let predictions = &output["y_pred"];
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cache;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod executor;
pub mod observability;
pub mod pipeline;
pub mod segmentation;
pub mod step;
pub mod testing;
pub mod units;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::{CacheStore, ContentFingerprinter, DiskCache, Fingerprinter, InMemoryCache};
    pub use crate::config::{Params, PipelineConfig};
    pub use crate::core::{drain, BatchStream, ExecutionMode, RunMode, StepData};
    pub use crate::errors::{
        ContractErrorInfo, CycleDetectedError, PipelineValidationError, Result, SegflowError,
        UndeclaredDependencyError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::executor::Executor;
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{Pipeline, PipelineBuilder};
    pub use crate::segmentation::{
        build_pipeline, BuildContext, LoaderFlavor, ModelType, PipelineKind, UnitCatalog, UnitKind,
    };
    pub use crate::step::{squeeze, Adapter, CachePolicy, Source, Step, StreamCaching};
    pub use crate::units::{FnTransformer, Identity, PerBatch, StreamTransformer, Transformer, Unit};
}
