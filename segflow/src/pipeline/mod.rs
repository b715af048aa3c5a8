//! Pipeline building and inspection.
//!
//! This module provides:
//! - A builder with per-step and whole-graph validation
//! - Immutable pipelines with name lookup, patching and re-rooting

mod builder;
mod graph;
mod integration_tests;

pub use builder::{is_valid_step_name, PipelineBuilder};
pub use graph::Pipeline;
