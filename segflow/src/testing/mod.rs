//! Testing utilities for segflow pipelines.
//!
//! This module provides:
//! - Mock eager and streaming units
//! - A deterministic unit catalog for the segmentation graphs
//! - External input bundles and configurations

mod catalog;
mod fixtures;
mod mocks;

pub use catalog::StubCatalog;
pub use fixtures::{cached_config, uncached_config, TestBundle};
pub use mocks::{ChunkingStream, EndlessStream, FailingUnit, MockUnit};
