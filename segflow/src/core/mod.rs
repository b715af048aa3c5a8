//! Core data types shared by every layer of the engine.

mod batch;
mod mode;

pub use batch::{concat_batches, drain, BatchStream, InputStream, OutputStream};
pub use mode::{ExecutionMode, RunMode};

use std::collections::HashMap;

/// A named map of values: a unit's inputs, a unit's outputs, one streamed
/// batch, or the external input bundle.
pub type StepData = HashMap<String, serde_json::Value>;
