//! Execution and run modes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a pipeline moves data between its steps.
///
/// The mode is chosen when a pipeline is built and every unit in it must
/// match. It never changes during an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Every step materializes its full output before downstream steps run.
    #[default]
    Eager,
    /// Every step consumes and produces a lazy sequence of batches.
    Streaming,
}

impl ExecutionMode {
    /// Selects the mode from the `execution.stream_mode` flag.
    #[must_use]
    pub fn from_stream_flag(stream_mode: bool) -> Self {
        if stream_mode {
            Self::Streaming
        } else {
            Self::Eager
        }
    }

    /// Returns the mode as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eager => "eager",
            Self::Streaming => "streaming",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an invocation trains units or only applies them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Units are fitted on their inputs, then applied.
    Fit,
    /// Units are applied with their current state.
    #[default]
    Transform,
}

impl RunMode {
    /// Returns the mode as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fit => "fit",
            Self::Transform => "transform",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
