//! Per-step cache policy.

use serde::{Deserialize, Serialize};

/// What a streaming step does with its cache flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamCaching {
    /// Forward the stream uncached; the cache flags are ignored.
    #[default]
    Bypass,
    /// Drain the stream, apply the cache flags to the drained batches and
    /// re-emit them. The step loses its constant-memory behavior.
    Materialize,
}

/// Independent load/save switches for a step's cache entries.
///
/// Loading without saving trusts an artifact produced by an earlier run;
/// saving without loading forces a recompute but keeps the result for later
/// variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CachePolicy {
    /// Store the output after the step succeeds.
    #[serde(default)]
    pub persist: bool,
    /// Return a stored output instead of running the unit.
    #[serde(default)]
    pub reuse_if_present: bool,
    /// Behavior in streaming pipelines.
    #[serde(default)]
    pub streaming: StreamCaching,
}

impl CachePolicy {
    /// No caching at all.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Save and load.
    #[must_use]
    pub fn persist_and_reuse() -> Self {
        Self {
            persist: true,
            reuse_if_present: true,
            streaming: StreamCaching::Bypass,
        }
    }

    /// Save without loading.
    #[must_use]
    pub fn persist_only() -> Self {
        Self {
            persist: true,
            reuse_if_present: false,
            streaming: StreamCaching::Bypass,
        }
    }

    /// Load without saving.
    #[must_use]
    pub fn reuse_only() -> Self {
        Self {
            persist: false,
            reuse_if_present: true,
            streaming: StreamCaching::Bypass,
        }
    }

    /// Sets the streaming behavior.
    #[must_use]
    pub fn with_streaming(mut self, streaming: StreamCaching) -> Self {
        self.streaming = streaming;
        self
    }

    /// Returns true if the cache is consulted or written at all.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.persist || self.reuse_if_present
    }
}
