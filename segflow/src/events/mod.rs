//! Structured lifecycle events.
//!
//! The executor reports every step boundary and cache decision to an
//! [`EventSink`]. Event payloads always carry the `step` and `run_id`.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names.
pub mod names {
    /// A step's unit is about to run.
    pub const STEP_STARTED: &str = "step.started";
    /// A step's unit finished successfully.
    pub const STEP_COMPLETED: &str = "step.completed";
    /// A step's output was served from the cache.
    pub const STEP_CACHE_HIT: &str = "step.cache_hit";
    /// A step failed; the run aborts.
    pub const STEP_FAILED: &str = "step.failed";
    /// A cache entry could not be read and was ignored.
    pub const CACHE_CORRUPTED: &str = "cache.corrupted";
}
