//! Per-step memoization of step outputs.
//!
//! Entries are keyed by `(step name, fingerprint)`. The fingerprint comes
//! from an injectable [`Fingerprinter`]; stores only move entries around.

mod disk;
mod fingerprint;
mod memory;

pub use disk::DiskCache;
pub use fingerprint::{canonical_json, ContentFingerprinter, Fingerprinter};
pub use memory::InMemoryCache;

use crate::core::StepData;
use crate::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The stored form of a step result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum CachePayload {
    /// The output of an eager step.
    Materialized(StepData),
    /// Every output batch of a drained streaming step, in order.
    Batches(Vec<StepData>),
}

/// A persisted step result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The step that produced the result.
    pub step: String,
    /// Fingerprint of the step's resolved inputs.
    pub fingerprint: String,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
    /// The result itself.
    pub payload: CachePayload,
}

impl CacheEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn new(step: impl Into<String>, fingerprint: impl Into<String>, payload: CachePayload) -> Self {
        Self {
            step: step.into(),
            fingerprint: fingerprint.into(),
            created_at: Utc::now(),
            payload,
        }
    }

    /// Creates an entry for an eager result.
    #[must_use]
    pub fn materialized(step: impl Into<String>, fingerprint: impl Into<String>, data: StepData) -> Self {
        Self::new(step, fingerprint, CachePayload::Materialized(data))
    }

    /// Creates an entry for drained stream batches.
    #[must_use]
    pub fn batches(step: impl Into<String>, fingerprint: impl Into<String>, batches: Vec<StepData>) -> Self {
        Self::new(step, fingerprint, CachePayload::Batches(batches))
    }
}

/// Storage backend for step results.
#[async_trait]
pub trait CacheStore: Send + Sync + std::fmt::Debug {
    /// Looks an entry up.
    ///
    /// A stored entry that cannot be read back is reported as
    /// `CacheCorruption`; callers decide whether that is fatal.
    async fn get(&self, step: &str, fingerprint: &str) -> Result<Option<CacheEntry>>;

    /// Stores an entry, replacing any previous one with the same key.
    async fn put(&self, entry: &CacheEntry) -> Result<()>;

    /// Removes an entry. Removing a missing entry is not an error.
    async fn remove(&self, step: &str, fingerprint: &str) -> Result<()>;
}
