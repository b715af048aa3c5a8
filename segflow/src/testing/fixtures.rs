//! Test fixtures for pipeline testing.

use serde_json::{json, Value};

use crate::config::PipelineConfig;
use crate::core::StepData;
use crate::step::CachePolicy;

/// Builds an external input bundle.
#[derive(Debug, Clone)]
pub struct TestBundle {
    data: StepData,
}

impl Default for TestBundle {
    fn default() -> Self {
        Self::new()
    }
}

impl TestBundle {
    /// A bundle with five training images, two validation images and
    /// matching target sizes, in inference mode.
    #[must_use]
    pub fn new() -> Self {
        let data = StepData::from([
            ("meta".to_string(), json!([1, 2, 3, 4, 5])),
            ("meta_valid".to_string(), json!([6, 7])),
            ("train_mode".to_string(), json!(false)),
            ("target_sizes".to_string(), json!([[2, 2], [2, 2], [2, 2], [2, 2], [2, 2]])),
        ]);
        Self { data }
    }

    /// Sets the `train_mode` flag.
    #[must_use]
    pub fn train_mode(self, train_mode: bool) -> Self {
        self.with("train_mode", json!(train_mode))
    }

    /// Sets any field.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Removes a field.
    #[must_use]
    pub fn without(mut self, key: &str) -> Self {
        self.data.remove(key);
        self
    }

    /// Returns the bundle.
    #[must_use]
    pub fn build(self) -> StepData {
        self.data
    }
}

/// A configuration for stub-catalog runs.
///
/// Every step group persists and reuses cache entries; streaming runs
/// use batches of two.
#[must_use]
pub fn cached_config(stream_mode: bool) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.execution.stream_mode = stream_mode;
    config.execution.batch_size = 2;
    config.execution.cache.preprocessing = CachePolicy::persist_and_reuse();
    config.execution.cache.model = CachePolicy::persist_and_reuse();
    config.execution.cache.postprocessing = CachePolicy::persist_and_reuse();
    config
}

/// A configuration with caching disabled.
#[must_use]
pub fn uncached_config(stream_mode: bool) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.execution.stream_mode = stream_mode;
    config.execution.batch_size = 2;
    config
}
