//! Pipeline configuration.
//!
//! The configuration is read structurally: unit hyperparameters are opaque
//! JSON objects handed to the unit catalog untouched. Only the fields the
//! graph builders themselves act on are typed.

use crate::core::ExecutionMode;
use crate::errors::{Result, SegflowError};
use crate::executor::Executor;
use crate::observability::{init_tracing, LogFormat};
use crate::step::CachePolicy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Opaque per-unit parameters.
pub type Params = Map<String, Value>;

/// Root configuration object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Environment settings.
    #[serde(default)]
    pub env: EnvConfig,
    /// Execution settings.
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Parameters of the single-task train/inference splitter.
    #[serde(default)]
    pub xy_splitter: Params,
    /// Parameters of the multitask splitter.
    #[serde(default)]
    pub xy_splitter_multitask: Params,
    /// Parameters of the loaders.
    #[serde(default)]
    pub loader: Params,
    /// Parameters of the inference-padding loader.
    #[serde(default)]
    pub loader_inference_padding: Params,
    /// Parameters of the segmentation network.
    #[serde(default)]
    pub unet: Params,
    /// Postprocessing settings.
    #[serde(default)]
    pub postprocessor: PostprocessorConfig,
}

/// Environment settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvConfig {
    /// Root directory of the step cache.
    #[serde(default = "default_cache_dirpath")]
    pub cache_dirpath: PathBuf,
    /// Format of the log lines written by [`PipelineConfig::init_tracing`].
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_cache_dirpath() -> PathBuf {
    PathBuf::from("cache")
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            cache_dirpath: default_cache_dirpath(),
            log_format: LogFormat::default(),
        }
    }
}

/// Execution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Build streaming pipelines instead of eager ones.
    #[serde(default)]
    pub stream_mode: bool,
    /// Items per batch produced by streaming loaders.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Cache policies per step group.
    #[serde(default)]
    pub cache: CacheSettings,
}

fn default_batch_size() -> usize {
    16
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            stream_mode: false,
            batch_size: default_batch_size(),
            cache: CacheSettings::default(),
        }
    }
}

/// Cache policies applied by the graph builders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Splitters and loader.
    #[serde(default)]
    pub preprocessing: CachePolicy,
    /// The network and the prediction crop.
    #[serde(default)]
    pub model: CachePolicy,
    /// The mask postprocessing chain. Erosion and dilation never reuse.
    #[serde(default)]
    pub postprocessing: CachePolicy,
}

/// Postprocessing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostprocessorConfig {
    /// Dense-CRF refinement.
    #[serde(default)]
    pub crf: CrfConfig,
    /// Parameters of the crop undoing inference padding.
    #[serde(default)]
    pub prediction_crop: Params,
    /// Parameters of the mask eroder.
    #[serde(default)]
    pub mask_erosion: Params,
    /// Parameters of the labeled mask dilator.
    #[serde(default)]
    pub mask_dilation: Params,
}

/// Dense-CRF refinement settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrfConfig {
    /// Insert the `dense_crf` step before resizing.
    #[serde(default)]
    pub apply_crf: bool,
    /// Remaining CRF parameters.
    #[serde(flatten)]
    pub params: Params,
}

impl PipelineConfig {
    /// Parses a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the JSON does not describe a valid configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SegflowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, `Config` if it is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    /// Checks the structural constraints the builders rely on.
    ///
    /// # Errors
    ///
    /// Returns `Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.env.cache_dirpath.as_os_str().is_empty() {
            return Err(SegflowError::Config("env.cache_dirpath must not be empty".to_string()));
        }
        if self.execution.batch_size == 0 {
            return Err(SegflowError::Config(
                "execution.batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the execution mode selected by `execution.stream_mode`.
    #[must_use]
    pub fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::from_stream_flag(self.execution.stream_mode)
    }

    /// Installs the global log subscriber in `env.log_format`.
    pub fn init_tracing(&self) {
        init_tracing(self.env.log_format);
    }

    /// Creates an executor backed by a disk cache at `env.cache_dirpath`.
    #[must_use]
    pub fn executor(&self) -> Executor {
        Executor::new().with_disk_cache(self.env.cache_dirpath.clone())
    }
}
