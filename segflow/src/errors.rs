//! Error types for the segflow engine.
//!
//! Every failure aborts the whole invocation. The only error that is ever
//! recovered locally is [`SegflowError::CacheCorruption`], which the executor
//! downgrades to a cache miss.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Opaque error raised by a processing unit.
pub type UnitError = anyhow::Error;

/// Convenience alias used across the crate.
pub type Result<T, E = SegflowError> = std::result::Result<T, E>;

/// The main error type for segflow operations.
#[derive(Debug, Error)]
pub enum SegflowError {
    /// A patch or lookup referenced a step that is not in the pipeline.
    #[error("Unknown step name: '{name}'")]
    UnknownStepName {
        /// The requested name.
        name: String,
    },

    /// An adapter referenced an external field absent from the input bundle.
    #[error("Step '{step}' requires external input '{key}' which was not supplied")]
    MissingExternalInput {
        /// The step being resolved.
        step: String,
        /// The missing field.
        key: String,
    },

    /// An adapter referenced an output key the source step did not produce.
    #[error("Step '{step}' requires output '{key}' of step '{source_step}' which was not produced")]
    MissingOutputKey {
        /// The step being resolved.
        step: String,
        /// The upstream step addressed by the adapter.
        source_step: String,
        /// The missing output key.
        key: String,
    },

    /// A processing unit failed.
    #[error("Step '{step}' failed: {source}")]
    UnitExecutionFailure {
        /// The step whose unit failed.
        step: String,
        /// The unit's own error.
        #[source]
        source: UnitError,
    },

    /// A persisted cache entry could not be read back.
    #[error("Cache entry for step '{step}' ({fingerprint}) is corrupted: {reason}")]
    CacheCorruption {
        /// The step owning the entry.
        step: String,
        /// The fingerprint of the entry.
        fingerprint: String,
        /// Why deserialization failed.
        reason: String,
    },

    /// A pipeline validation error occurred.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A pipeline was run with the runner of the other execution mode.
    #[error("Pipeline '{pipeline}' is built for {expected} execution, not {requested}")]
    ModeMismatch {
        /// The pipeline name.
        pipeline: String,
        /// The mode the pipeline was built for.
        expected: String,
        /// The mode that was requested.
        requested: String,
    },

    /// Upstream streams feeding one step produced different batch counts.
    #[error("Upstream streams of step '{step}' ended at different batch counts")]
    StreamMisaligned {
        /// The step whose inputs were misaligned.
        step: String,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SegflowError {
    /// Creates an unknown step name error.
    #[must_use]
    pub fn unknown_step(name: impl Into<String>) -> Self {
        Self::UnknownStepName { name: name.into() }
    }

    /// Wraps a unit error with the name of the step that raised it.
    #[must_use]
    pub fn unit_failure(step: impl Into<String>, source: UnitError) -> Self {
        Self::UnitExecutionFailure {
            step: step.into(),
            source,
        }
    }

    /// Returns the step the error is attributed to, if any.
    #[must_use]
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::MissingExternalInput { step, .. }
            | Self::MissingOutputKey { step, .. }
            | Self::UnitExecutionFailure { step, .. }
            | Self::CacheCorruption { step, .. }
            | Self::StreamMisaligned { step } => Some(step),
            Self::UnknownStepName { name } => Some(name),
            _ => None,
        }
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CONTRACT-004-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when pipeline validation fails.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The steps involved in the error.
    pub steps: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            steps: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the steps involved.
    #[must_use]
    pub fn with_steps(mut self, steps: Vec<String>) -> Self {
        self.steps = steps;
        self
    }

    /// Sets the contract error info, filling in the default suggestion for
    /// its code when it carries no fix hint.
    #[must_use]
    pub fn with_error_info(mut self, mut info: ContractErrorInfo) -> Self {
        if info.fix_hint.is_none() {
            info.fix_hint = ContractSuggestions::get(&info.code).map(str::to_string);
        }
        self.error_info = Some(info);
        self
    }

    /// Returns the fix hint, if any.
    #[must_use]
    pub fn fix_hint(&self) -> Option<&str> {
        self.error_info.as_ref().and_then(|info| info.fix_hint.as_deref())
    }

    /// Returns the contract error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Error raised when a cycle is detected in the pipeline graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in pipeline: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of steps forming the cycle.
    pub cycle_path: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            "CONTRACT-004-CYCLE",
            format!("Pipeline contains a dependency cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the upstream references in the cycle to break it.");

        Self {
            cycle_path,
            error_info: info,
        }
    }
}

impl From<CycleDetectedError> for PipelineValidationError {
    fn from(err: CycleDetectedError) -> Self {
        Self {
            message: err.to_string(),
            steps: err.cycle_path.clone(),
            error_info: Some(err.error_info),
        }
    }
}

/// Error raised when an adapter addresses a source the step never declared.
#[derive(Debug, Clone, Error)]
#[error("Undeclared dependency: step '{step}' addresses '{source_name}' which is not among its declared {kind}")]
pub struct UndeclaredDependencyError {
    /// The step owning the adapter.
    pub step: String,
    /// The undeclared source name.
    pub source_name: String,
    /// Either "upstream steps" or "external inputs".
    pub kind: &'static str,
}

impl UndeclaredDependencyError {
    /// An adapter entry addresses a step missing from the upstream list.
    #[must_use]
    pub fn upstream(step: impl Into<String>, source_name: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            source_name: source_name.into(),
            kind: "upstream steps",
        }
    }

    /// An adapter entry addresses an external field the step did not declare.
    #[must_use]
    pub fn external(step: impl Into<String>, source_name: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            source_name: source_name.into(),
            kind: "external inputs",
        }
    }
}

impl From<UndeclaredDependencyError> for PipelineValidationError {
    fn from(err: UndeclaredDependencyError) -> Self {
        Self {
            message: err.to_string(),
            steps: vec![err.step.clone(), err.source_name.clone()],
            error_info: Some(
                ContractErrorInfo::new(
                    "CONTRACT-004-ADAPTER",
                    format!("Adapter of '{}' reads an undeclared source", err.step),
                )
                .with_fix_hint("List the source in the step's upstream steps or external inputs."),
            ),
        }
    }
}

/// Provides default suggestions for common contract error codes.
pub struct ContractSuggestions;

impl ContractSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            "CONTRACT-004-CYCLE" => Some(
                "Check your upstream lists for circular references. \
                 Steps may only read from steps added before them.",
            ),
            "CONTRACT-004-MISSING_DEP" => Some(
                "Ensure all upstream names reference steps that exist in the pipeline. \
                 Check for typos in step names.",
            ),
            "CONTRACT-004-DUPLICATE" => Some(
                "Step names double as cache keys and must be unique within a pipeline.",
            ),
            "CONTRACT-004-EMPTY" => Some("Add at least one step to the pipeline before building."),
            "CONTRACT-004-ADAPTER" => Some(
                "Every adapter source must be declared by the step, and every input key routed once.",
            ),
            "CONTRACT-004-MODE" => Some(
                "Select the unit implementation matching the pipeline's execution mode.",
            ),
            "CONTRACT-004-NAME" => Some(
                "Use letters, digits and underscores, not starting with a digit.",
            ),
            _ => None,
        }
    }
}
