//! Cache keys derived from resolved inputs.

use crate::core::{RunMode, StepData};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Computes the cache key of a step invocation.
///
/// Implementations must return the same string for the same inputs across
/// processes, and a different one whenever the inputs differ. The result is
/// used as a file name, so it must not contain path separators.
///
/// `unit` is the processing unit's name. Variants patch units in place
/// under the same step name, so the unit must be part of the key.
pub trait Fingerprinter: Send + Sync + std::fmt::Debug {
    /// Fingerprints one invocation of `step` running `unit`.
    fn fingerprint(&self, step: &str, unit: &str, run_mode: RunMode, inputs: &StepData) -> String;
}

/// SHA-256 over the canonical JSON of the inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentFingerprinter;

impl Fingerprinter for ContentFingerprinter {
    fn fingerprint(&self, step: &str, unit: &str, run_mode: RunMode, inputs: &StepData) -> String {
        let mut hasher = Sha256::new();
        for part in [step, unit, run_mode.as_str()] {
            hasher.update(part.as_bytes());
            hasher.update([0]);
        }
        hasher.update(canonical_json(inputs).as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Serializes inputs with every object's keys in sorted order.
#[must_use]
pub fn canonical_json(inputs: &StepData) -> String {
    let sorted: BTreeMap<&String, Value> = inputs.iter().map(|(k, v)| (k, canonicalize(v))).collect();
    serde_json::to_string(&sorted).unwrap_or_default()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            let mut out = Map::new();
            for (key, inner) in sorted {
                out.insert(key.clone(), canonicalize(inner));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
