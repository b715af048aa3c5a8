//! Batch streams and helpers for turning them back into materialized data.

use super::StepData;
use crate::errors::{Result, SegflowError, UnitError};
use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;

/// The lazy sequence of input batches handed to a streaming unit.
pub type InputStream = BoxStream<'static, StepData>;

/// The lazy sequence of output batches produced by a streaming unit.
pub type OutputStream = BoxStream<'static, std::result::Result<StepData, UnitError>>;

/// The terminal stream returned by the streaming executor.
///
/// Failures anywhere in the graph surface as the final `Err` item.
pub type BatchStream = BoxStream<'static, Result<StepData, SegflowError>>;

/// Concatenates batches into one materialized map.
///
/// Per key, array values are concatenated in batch order; any other value
/// kind is collected into an array with one element per batch.
#[must_use]
pub fn concat_batches(batches: Vec<StepData>) -> StepData {
    let mut columns: std::collections::HashMap<String, Vec<Value>> = std::collections::HashMap::new();
    for batch in batches {
        for (key, value) in batch {
            columns.entry(key).or_default().push(value);
        }
    }

    columns
        .into_iter()
        .map(|(key, values)| {
            let merged = if values.iter().all(Value::is_array) {
                Value::Array(
                    values
                        .into_iter()
                        .flat_map(|v| match v {
                            Value::Array(items) => items,
                            other => vec![other],
                        })
                        .collect(),
                )
            } else {
                Value::Array(values)
            };
            (key, merged)
        })
        .collect()
}

/// Fully drains a terminal stream.
///
/// Returns the first error instead of any partially collected output.
pub async fn drain(mut stream: BatchStream) -> Result<StepData> {
    let mut batches = Vec::new();
    while let Some(item) = stream.next().await {
        batches.push(item?);
    }
    Ok(concat_batches(batches))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::json;

    fn batch(pairs: &[(&str, Value)]) -> StepData {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_concat_arrays() {
        let merged = concat_batches(vec![
            batch(&[("images", json!([1, 2]))]),
            batch(&[("images", json!([3]))]),
        ]);

        assert_eq!(merged["images"], json!([1, 2, 3]));
    }

    #[test]
    fn test_concat_scalars_collects() {
        let merged = concat_batches(vec![
            batch(&[("loss", json!(0.5))]),
            batch(&[("loss", json!(0.25))]),
        ]);

        assert_eq!(merged["loss"], json!([0.5, 0.25]));
    }

    #[test]
    fn test_concat_empty() {
        assert!(concat_batches(Vec::new()).is_empty());
    }

    #[tokio::test]
    async fn test_drain_returns_first_error() {
        let items: Vec<Result<StepData>> = vec![
            Ok(batch(&[("x", json!([1]))])),
            Err(SegflowError::Internal("boom".to_string())),
            Ok(batch(&[("x", json!([2]))])),
        ];
        let result = drain(stream::iter(items).boxed()).await;

        assert!(matches!(result, Err(SegflowError::Internal(_))));
    }
}
