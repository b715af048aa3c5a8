//! Pass-through unit.

use super::{StreamTransformer, Transformer};
use crate::core::{InputStream, OutputStream, StepData};
use crate::errors::UnitError;
use async_trait::async_trait;
use futures::StreamExt;

/// Returns its inputs unchanged.
///
/// Combined with an adapter this renames or selects keys, which is how the
/// terminal `output` step exposes `y_pred` and `y_scores`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

#[async_trait]
impl Transformer for Identity {
    fn name(&self) -> &str {
        "Identity"
    }

    async fn transform(&self, inputs: StepData) -> Result<StepData, UnitError> {
        Ok(inputs)
    }
}

impl StreamTransformer for Identity {
    fn name(&self) -> &str {
        "Identity"
    }

    fn transform_stream(&self, inputs: InputStream) -> OutputStream {
        inputs.map(Ok).boxed()
    }
}
