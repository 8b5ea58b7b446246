//! Encoder stage: normalised image tensor → context tensor.
//!
//! The context is opaque to the pipeline. It is computed once per
//! prediction and handed to every decoder step unchanged, shape included.

use crate::error::{ModelRole, OcrError};
use crate::model::{primary_output, ModelSession, NamedTensor, SessionError, TensorData, DECODER_CONTEXT_INPUT, IMAGE_INPUT};
use crate::pipeline::normalize::ImageTensor;
use tracing::debug;

/// Encoder output, reused verbatim as the decoder's `context` input.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextTensor {
    pub dims: Vec<i64>,
    pub data: TensorData,
}

impl ContextTensor {
    /// Wrap as the decoder's context input.
    pub fn to_named(&self) -> Result<NamedTensor, SessionError> {
        NamedTensor::new(DECODER_CONTEXT_INPUT, self.dims.clone(), self.data.clone())
    }
}

/// Run the encoder once on the final image tensor.
pub async fn encode_image(
    tensor: &ImageTensor,
    encoder: &dyn ModelSession,
) -> Result<ContextTensor, OcrError> {
    let input = tensor
        .to_named(IMAGE_INPUT)
        .map_err(|e| OcrError::inference(ModelRole::Encoder, e))?;
    let outputs = encoder
        .run(vec![input])
        .await
        .map_err(|e| OcrError::inference(ModelRole::Encoder, e))?;
    let output = primary_output(outputs)
        .ok_or_else(|| OcrError::inference(ModelRole::Encoder, "model returned no outputs"))?;

    debug!(
        "Encoded {}x{} image → context {:?}",
        tensor.width, tensor.height, output.dims
    );

    Ok(ContextTensor {
        dims: output.dims,
        data: output.data,
    })
}
