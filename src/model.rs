//! Model invocation contract shared by the resizer, encoder and decoder.
//!
//! The pipeline never sees a concrete runtime. Each model is an
//! `Arc<dyn ModelSession>` that accepts named, typed tensors and returns
//! named output tensors as flat buffers plus dims. The ONNX Runtime backend
//! lives in [`crate::onnx`]; tests plug in closures.
//!
//! Every call to [`ModelSession::run`] is a suspension point: the pipeline
//! awaits it and resumes sequentially.

use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Input name of the resizer and encoder graphs.
pub const IMAGE_INPUT: &str = "input";
/// Token-id input of the decoder graph.
pub const DECODER_IDS_INPUT: &str = "x";
/// Attention-mask input of the decoder graph.
pub const DECODER_MASK_INPUT: &str = "mask";
/// Encoder-context input of the decoder graph.
pub const DECODER_CONTEXT_INPUT: &str = "context";
/// Preferred output name; the first output is used when absent.
pub const PRIMARY_OUTPUT: &str = "output";

/// A runtime fault reported by a session backend.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct SessionError(pub String);

impl SessionError {
    pub fn new(msg: impl Into<String>) -> Self {
        SessionError(msg.into())
    }
}

/// Flat tensor storage with its declared element type.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    I64(Vec<i64>),
    Bool(Vec<bool>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(v) => v.len(),
            TensorData::I64(v) => v.len(),
            TensorData::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element type name, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            TensorData::F32(_) => "f32",
            TensorData::I64(_) => "i64",
            TensorData::Bool(_) => "bool",
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            TensorData::F32(v) => Some(v),
            _ => None,
        }
    }
}

/// A named tensor crossing the model boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedTensor {
    pub name: String,
    pub dims: Vec<i64>,
    pub data: TensorData,
}

impl NamedTensor {
    /// Build a tensor, checking that `dims` describes exactly `data.len()`
    /// elements.
    pub fn new(
        name: impl Into<String>,
        dims: Vec<i64>,
        data: TensorData,
    ) -> Result<Self, SessionError> {
        let name = name.into();
        let expected = element_count(&dims)
            .ok_or_else(|| SessionError(format!("tensor '{name}' has invalid dims {dims:?}")))?;
        if expected != data.len() {
            return Err(SessionError(format!(
                "tensor '{name}' dims {dims:?} describe {expected} elements, buffer holds {}",
                data.len()
            )));
        }
        Ok(Self { name, dims, data })
    }

    pub fn f32(name: impl Into<String>, dims: Vec<i64>, data: Vec<f32>) -> Result<Self, SessionError> {
        Self::new(name, dims, TensorData::F32(data))
    }

    pub fn i64(name: impl Into<String>, dims: Vec<i64>, data: Vec<i64>) -> Result<Self, SessionError> {
        Self::new(name, dims, TensorData::I64(data))
    }

    pub fn bool(name: impl Into<String>, dims: Vec<i64>, data: Vec<bool>) -> Result<Self, SessionError> {
        Self::new(name, dims, TensorData::Bool(data))
    }
}

fn element_count(dims: &[i64]) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, &d| {
        usize::try_from(d).ok().and_then(|d| acc.checked_mul(d))
    })
}

/// Pick the model's result tensor: the output named [`PRIMARY_OUTPUT`] if
/// present, otherwise the first one.
pub fn primary_output(mut outputs: Vec<NamedTensor>) -> Option<NamedTensor> {
    match outputs.iter().position(|t| t.name == PRIMARY_OUTPUT) {
        Some(idx) => Some(outputs.swap_remove(idx)),
        None if !outputs.is_empty() => Some(outputs.swap_remove(0)),
        None => None,
    }
}

/// A loaded inference function.
///
/// Implementations must be `Send + Sync`; the pipeline shares sessions
/// read-only through `Arc` and never calls one concurrently with itself.
pub trait ModelSession: Send + Sync {
    /// Run the model on `inputs` and return every output tensor.
    fn run(&self, inputs: Vec<NamedTensor>) -> BoxFuture<'_, Result<Vec<NamedTensor>, SessionError>>;
}

impl<F> ModelSession for F
where
    F: Fn(Vec<NamedTensor>) -> Result<Vec<NamedTensor>, SessionError> + Send + Sync,
{
    fn run(&self, inputs: Vec<NamedTensor>) -> BoxFuture<'_, Result<Vec<NamedTensor>, SessionError>> {
        let result = self(inputs);
        Box::pin(async move { result })
    }
}

/// The three sessions a pipeline needs, loaded once at startup.
#[derive(Clone)]
pub struct ModelSessions {
    pub resizer: Arc<dyn ModelSession>,
    pub encoder: Arc<dyn ModelSession>,
    pub decoder: Arc<dyn ModelSession>,
}

impl ModelSessions {
    pub fn new(
        resizer: Arc<dyn ModelSession>,
        encoder: Arc<dyn ModelSession>,
        decoder: Arc<dyn ModelSession>,
    ) -> Self {
        Self {
            resizer,
            encoder,
            decoder,
        }
    }
}

impl fmt::Debug for ModelSessions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSessions")
            .field("resizer", &"<dyn ModelSession>")
            .field("encoder", &"<dyn ModelSession>")
            .field("decoder", &"<dyn ModelSession>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_checks_element_count() {
        assert!(NamedTensor::f32("a", vec![1, 2, 3], vec![0.0; 6]).is_ok());
        let err = NamedTensor::f32("a", vec![1, 2, 3], vec![0.0; 5]).unwrap_err();
        assert!(err.to_string().contains("6 elements"), "got: {err}");
    }

    #[test]
    fn negative_dims_rejected() {
        assert!(NamedTensor::i64("x", vec![1, -1], vec![1]).is_err());
    }

    #[test]
    fn primary_output_prefers_named() {
        let outputs = vec![
            NamedTensor::f32("aux", vec![1], vec![0.0]).unwrap(),
            NamedTensor::f32("output", vec![1], vec![1.0]).unwrap(),
        ];
        let out = primary_output(outputs).unwrap();
        assert_eq!(out.name, "output");
    }

    #[test]
    fn primary_output_falls_back_to_first() {
        let outputs = vec![
            NamedTensor::f32("logits", vec![1], vec![0.0]).unwrap(),
            NamedTensor::f32("aux", vec![1], vec![1.0]).unwrap(),
        ];
        assert_eq!(primary_output(outputs).unwrap().name, "logits");
        assert!(primary_output(Vec::new()).is_none());
    }

    #[test]
    fn closure_is_a_session() {
        let session = |inputs: Vec<NamedTensor>| -> Result<Vec<NamedTensor>, SessionError> { Ok(inputs) };
        let t = NamedTensor::bool("m", vec![2], vec![true, true]).unwrap();
        let out = tokio_test::block_on(session.run(vec![t.clone()])).unwrap();
        assert_eq!(out, vec![t]);
    }
}
