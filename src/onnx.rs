//! ONNX Runtime backed [`ModelSession`].
//!
//! `ort` sessions need `&mut self` to run, so each one sits behind a
//! `Mutex`. Inference is CPU-bound; it runs in `spawn_blocking` so the async
//! pipeline only suspends while waiting for the result.

use crate::error::{ModelRole, OcrError};
use crate::model::{ModelSession, NamedTensor, SessionError, TensorData};
use futures::future::BoxFuture;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{DynValue, Tensor};
use std::sync::{Arc, Mutex};
use tracing::debug;

impl From<ort::Error> for SessionError {
    fn from(e: ort::Error) -> Self {
        SessionError(e.to_string())
    }
}

/// An `ort` session for one model role.
pub struct OrtModelSession {
    role: ModelRole,
    session: Arc<Mutex<Session>>,
}

impl OrtModelSession {
    /// Build a session from the bytes of an `.onnx` file.
    pub fn from_bytes(
        role: ModelRole,
        source_name: &str,
        bytes: &[u8],
        intra_threads: Option<usize>,
    ) -> Result<Self, OcrError> {
        let build = || -> Result<Session, ort::Error> {
            let mut builder =
                Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
            if let Some(n) = intra_threads {
                builder = builder.with_intra_threads(n)?;
            }
            builder.commit_from_memory(bytes)
        };

        let session = build().map_err(|e| OcrError::ModelLoad {
            role,
            source_name: source_name.to_string(),
            detail: e.to_string(),
        })?;

        debug!(
            "Loaded {} session: inputs={:?} outputs={:?}",
            role,
            session.inputs.iter().map(|i| i.name.as_str()).collect::<Vec<_>>(),
            session.outputs.iter().map(|o| o.name.as_str()).collect::<Vec<_>>()
        );

        Ok(Self {
            role,
            session: Arc::new(Mutex::new(session)),
        })
    }

    pub fn role(&self) -> ModelRole {
        self.role
    }
}

impl ModelSession for OrtModelSession {
    fn run(&self, inputs: Vec<NamedTensor>) -> BoxFuture<'_, Result<Vec<NamedTensor>, SessionError>> {
        let session = Arc::clone(&self.session);
        let role = self.role;
        Box::pin(async move {
            tokio::task::spawn_blocking(move || run_blocking(&session, inputs))
                .await
                .map_err(|e| SessionError(format!("{role} inference task failed: {e}")))?
        })
    }
}

fn to_value(tensor: NamedTensor) -> Result<(String, DynValue), SessionError> {
    let NamedTensor { name, dims, data } = tensor;
    let value = match data {
        TensorData::F32(v) => Tensor::from_array((dims, v))?.into_dyn(),
        TensorData::I64(v) => Tensor::from_array((dims, v))?.into_dyn(),
        TensorData::Bool(v) => Tensor::from_array((dims, v))?.into_dyn(),
    };
    Ok((name, value))
}

fn run_blocking(session: &Mutex<Session>, inputs: Vec<NamedTensor>) -> Result<Vec<NamedTensor>, SessionError> {
    let mut guard = session
        .lock()
        .map_err(|_| SessionError::new("session lock poisoned"))?;

    let output_names: Vec<String> = guard.outputs.iter().map(|o| o.name.clone()).collect();
    let values = inputs
        .into_iter()
        .map(to_value)
        .collect::<Result<Vec<_>, _>>()?;

    let outputs = guard.run(values)?;

    let mut result = Vec::with_capacity(output_names.len());
    for name in output_names {
        let value = &outputs[name.as_str()];
        let tensor = if let Ok((shape, data)) = value.try_extract_tensor::<f32>() {
            NamedTensor::f32(name, shape.iter().copied().collect(), data.to_vec())?
        } else if let Ok((shape, data)) = value.try_extract_tensor::<i64>() {
            NamedTensor::i64(name, shape.iter().copied().collect(), data.to_vec())?
        } else if let Ok((shape, data)) = value.try_extract_tensor::<bool>() {
            NamedTensor::bool(name, shape.iter().copied().collect(), data.to_vec())?
        } else {
            return Err(SessionError(format!(
                "output '{name}' has an unsupported element type"
            )));
        };
        result.push(tensor);
    }
    Ok(result)
}
