//! Greedy autoregressive decoding.
//!
//! ## State machine
//!
//! ```text
//! Init ──▶ Generating ──┬──▶ Done(EndOfSequence)   argmax == EOS
//!                       ├──▶ Done(LengthLimit)     max_seq_len steps taken
//!                       ├──▶ Aborted               cancel observed after a step
//!                       └──▶ Failed                decoder fault
//! ```
//!
//! Each step feeds the whole sequence so far (ids, an all-true mask and the
//! unchanged encoder context) to the decoder, takes the logits for the last
//! position, applies a numerically stable softmax and appends the argmax.
//! EOS is checked before cancellation, so a step that produces EOS finishes
//! even when cancel was requested during it.

use crate::config::RecognitionConfig;
use crate::error::{ModelRole, OcrError};
use crate::model::{primary_output, ModelSession, NamedTensor, DECODER_IDS_INPUT, DECODER_MASK_INPUT};
use crate::pipeline::encode::ContextTensor;
use crate::status::{PipelinePhase, PipelineState};
use serde::Serialize;
use tracing::debug;

/// Token ids generated so far, with the matching attention mask.
///
/// Starts as `[bos]`; grows by one id per step. `ids` and `mask` always have
/// the same length and every mask entry is `true`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSequence {
    ids: Vec<i64>,
    mask: Vec<bool>,
}

impl TokenSequence {
    pub fn new(bos: i64) -> Self {
        Self {
            ids: vec![bos],
            mask: vec![true],
        }
    }

    pub fn push(&mut self, id: i64) {
        self.ids.push(id);
        self.mask.push(true);
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn into_ids(self) -> Vec<i64> {
        self.ids
    }

    fn to_inputs(&self) -> Result<[NamedTensor; 2], crate::model::SessionError> {
        let dims = vec![1, self.ids.len() as i64];
        Ok([
            NamedTensor::i64(DECODER_IDS_INPUT, dims.clone(), self.ids.clone())?,
            NamedTensor::bool(DECODER_MASK_INPUT, dims, self.mask.clone())?,
        ])
    }
}

/// Why generation stopped normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndOfSequence,
    LengthLimit,
}

/// Decoder lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    Init,
    Generating,
    Done(StopReason),
    Aborted,
    Failed,
}

impl DecodeState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DecodeState::Done(_) | DecodeState::Aborted | DecodeState::Failed
        )
    }
}

/// Result of a full decode.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    Done {
        sequence: TokenSequence,
        stop: StopReason,
        steps: usize,
    },
    /// Cancelled; the partial sequence is discarded.
    Aborted { steps: usize },
}

/// Numerically stable softmax: subtract the maximum before exponentiating.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index of the largest value; the first one wins ties. NaNs are skipped.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        if best.map_or(true, |(_, b)| v > b) {
            best = Some((i, v));
        }
    }
    best.map(|(i, _)| i)
}

/// Greedy decoder over one encoder context.
pub struct GreedyDecoder<'a> {
    session: &'a dyn ModelSession,
    context: &'a ContextTensor,
    eos: i64,
    max_steps: usize,
    sequence: TokenSequence,
    state: DecodeState,
    steps: usize,
}

impl<'a> GreedyDecoder<'a> {
    pub fn new(session: &'a dyn ModelSession, context: &'a ContextTensor, config: &RecognitionConfig) -> Self {
        Self {
            session,
            context,
            eos: config.eos_token,
            max_steps: config.max_seq_len,
            sequence: TokenSequence::new(config.bos_token),
            state: DecodeState::Init,
            steps: 0,
        }
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    pub fn sequence(&self) -> &TokenSequence {
        &self.sequence
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Run one decoder call and append its token.
    ///
    /// Returns the new state. Calling `step` in a terminal state is a no-op.
    pub async fn step(&mut self, pipeline: &PipelineState) -> Result<DecodeState, OcrError> {
        if self.state.is_terminal() {
            return Ok(self.state);
        }
        if self.steps >= self.max_steps {
            self.state = DecodeState::Done(StopReason::LengthLimit);
            return Ok(self.state);
        }
        self.state = DecodeState::Generating;

        let id = match self.next_token().await {
            Ok(id) => id,
            Err(e) => {
                self.state = DecodeState::Failed;
                return Err(e);
            }
        };
        self.sequence.push(id);
        self.steps += 1;

        self.state = if id == self.eos {
            DecodeState::Done(StopReason::EndOfSequence)
        } else if pipeline.is_cancelled() {
            DecodeState::Aborted
        } else if self.steps >= self.max_steps {
            DecodeState::Done(StopReason::LengthLimit)
        } else {
            DecodeState::Generating
        };
        Ok(self.state)
    }

    async fn next_token(&self) -> Result<i64, OcrError> {
        let fault = |e: &dyn std::fmt::Display| OcrError::inference(ModelRole::Decoder, e);

        let [ids, mask] = self.sequence.to_inputs().map_err(|e| fault(&e))?;
        let context = self.context.to_named().map_err(|e| fault(&e))?;
        let outputs = self
            .session
            .run(vec![ids, mask, context])
            .await
            .map_err(|e| fault(&e))?;

        let output = primary_output(outputs).ok_or_else(|| fault(&"model returned no outputs"))?;
        let data = output
            .data
            .as_f32()
            .ok_or_else(|| fault(&format!("expected f32 logits, got {}", output.data.type_name())))?;
        let vocab = output
            .dims
            .last()
            .and_then(|&d| usize::try_from(d).ok())
            .filter(|&d| d > 0 && d <= data.len())
            .ok_or_else(|| fault(&format!("unusable logits shape {:?}", output.dims)))?;

        let probs = softmax(&data[data.len() - vocab..]);
        let idx = argmax(&probs).ok_or_else(|| fault(&"logits contain no finite values"))?;
        Ok(idx as i64)
    }

    /// Step until a terminal state, publishing the decode phase per step.
    pub async fn run(mut self, pipeline: &PipelineState) -> Result<DecodeOutcome, OcrError> {
        loop {
            pipeline.set_phase(PipelinePhase::Decoding, self.steps + 1);
            match self.step(pipeline).await? {
                DecodeState::Done(stop) => {
                    debug!("Decoding finished after {} steps ({:?})", self.steps, stop);
                    return Ok(DecodeOutcome::Done {
                        sequence: self.sequence,
                        stop,
                        steps: self.steps,
                    });
                }
                DecodeState::Aborted => {
                    debug!("Decoding aborted after {} steps", self.steps);
                    return Ok(DecodeOutcome::Aborted { steps: self.steps });
                }
                _ => {}
            }
        }
    }
}
