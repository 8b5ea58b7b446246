//! Pipeline phase and cancellation: the single source of truth consulted at
//! every suspension point.
//!
//! [`PipelineState`] is owned by the pipeline and is the only writer. Any
//! number of readers observe it through [`StatusReceiver`]s (a
//! `tokio::sync::watch` channel) or as a `Stream` via
//! [`PipelineState::stream`]. Cancellation is a shared flag the pipeline
//! polls at well-defined boundaries; it never interrupts a running model.
//!
//! # Example
//!
//! ```rust
//! use img2latex::status::{PipelinePhase, PipelineState};
//!
//! let state = PipelineState::new();
//! let status = state.subscribe();
//! let cancel = state.cancel_handle();
//!
//! assert_eq!(status.borrow().phase, PipelinePhase::Idle);
//! cancel.cancel();
//! assert!(state.is_cancelled());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Coarse phase of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelinePhase {
    /// Nothing running; ready for a prediction.
    #[default]
    Idle,
    /// Normalising the image and searching for its width.
    Resizing,
    /// Running the encoder.
    Encoding,
    /// Generating tokens.
    Decoding,
    /// The last prediction failed. Idle-equivalent: a new prediction may start.
    Error,
}

impl PipelinePhase {
    /// `true` for the resting phases a prediction may start from.
    pub fn is_resting(self) -> bool {
        matches!(self, PipelinePhase::Idle | PipelinePhase::Error)
    }
}

/// Snapshot published on the status channel.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub phase: PipelinePhase,
    /// Human-readable detail, e.g. `"Resizer error. Try again"`.
    pub message: Option<String>,
    /// Iteration within the phase (width-search iteration or decode step).
    pub step: usize,
}

impl PipelineStatus {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn running(phase: PipelinePhase, step: usize) -> Self {
        Self {
            phase,
            message: None,
            step,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            phase: PipelinePhase::Error,
            message: Some(message.into()),
            step: 0,
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.phase, &self.message) {
            (PipelinePhase::Idle, None) => f.write_str("Ready"),
            (PipelinePhase::Idle, Some(m)) => write!(f, "{m}. Ready"),
            (PipelinePhase::Error, m) => {
                write!(f, "Error: {}. Ready", m.as_deref().unwrap_or("unknown"))
            }
            (PipelinePhase::Resizing, _) => write!(f, "Resizing image {}", ".".repeat(self.step)),
            (PipelinePhase::Encoding, _) => f.write_str("Running encoder"),
            (PipelinePhase::Decoding, _) => write!(f, "Running decoder (token {})", self.step),
        }
    }
}

/// Read side of the status channel.
pub type StatusReceiver = watch::Receiver<PipelineStatus>;

/// Requests cooperative cancellation of the running prediction.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Write side: phase publication plus the cancel flag.
#[derive(Debug)]
pub struct PipelineState {
    tx: watch::Sender<PipelineStatus>,
    cancel: Arc<AtomicBool>,
    running: AtomicBool,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(PipelineStatus::idle());
        Self {
            tx,
            cancel: Arc::new(AtomicBool::new(false)),
            running: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> StatusReceiver {
        self.tx.subscribe()
    }

    /// Status updates as a `Stream`, starting with the current value.
    pub fn stream(&self) -> WatchStream<PipelineStatus> {
        WatchStream::new(self.tx.subscribe())
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flag: Arc::clone(&self.cancel),
        }
    }

    pub fn current(&self) -> PipelineStatus {
        self.tx.borrow().clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Claim the pipeline for one prediction. Clears any stale cancel request
    /// and publishes `Idle`. Returns `false` when a prediction is already
    /// running.
    pub fn begin(&self) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.cancel.store(false, Ordering::SeqCst);
        self.publish(PipelineStatus::idle());
        true
    }

    /// Publish a running phase.
    pub fn set_phase(&self, phase: PipelinePhase, step: usize) {
        self.publish(PipelineStatus::running(phase, step));
    }

    /// End the prediction successfully or by cancellation: back to `Idle`.
    pub fn finish(&self) {
        self.release(PipelineStatus::idle());
    }

    /// End the prediction with a failure message.
    pub fn fail(&self, message: impl Into<String>) {
        self.release(PipelineStatus::error(message));
    }

    fn release(&self, status: PipelineStatus) {
        self.cancel.store(false, Ordering::SeqCst);
        self.publish(status);
        self.running.store(false, Ordering::SeqCst);
    }

    fn publish(&self, status: PipelineStatus) {
        // `send_replace` succeeds even when no receiver is alive.
        self.tx.send_replace(status);
    }
}
