//! Error kinds propagated across the engine's component boundaries.
//!
//! Every fallible operation in this crate returns a `Result<_, EngineError>`;
//! there is no exceptions-for-control-flow and no silent panicking in
//! non-test code. See `spec.md` §7 for the semantics of each kind.

use thiserror::Error;

/// The error type shared by every component in the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A configuration value was out of range or internally inconsistent.
    /// The engine refuses to initialize when this is returned.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A `sample` was requested for more records than the buffer currently
    /// holds. Benign: callers defer the update until warmup completes.
    #[error("requested {requested} samples but buffer only holds {available}")]
    InsufficientSamples { requested: usize, available: usize },

    /// A loss or gradient norm was non-finite. The optimizer step is
    /// skipped and a failure counter is incremented; sustained failures
    /// escalate to a `CRITICAL` validator issue.
    #[error("numerical instability detected: {0}")]
    NumericalInstability(String),

    /// A checkpoint's header declares a format/shape this build cannot
    /// read. Never silently remapped.
    #[error("incompatible checkpoint: {0}")]
    IncompatibleCheckpoint(String),

    /// Filesystem or serialization failure while saving/loading a
    /// checkpoint. Training continues with the in-memory agent.
    #[error("checkpoint i/o error: {0}")]
    CheckpointIO(String),

    /// Cooperative cancellation was observed at a suspension point.
    #[error("operation cancelled")]
    Cancelled,

    /// A baseline opponent produced no move although legal moves existed.
    /// Treated as a programmer bug in the collaborator; fails fast.
    #[error("baseline opponent produced no move with {legal_action_count} legal actions available")]
    EvaluationError { legal_action_count: usize },

    /// The seed fabric was asked to reseed with a different master seed
    /// after streams had already been consumed.
    #[error("seed fabric already initialized with a different master seed")]
    ReseedConflict,
}

/// Convenience alias used throughout the crate.
pub type EngineResult<T> = Result<T, EngineError>;

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::CheckpointIO(e.to_string())
    }
}

impl From<bincode::Error> for EngineError {
    fn from(e: bincode::Error) -> Self {
        EngineError::CheckpointIO(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::CheckpointIO(e.to_string())
    }
}
