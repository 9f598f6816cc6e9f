//! Error taxonomy for the filter class predictor
//!
//! Every failure here is scoped: a protocol violation or training failure ends
//! the session that caused it, never the process.

use std::io;
use thiserror::Error;

/// Errors raised by the cost model, classifier, retrain policy and sessions
#[derive(Error, Debug)]
pub enum ClfError {
    /// Malformed message on a session
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Degenerate or unreadable dataset, or the trainer failed
    #[error("Training failure: {0}")]
    TrainingFailure(String),

    /// Feature row width does not match the model input width
    #[error("Shape mismatch: model expects {expected} features, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// Best achievable cost over the dataset is zero
    #[error("Degenerate dataset: best achievable cost is zero")]
    DegenerateDataset,

    /// Predict called with anything other than a single row
    #[error("Unsupported batch size: expected exactly 1 row, got {0}")]
    UnsupportedBatchSize(usize),

    /// Model produced no usable class scores
    #[error("Inference error: {0}")]
    Inference(String),

    /// Peer went away mid-session
    #[error("Peer disconnected")]
    PeerDisconnect,

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for predictor operations
pub type Result<T> = std::result::Result<T, ClfError>;

impl ClfError {
    /// True when the error only reflects the client closing its side
    pub fn is_peer_disconnect(&self) -> bool {
        match self {
            ClfError::PeerDisconnect => true,
            ClfError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }

    /// Short label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            ClfError::ProtocolViolation(_) => "protocol_violation",
            ClfError::TrainingFailure(_) => "training_failure",
            ClfError::ShapeMismatch { .. } => "shape_mismatch",
            ClfError::DegenerateDataset => "degenerate_dataset",
            ClfError::UnsupportedBatchSize(_) => "unsupported_batch_size",
            ClfError::Inference(_) => "inference",
            ClfError::PeerDisconnect => "peer_disconnect",
            ClfError::Config(_) => "config",
            ClfError::Io(_) => "io",
        }
    }
}
