//! Error types for training orchestration

use thiserror::Error;
use vx_spectral::SpectralError;

/// Training error types
#[derive(Error, Debug)]
pub enum TrainError {
    /// Spectral pipeline failure
    #[error(transparent)]
    Spectral(#[from] SpectralError),

    /// Dataset/loader failure
    #[error("Loader error: {0}")]
    Loader(String),

    /// WAV decoding/encoding failure
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// Checkpoint read/write failure
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Prediction export failure
    #[error("Export error: {0}")]
    Export(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Model capability failure
    #[error("Model error: {0}")]
    Model(String),

    /// Every batch of an epoch was skipped or the loader was empty
    #[error("Epoch {epoch} produced no usable {phase} batches")]
    EmptyEpoch { epoch: usize, phase: &'static str },

    /// Too many batches skipped in one epoch
    #[error("Epoch {epoch}: {skipped} batches skipped, aborting run")]
    TooManySkipped { epoch: usize, skipped: usize },

    /// Candle backend failure
    #[cfg(feature = "candle")]
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrainError {
    /// Whether the failing batch can be skipped while the run continues
    pub fn is_batch_recoverable(&self) -> bool {
        match self {
            TrainError::Spectral(e) => e.is_batch_local(),
            _ => false,
        }
    }
}

/// Result type for training operations
pub type TrainResult<T> = Result<T, TrainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let degenerate = TrainError::from(SpectralError::DegenerateEnvelope { item: 0, range: 0.0 });
        assert!(degenerate.is_batch_recoverable());

        let mismatch = TrainError::from(SpectralError::ReconstructionMismatch {
            reason: "bins".into(),
        });
        assert!(!mismatch.is_batch_recoverable());

        let model = TrainError::from(SpectralError::Model("boom".into()));
        assert!(!model.is_batch_recoverable());

        assert!(!TrainError::Loader("gone".into()).is_batch_recoverable());
    }
}
