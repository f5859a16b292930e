//! Error types for the spectral core

use thiserror::Error;

/// Spectral pipeline error types
#[derive(Error, Debug)]
pub enum SpectralError {
    /// Input tensor is malformed (non-finite values, empty batch, ...)
    #[error("Malformed input: {reason}")]
    MalformedInput { reason: String },

    /// Batch items or paired tensors disagree on shape
    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },

    /// Waveform shorter than one analysis frame
    #[error("Waveform too short: need {needed} samples, got {got}")]
    TooShort { needed: usize, got: usize },

    /// Magnitude range of a batch item collapsed below epsilon
    #[error("Degenerate envelope for batch item {item}: range {range:e}")]
    DegenerateEnvelope { item: usize, range: f32 },

    /// Inverse transform called with a framing that does not match the spectrogram
    #[error("Reconstruction mismatch: {reason}")]
    ReconstructionMismatch { reason: String },

    /// Model returned a tensor of the wrong shape
    #[error("Model output shape mismatch: expected {expected}, got {got}")]
    ModelShapeMismatch { expected: String, got: String },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Model file not found
    #[error("Model not found: {path}")]
    ModelNotFound { path: String },

    /// Model capability failed
    #[error("Model failure: {0}")]
    Model(String),

    /// Tract error
    #[error("Tract error: {0}")]
    Tract(String),

    /// FFT backend error
    #[error("FFT failed: {0}")]
    Fft(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpectralError {
    /// Errors caused by the contents of a single batch (bad shapes, silent
    /// segments). The orchestration layer may skip the batch and continue.
    pub fn is_batch_local(&self) -> bool {
        matches!(
            self,
            SpectralError::MalformedInput { .. }
                | SpectralError::ShapeMismatch { .. }
                | SpectralError::TooShort { .. }
                | SpectralError::DegenerateEnvelope { .. }
        )
    }

    pub(crate) fn shape(expected: impl Into<String>, got: &[usize]) -> Self {
        SpectralError::ShapeMismatch {
            expected: expected.into(),
            got: format!("{:?}", got),
        }
    }
}

/// Result type for spectral operations
pub type SpectralResult<T> = Result<T, SpectralError>;
