//! Spectral pipeline configuration

use serde::{Deserialize, Serialize};

use crate::error::{SpectralError, SpectralResult};

/// Smallest magnitude range accepted by the normalizer. Also the range
/// substituted for degenerate items under [`DegeneratePolicy::Floor`].
pub const DEFAULT_EPSILON: f32 = 1e-8;

/// Analysis/synthesis window shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WindowKind {
    /// Periodic Hann (constant overlap-add at 50% overlap)
    Hann,
    /// Symmetric Hann, zero at both edges
    #[default]
    HannSymmetric,
}

impl WindowKind {
    /// Build window coefficients of the given length
    pub fn coefficients(&self, size: usize) -> Vec<f32> {
        let denom = match self {
            WindowKind::Hann => size as f64,
            WindowKind::HannSymmetric => (size.max(2) - 1) as f64,
        };
        (0..size)
            .map(|i| {
                (0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / denom).cos())) as f32
            })
            .collect()
    }
}

/// What to do with a batch item whose magnitude range is below epsilon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DegeneratePolicy {
    /// Substitute `epsilon` as the range and flag the envelope
    #[default]
    Floor,
    /// Fail with [`SpectralError::DegenerateEnvelope`]
    Reject,
}

/// Which envelope denormalizes the model's vocal prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EnvelopePolicy {
    /// Reuse the mixture's own envelope
    #[default]
    Mixture,
    /// Use the vocal target's envelope (needs the target, so validation/export only)
    Target,
}

/// Spectral pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralConfig {
    /// STFT frame size (samples)
    pub frame_size: usize,

    /// STFT hop size (samples)
    pub hop_size: usize,

    /// Window shape
    pub window: WindowKind,

    /// Keep mixture phase and return complex predictions
    pub complex_reconstruction: bool,

    /// Minimum magnitude range per item
    pub epsilon: f32,

    /// Degenerate envelope handling
    pub degenerate: DegeneratePolicy,

    /// Envelope used for denormalizing predictions
    pub envelope: EnvelopePolicy,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            frame_size: 1024,
            hop_size: 512,
            window: WindowKind::HannSymmetric,
            complex_reconstruction: true,
            epsilon: DEFAULT_EPSILON,
            degenerate: DegeneratePolicy::Floor,
            envelope: EnvelopePolicy::Mixture,
        }
    }
}

impl SpectralConfig {
    /// Magnitude-only configuration (training does not need phase)
    pub fn magnitude_only() -> Self {
        Self {
            complex_reconstruction: false,
            ..Default::default()
        }
    }

    /// Builder: set frame and hop size
    pub fn with_framing(mut self, frame_size: usize, hop_size: usize) -> Self {
        self.frame_size = frame_size;
        self.hop_size = hop_size;
        self
    }

    /// Builder: set envelope policy
    pub fn with_envelope(mut self, envelope: EnvelopePolicy) -> Self {
        self.envelope = envelope;
        self
    }

    /// Number of one-sided frequency bins
    pub fn bins(&self) -> usize {
        self.frame_size / 2 + 1
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> SpectralResult<()> {
        if self.frame_size < 2 || self.frame_size % 2 != 0 {
            return Err(SpectralError::InvalidConfig(format!(
                "frame_size must be even and >= 2, got {}",
                self.frame_size
            )));
        }
        if self.hop_size == 0 || self.hop_size > self.frame_size {
            return Err(SpectralError::InvalidConfig(format!(
                "hop_size must be in 1..={}, got {}",
                self.frame_size, self.hop_size
            )));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(SpectralError::InvalidConfig(format!(
                "epsilon must be positive and finite, got {}",
                self.epsilon
            )));
        }
        if self.hop_size * 2 != self.frame_size {
            log::debug!(
                "hop {} is not half of frame {}: reconstruction relies on window-envelope division",
                self.hop_size,
                self.frame_size
            );
        }
        Ok(())
    }
}
