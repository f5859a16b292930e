//! Per-item min/max batch normalization
//!
//! Each batch item is rescaled into [0, 1] using the minimum and maximum of
//! its own magnitude over the channel, frequency and time axes. Scales are
//! never shared between items of the same batch.

use ndarray::{Array4, ArrayView3, Axis, Zip};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};

use crate::config::{DegeneratePolicy, SpectralConfig};
use crate::error::{SpectralError, SpectralResult};

/// Min/max envelope of one batch item
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Minimum magnitude
    pub min: f32,
    /// Maximum magnitude
    pub max: f32,
    /// Divisor actually used; equals `max - min` unless the item was degenerate
    pub scale: f32,
    /// Range fell below epsilon and was floored
    pub degenerate: bool,
}

impl Envelope {
    /// Map a magnitude into normalized space
    #[inline]
    pub fn apply(&self, value: f32) -> f32 {
        (value - self.min) / self.scale
    }

    /// Map a normalized value back to magnitude
    #[inline]
    pub fn invert(&self, value: f32) -> f32 {
        value * self.scale + self.min
    }
}

/// Denormalized model output
#[derive(Debug, Clone, PartialEq)]
pub enum Spectrogram {
    /// Magnitude only `(batch, channels, bins, frames)`
    Magnitude(Array4<f32>),
    /// Magnitude with reattached phase
    Complex(Array4<Complex32>),
}

impl Spectrogram {
    /// Tensor shape
    pub fn shape(&self) -> &[usize] {
        match self {
            Spectrogram::Magnitude(m) => m.shape(),
            Spectrogram::Complex(c) => c.shape(),
        }
    }

    /// Whether phase is attached
    pub fn is_complex(&self) -> bool {
        matches!(self, Spectrogram::Complex(_))
    }

    /// Magnitude view (computed for complex data)
    pub fn magnitude(&self) -> Array4<f32> {
        match self {
            Spectrogram::Magnitude(m) => m.clone(),
            Spectrogram::Complex(c) => c.mapv(|z| z.norm()),
        }
    }

    /// Complex tensor, if phase is attached
    pub fn as_complex(&self) -> Option<&Array4<Complex32>> {
        match self {
            Spectrogram::Complex(c) => Some(c),
            Spectrogram::Magnitude(_) => None,
        }
    }
}

/// Output of [`BatchNormalizer::normalize`]
#[derive(Debug, Clone)]
pub struct Normalized {
    /// Magnitudes rescaled into [0, 1]
    pub data: Array4<f32>,
    /// One envelope per batch item
    pub envelopes: Vec<Envelope>,
    /// Phase of the source spectrogram, when retained
    pub phase: Option<Array4<f32>>,
}

impl Normalized {
    /// Indices of items whose envelope was floored
    pub fn degenerate_items(&self) -> Vec<usize> {
        self.envelopes
            .iter()
            .enumerate()
            .filter(|(_, e)| e.degenerate)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Stateless per-item min/max normalizer
#[derive(Debug, Clone)]
pub struct BatchNormalizer {
    epsilon: f32,
    policy: DegeneratePolicy,
    keep_phase: bool,
}

impl BatchNormalizer {
    /// Create normalizer
    pub fn new(epsilon: f32, policy: DegeneratePolicy, keep_phase: bool) -> Self {
        Self {
            epsilon,
            policy,
            keep_phase,
        }
    }

    /// Create normalizer from pipeline configuration
    pub fn from_config(config: &SpectralConfig) -> Self {
        Self::new(config.epsilon, config.degenerate, config.complex_reconstruction)
    }

    /// Compute the envelope of one item's magnitude
    pub fn envelope(&self, item: usize, magnitude: ArrayView3<f32>) -> SpectralResult<Envelope> {
        if magnitude.is_empty() {
            return Err(SpectralError::MalformedInput {
                reason: format!("batch item {} is empty", item),
            });
        }

        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for &v in magnitude.iter() {
            if !v.is_finite() {
                return Err(SpectralError::MalformedInput {
                    reason: format!("batch item {} contains non-finite magnitude", item),
                });
            }
            min = min.min(v);
            max = max.max(v);
        }

        let range = max - min;
        if range < self.epsilon {
            match self.policy {
                DegeneratePolicy::Reject => {
                    return Err(SpectralError::DegenerateEnvelope { item, range });
                }
                DegeneratePolicy::Floor => {
                    log::debug!(
                        "Batch item {} has degenerate range {:e}, flooring to {:e}",
                        item,
                        range,
                        self.epsilon
                    );
                    return Ok(Envelope {
                        min,
                        max,
                        scale: self.epsilon,
                        degenerate: true,
                    });
                }
            }
        }

        Ok(Envelope {
            min,
            max,
            scale: range,
            degenerate: false,
        })
    }

    /// Normalize an already-real tensor `(batch, channels, bins, frames)`
    pub fn normalize_magnitude(
        &self,
        magnitude: &Array4<f32>,
    ) -> SpectralResult<(Array4<f32>, Vec<Envelope>)> {
        if magnitude.len_of(Axis(0)) == 0 {
            return Err(SpectralError::MalformedInput {
                reason: "empty batch".into(),
            });
        }

        let mut data = magnitude.clone();
        let mut envelopes = Vec::with_capacity(magnitude.len_of(Axis(0)));

        for (item, mut slice) in data.outer_iter_mut().enumerate() {
            let envelope = self.envelope(item, slice.view())?;
            slice.mapv_inplace(|v| envelope.apply(v));
            envelopes.push(envelope);
        }

        Ok((data, envelopes))
    }

    /// Normalize the magnitude of a complex spectrogram batch
    pub fn normalize(&self, spectrogram: &Array4<Complex32>) -> SpectralResult<Normalized> {
        let magnitude = spectrogram.mapv(|z| z.norm());
        let (data, envelopes) = self.normalize_magnitude(&magnitude)?;
        let phase = self.keep_phase.then(|| spectrogram.mapv(|z| z.arg()));

        Ok(Normalized {
            data,
            envelopes,
            phase,
        })
    }

    /// Restore scale, and reattach phase when supplied
    pub fn denormalize(
        &self,
        normalized: &Array4<f32>,
        envelopes: &[Envelope],
        phase: Option<&Array4<f32>>,
    ) -> SpectralResult<Spectrogram> {
        let items = normalized.len_of(Axis(0));
        if envelopes.len() != items {
            return Err(SpectralError::ShapeMismatch {
                expected: format!("{} envelopes", items),
                got: format!("{} envelopes", envelopes.len()),
            });
        }

        let mut magnitude = normalized.clone();
        for (mut slice, envelope) in magnitude.outer_iter_mut().zip(envelopes) {
            slice.mapv_inplace(|v| envelope.invert(v));
        }

        match phase {
            None => Ok(Spectrogram::Magnitude(magnitude)),
            Some(phase) => {
                if phase.shape() != magnitude.shape() {
                    return Err(SpectralError::shape(
                        format!("phase of shape {:?}", magnitude.shape()),
                        phase.shape(),
                    ));
                }
                let complex = Zip::from(&magnitude)
                    .and(phase)
                    .map_collect(|&m, &p| Complex32::from_polar(m, p));
                Ok(Spectrogram::Complex(complex))
            }
        }
    }
}

impl Default for BatchNormalizer {
    fn default() -> Self {
        Self::from_config(&SpectralConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array4;

    fn ramp(batch: usize, scale: f32) -> Array4<f32> {
        Array4::from_shape_fn((batch, 1, 5, 4), |(b, _, f, t)| {
            scale * (b as f32 + 1.0) * (f as f32 * 0.3 + t as f32 * 0.1 + 0.05)
        })
    }

    #[test]
    fn test_normalized_range() {
        let normalizer = BatchNormalizer::default();
        let (data, envelopes) = normalizer.normalize_magnitude(&ramp(3, 2.0)).unwrap();

        assert_eq!(envelopes.len(), 3);
        assert!(data.iter().all(|&v| (0.0..=1.0).contains(&v)));
        for item in data.outer_iter() {
            let min = item.iter().cloned().fold(f32::INFINITY, f32::min);
            let max = item.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            assert_eq!(min, 0.0);
            assert_relative_eq!(max, 1.0, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_round_trip_magnitude() {
        let normalizer = BatchNormalizer::default();
        let x = ramp(2, 3.7);
        let (data, envelopes) = normalizer.normalize_magnitude(&x).unwrap();
        let restored = normalizer.denormalize(&data, &envelopes, None).unwrap();

        let Spectrogram::Magnitude(restored) = restored else {
            panic!("expected magnitude output");
        };
        for (a, b) in x.iter().zip(restored.iter()) {
            assert_relative_eq!(a, b, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_degenerate_zero_and_constant() {
        let normalizer = BatchNormalizer::default();
        for value in [0.0f32, 0.25, 5.0] {
            let x = Array4::from_elem((1, 1, 4, 3), value);
            let (data, envelopes) = normalizer.normalize_magnitude(&x).unwrap();
            assert!(data.iter().all(|v| v.is_finite()));
            assert!(data.iter().all(|&v| v == 0.0));
            assert!(envelopes[0].degenerate);

            let Spectrogram::Magnitude(back) =
                normalizer.denormalize(&data, &envelopes, None).unwrap()
            else {
                panic!("expected magnitude output");
            };
            assert!(back.iter().all(|&v| v == value));
        }
    }

    #[test]
    fn test_degenerate_reject() {
        let normalizer = BatchNormalizer::new(1e-8, DegeneratePolicy::Reject, false);
        let mut x = ramp(2, 1.0);
        x.index_axis_mut(Axis(0), 1).fill(0.5);

        match normalizer.normalize_magnitude(&x) {
            Err(SpectralError::DegenerateEnvelope { item, .. }) => assert_eq!(item, 1),
            other => panic!("expected degenerate envelope, got {:?}", other),
        }
    }

    #[test]
    fn test_batch_independence() {
        let normalizer = BatchNormalizer::default();
        let a = ramp(2, 1.0);
        let mut b = a.clone();
        b.index_axis_mut(Axis(0), 0).mapv_inplace(|v| v * 40.0);

        let (na, _) = normalizer.normalize_magnitude(&a).unwrap();
        let (nb, _) = normalizer.normalize_magnitude(&b).unwrap();
        assert_eq!(na.index_axis(Axis(0), 1), nb.index_axis(Axis(0), 1));
    }

    #[test]
    fn test_phase_reattachment() {
        let normalizer = BatchNormalizer::new(1e-8, DegeneratePolicy::Floor, true);
        let x = Array4::from_shape_fn((2, 1, 6, 5), |(b, _, f, t)| {
            let mag = 0.1 + (b + 1) as f32 * (f as f32 + t as f32 * 0.5);
            Complex32::from_polar(mag, 0.4 * f as f32 - 0.7 * t as f32)
        });

        let normalized = normalizer.normalize(&x).unwrap();
        let phase = normalized.phase.as_ref().unwrap();
        let restored = normalizer
            .denormalize(&normalized.data, &normalized.envelopes, Some(phase))
            .unwrap();

        let restored = restored.as_complex().unwrap();
        for (a, b) in x.iter().zip(restored.iter()) {
            assert_relative_eq!(a.re, b.re, epsilon = 1e-4);
            assert_relative_eq!(a.im, b.im, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_magnitude_mode_drops_phase() {
        let normalizer = BatchNormalizer::new(1e-8, DegeneratePolicy::Floor, false);
        let x = Array4::from_elem((1, 1, 2, 2), Complex32::new(1.0, 1.0));
        assert!(normalizer.normalize(&x).unwrap().phase.is_none());
    }

    #[test]
    fn test_denormalize_shape_checks() {
        let normalizer = BatchNormalizer::default();
        let (data, envelopes) = normalizer.normalize_magnitude(&ramp(2, 1.0)).unwrap();

        assert!(normalizer.denormalize(&data, &envelopes[..1], None).is_err());

        let wrong_phase = Array4::<f32>::zeros((2, 1, 5, 3));
        assert!(matches!(
            normalizer.denormalize(&data, &envelopes, Some(&wrong_phase)),
            Err(SpectralError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_non_finite_is_malformed() {
        let normalizer = BatchNormalizer::default();
        let mut x = ramp(1, 1.0);
        x[[0, 0, 1, 1]] = f32::INFINITY;
        assert!(matches!(
            normalizer.normalize_magnitude(&x),
            Err(SpectralError::MalformedInput { .. })
        ));
    }
}
