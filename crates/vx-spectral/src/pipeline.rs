//! Encode → normalize → model → denormalize → (inverse) pipeline
//!
//! Shared by training, validation and export so that all three see exactly
//! the same transform and scaling. Performs no I/O and never mutates the
//! model.

use ndarray::{Array2, Array3, Array4, ArrayView3, Axis};

use crate::config::{EnvelopePolicy, SpectralConfig};
use crate::error::{SpectralError, SpectralResult};
use crate::model::SeparationModel;
use crate::normalize::{BatchNormalizer, Envelope, Spectrogram};
use crate::stft::TransformPair;

/// A waveform batch after forward transform and normalization
#[derive(Debug, Clone)]
pub struct Encoded {
    /// Normalized magnitude `(batch, channels, bins, frames)`
    pub normalized: Array4<f32>,
    /// Per-item envelopes
    pub envelopes: Vec<Envelope>,
    /// Source phase (complex reconstruction only)
    pub phase: Option<Array4<f32>>,
    /// Original waveform length in samples
    pub length: usize,
}

impl Encoded {
    /// Batch size
    pub fn batch_size(&self) -> usize {
        self.normalized.len_of(Axis(0))
    }

    /// Whether any item had its envelope floored
    pub fn has_degenerate(&self) -> bool {
        self.envelopes.iter().any(|e| e.degenerate)
    }
}

/// Model output after denormalization
#[derive(Debug, Clone)]
pub struct Prediction {
    /// Raw model output, still in normalized space
    pub normalized: Array4<f32>,
    /// Denormalized spectrogram, complex when phase was reattached
    pub spectrogram: Spectrogram,
    /// Waveform length the prediction corresponds to
    pub length: usize,
}

/// Separation pipeline
#[derive(Debug)]
pub struct SeparationPipeline {
    config: SpectralConfig,
    transform: TransformPair,
    normalizer: BatchNormalizer,
}

impl SeparationPipeline {
    /// Create pipeline
    pub fn new(config: SpectralConfig) -> SpectralResult<Self> {
        config.validate()?;
        let transform = TransformPair::new(config.frame_size, config.hop_size, config.window)?;
        let normalizer = BatchNormalizer::from_config(&config);

        log::debug!(
            "Separation pipeline: frame {} hop {} window {:?} complex {} envelope {:?}",
            config.frame_size,
            config.hop_size,
            config.window,
            config.complex_reconstruction,
            config.envelope
        );

        Ok(Self {
            config,
            transform,
            normalizer,
        })
    }

    /// Configuration
    pub fn config(&self) -> &SpectralConfig {
        &self.config
    }

    /// Transform pair
    pub fn transform(&self) -> &TransformPair {
        &self.transform
    }

    /// Normalizer
    pub fn normalizer(&self) -> &BatchNormalizer {
        &self.normalizer
    }

    /// Forward-transform and normalize a waveform batch `(batch, channels, samples)`
    pub fn encode(&self, batch: ArrayView3<f32>) -> SpectralResult<Encoded> {
        let length = batch.len_of(Axis(2));
        let spectrum = self.transform.forward_batch(batch)?;
        let normalized = self.normalizer.normalize(&spectrum)?;

        Ok(Encoded {
            normalized: normalized.data,
            envelopes: normalized.envelopes,
            phase: normalized.phase,
            length,
        })
    }

    /// Encode a time-aligned mixture/vocal batch pair
    pub fn encode_pair(
        &self,
        mixture: ArrayView3<f32>,
        vocals: ArrayView3<f32>,
    ) -> SpectralResult<(Encoded, Encoded)> {
        if mixture.shape() != vocals.shape() {
            return Err(SpectralError::shape(
                format!("vocals shaped like mixture {:?}", mixture.shape()),
                vocals.shape(),
            ));
        }
        Ok((self.encode(mixture)?, self.encode(vocals)?))
    }

    /// Feed an encoded batch to the model and check the output shape
    pub fn run_model<M: SeparationModel + ?Sized>(
        &self,
        model: &M,
        encoded: &Encoded,
    ) -> SpectralResult<Array4<f32>> {
        let output = model.infer(&encoded.normalized)?;
        if output.shape() != encoded.normalized.shape() {
            return Err(SpectralError::ModelShapeMismatch {
                expected: format!("{:?}", encoded.normalized.shape()),
                got: format!("{:?}", output.shape()),
            });
        }
        Ok(output)
    }

    /// Denormalize model output. The envelope comes from `mixture` or, under
    /// [`EnvelopePolicy::Target`], from `target`; phase always comes from the
    /// mixture.
    pub fn denormalize(
        &self,
        output: &Array4<f32>,
        mixture: &Encoded,
        target: Option<&Encoded>,
    ) -> SpectralResult<Spectrogram> {
        let envelopes = match (self.config.envelope, target) {
            (EnvelopePolicy::Mixture, _) => &mixture.envelopes,
            (EnvelopePolicy::Target, Some(target)) => &target.envelopes,
            (EnvelopePolicy::Target, None) => {
                return Err(SpectralError::InvalidConfig(
                    "target envelope policy needs the vocal target".into(),
                ));
            }
        };
        self.normalizer
            .denormalize(output, envelopes, mixture.phase.as_ref())
    }

    /// Run the model on an already encoded mixture
    pub fn predict_encoded<M: SeparationModel + ?Sized>(
        &self,
        model: &M,
        mixture: &Encoded,
        target: Option<&Encoded>,
    ) -> SpectralResult<Prediction> {
        let output = self.run_model(model, mixture)?;
        let spectrogram = self.denormalize(&output, mixture, target)?;
        Ok(Prediction {
            normalized: output,
            spectrogram,
            length: mixture.length,
        })
    }

    /// Predict the vocal spectrogram of a mixture batch
    pub fn predict<M: SeparationModel + ?Sized>(
        &self,
        model: &M,
        mixture: ArrayView3<f32>,
    ) -> SpectralResult<Prediction> {
        let encoded = self.encode(mixture)?;
        self.predict_encoded(model, &encoded, None)
    }

    /// Predict with the vocal target at hand (validation / export)
    pub fn predict_with_target<M: SeparationModel + ?Sized>(
        &self,
        model: &M,
        mixture: ArrayView3<f32>,
        vocals: ArrayView3<f32>,
    ) -> SpectralResult<(Prediction, Encoded)> {
        let (mixture, target) = self.encode_pair(mixture, vocals)?;
        let prediction = self.predict_encoded(model, &mixture, Some(&target))?;
        Ok((prediction, target))
    }

    /// Inverse-transform a complex prediction back to waveforms
    pub fn reconstruct(&self, prediction: &Prediction) -> SpectralResult<Array3<f32>> {
        let complex = prediction.spectrogram.as_complex().ok_or_else(|| {
            SpectralError::ReconstructionMismatch {
                reason: "waveform reconstruction needs phase; enable complex_reconstruction".into(),
            }
        })?;
        self.transform
            .inverse_batch(complex.view(), Some(prediction.length))
    }

    /// Predict and reconstruct in one call
    pub fn separate<M: SeparationModel + ?Sized>(
        &self,
        model: &M,
        mixture: ArrayView3<f32>,
    ) -> SpectralResult<Array3<f32>> {
        let prediction = self.predict(model, mixture)?;
        self.reconstruct(&prediction)
    }
}

/// Stack equally shaped `(channels, samples)` waveforms into a batch
pub fn stack_waveforms(items: &[Array2<f32>]) -> SpectralResult<Array3<f32>> {
    let first = items.first().ok_or_else(|| SpectralError::MalformedInput {
        reason: "empty batch".into(),
    })?;
    let (channels, samples) = first.dim();

    let mut batch = Array3::<f32>::zeros((items.len(), channels, samples));
    for (idx, item) in items.iter().enumerate() {
        if item.dim() != (channels, samples) {
            return Err(SpectralError::ShapeMismatch {
                expected: format!("batch item shaped {:?}", (channels, samples)),
                got: format!("item {} shaped {:?}", idx, item.dim()),
            });
        }
        batch.index_axis_mut(Axis(0), idx).assign(item);
    }
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IdentityModel;

    struct HalfModel;

    impl SeparationModel for HalfModel {
        fn infer(&self, input: &Array4<f32>) -> SpectralResult<Array4<f32>> {
            Ok(input.mapv(|v| v * 0.5))
        }

        fn name(&self) -> &str {
            "half"
        }
    }

    struct CroppingModel;

    impl SeparationModel for CroppingModel {
        fn infer(&self, input: &Array4<f32>) -> SpectralResult<Array4<f32>> {
            let (b, c, f, t) = input.dim();
            Ok(Array4::zeros((b, c, f - 1, t)))
        }

        fn name(&self) -> &str {
            "crop"
        }
    }

    fn tone(batch: usize, len: usize, amp: f32) -> Array3<f32> {
        Array3::from_shape_fn((batch, 1, len), |(b, _, i)| {
            amp * (b as f32 + 1.0) * (i as f32 * 0.07).sin()
        })
    }

    fn small_config() -> SpectralConfig {
        SpectralConfig::default().with_framing(256, 128)
    }

    #[test]
    fn test_encode_shapes() {
        let pipeline = SeparationPipeline::new(small_config()).unwrap();
        let encoded = pipeline.encode(tone(2, 2000, 0.5).view()).unwrap();
        let frames = pipeline.transform().frame_count(2000);

        assert_eq!(encoded.normalized.dim(), (2, 1, 129, frames));
        assert_eq!(encoded.envelopes.len(), 2);
        assert_eq!(encoded.length, 2000);
        assert!(encoded.phase.is_some());
        assert!(!encoded.has_degenerate());
    }

    #[test]
    fn test_identity_separation_reproduces_mixture() {
        let pipeline = SeparationPipeline::new(small_config()).unwrap();
        let mixture = tone(2, 3000, 0.3);
        let out = pipeline.separate(&IdentityModel, mixture.view()).unwrap();

        assert_eq!(out.dim(), mixture.dim());
        for (a, b) in mixture.iter().zip(out.iter()) {
            assert!((a - b).abs() < 1e-4, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_mismatched_pair() {
        let pipeline = SeparationPipeline::new(small_config()).unwrap();
        let result = pipeline.encode_pair(tone(2, 2000, 1.0).view(), tone(2, 1900, 1.0).view());
        assert!(matches!(result, Err(SpectralError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_model_shape_mismatch() {
        let pipeline = SeparationPipeline::new(small_config()).unwrap();
        let result = pipeline.predict(&CroppingModel, tone(1, 2000, 1.0).view());
        assert!(matches!(result, Err(SpectralError::ModelShapeMismatch { .. })));
    }

    #[test]
    fn test_envelope_policies() {
        let mixture = tone(1, 2000, 1.0);
        let vocals = tone(1, 2000, 0.01);

        let shared = SeparationPipeline::new(small_config()).unwrap();
        let (pred_shared, _) = shared
            .predict_with_target(&HalfModel, mixture.view(), vocals.view())
            .unwrap();

        let own = SeparationPipeline::new(small_config().with_envelope(EnvelopePolicy::Target))
            .unwrap();
        let (pred_own, target) = own
            .predict_with_target(&HalfModel, mixture.view(), vocals.view())
            .unwrap();

        let max_shared = pred_shared.spectrogram.magnitude().fold(0.0f32, |m, &v| m.max(v));
        let max_own = pred_own.spectrogram.magnitude().fold(0.0f32, |m, &v| m.max(v));
        assert!(max_own < max_shared);
        assert!(max_own <= target.envelopes[0].max);

        // Target policy cannot run without a target
        assert!(matches!(
            own.predict(&HalfModel, mixture.view()),
            Err(SpectralError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_magnitude_only_cannot_reconstruct() {
        let pipeline = SeparationPipeline::new(SpectralConfig::magnitude_only().with_framing(256, 128))
            .unwrap();
        let prediction = pipeline.predict(&IdentityModel, tone(1, 1000, 1.0).view()).unwrap();
        assert!(!prediction.spectrogram.is_complex());
        assert!(matches!(
            pipeline.reconstruct(&prediction),
            Err(SpectralError::ReconstructionMismatch { .. })
        ));
    }

    #[test]
    fn test_stack_waveforms() {
        let a = Array2::<f32>::zeros((1, 100));
        let b = Array2::<f32>::ones((1, 100));
        let batch = stack_waveforms(&[a.clone(), b]).unwrap();
        assert_eq!(batch.dim(), (2, 1, 100));

        let c = Array2::<f32>::zeros((1, 99));
        assert!(matches!(
            stack_waveforms(&[a, c]),
            Err(SpectralError::ShapeMismatch { .. })
        ));
        assert!(stack_waveforms(&[]).is_err());
    }
}
