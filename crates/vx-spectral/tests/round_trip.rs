//! Spectral Core Integration Tests
//!
//! Verifies:
//! - Transform pair reconstruction across framings and amplitudes
//! - The 440 Hz / 2 s reference scenario end to end
//! - Normalization round-trip, range bound and batch independence

use approx::assert_relative_eq;
use ndarray::{Array2, Array3, Array4, Axis};
use num_complex::Complex32;
use vx_spectral::{
    dominant_bin, BatchNormalizer, DegeneratePolicy, IdentityModel, SeparationPipeline,
    SpectralConfig, Spectrogram, TransformPair, WindowKind,
};

const SAMPLE_RATE: u32 = 44100;

/// Generate test sine wave
fn generate_sine(samples: usize, freq: f32, amp: f32) -> Array2<f32> {
    Array2::from_shape_fn((1, samples), |(_, i)| {
        amp * (2.0 * std::f32::consts::PI * freq * i as f32 / SAMPLE_RATE as f32).sin()
    })
}

/// Generate white noise
fn generate_noise(samples: usize, seed: u64) -> Array2<f32> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    Array2::from_shape_fn((1, samples), |(_, i)| {
        let mut hasher = DefaultHasher::new();
        (seed, i).hash(&mut hasher);
        let h = hasher.finish();
        (h as f64 / u64::MAX as f64 * 2.0 - 1.0) as f32
    })
}

/// Max absolute error relative to the signal peak
fn relative_error(reference: &Array2<f32>, estimate: &Array2<f32>) -> f32 {
    let peak = reference.iter().fold(0.0f32, |m, &v| m.max(v.abs()));
    let err = reference
        .iter()
        .zip(estimate.iter())
        .fold(0.0f32, |m, (a, b)| m.max((a - b).abs()));
    err / peak
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSFORM PAIR
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_round_trip_identity_across_amplitudes() {
    let pair = TransformPair::new(1024, 512, WindowKind::Hann).unwrap();
    let noise = generate_noise(20_000, 7);

    for amp in [1e-3f32, 1.0, 250.0] {
        let wave = noise.mapv(|v| v * amp);
        let spec = pair.forward(wave.view()).unwrap();
        let back = pair.inverse(spec.view(), Some(wave.len_of(Axis(1)))).unwrap();
        let err = relative_error(&wave, &back);
        assert!(err < 1e-5, "amp {}: relative error {}", amp, err);
    }
}

#[test]
fn test_round_trip_lengths_not_multiple_of_hop() {
    let pair = TransformPair::new(512, 256, WindowKind::Hann).unwrap();
    for len in [512usize, 513, 767, 1000, 4097, 6143] {
        let wave = generate_noise(len, len as u64);
        let spec = pair.forward(wave.view()).unwrap();
        let back = pair.inverse(spec.view(), Some(len)).unwrap();
        assert_eq!(back.len_of(Axis(1)), len);
        let err = relative_error(&wave, &back);
        assert!(err < 1e-5, "len {}: relative error {}", len, err);
    }
}

#[test]
fn test_round_trip_symmetric_window() {
    let pair = TransformPair::new(1024, 512, WindowKind::HannSymmetric).unwrap();
    let wave = generate_noise(10_000, 3);
    let spec = pair.forward(wave.view()).unwrap();
    let back = pair.inverse(spec.view(), Some(10_000)).unwrap();
    assert!(relative_error(&wave, &back) < 1e-5);
}

#[test]
fn test_round_trip_quarter_hop() {
    let pair = TransformPair::new(1024, 256, WindowKind::Hann).unwrap();
    let wave = generate_sine(9000, 3000.0, 0.8);
    let spec = pair.forward(wave.view()).unwrap();
    let back = pair.inverse(spec.view(), Some(9000)).unwrap();
    assert!(relative_error(&wave, &back) < 1e-5);
}

// ═══════════════════════════════════════════════════════════════════════════════
// REFERENCE SCENARIO: 2 s of 440 Hz at 44.1 kHz, 1024 / 512
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_reference_tone_shape_and_peak() {
    let pair = TransformPair::new(1024, 512, WindowKind::Hann).unwrap();
    let wave = generate_sine(88_200, 440.0, 0.5);
    let spec = pair.forward(wave.view()).unwrap();

    assert_eq!(spec.dim(), (1, 513, 173));

    let bin = dominant_bin(spec.view(), 0).unwrap();
    let bin_width = SAMPLE_RATE as f32 / 1024.0;
    assert!((pair.bin_frequency(bin, SAMPLE_RATE) - 440.0).abs() <= bin_width);
}

#[test]
fn test_reference_tone_full_pipeline() {
    let pipeline = SeparationPipeline::new(SpectralConfig::default()).unwrap();
    let wave = generate_sine(88_200, 440.0, 0.5);
    let batch = wave.clone().insert_axis(Axis(0));

    let encoded = pipeline.encode(batch.view()).unwrap();
    assert_eq!(encoded.normalized.dim(), (1, 1, 513, 173));
    assert!(encoded.normalized.iter().all(|&v| (0.0..=1.0).contains(&v)));

    let rebuilt = pipeline.separate(&IdentityModel, batch.view()).unwrap();
    let rebuilt = rebuilt.index_axis(Axis(0), 0).to_owned();
    assert!(relative_error(&wave, &rebuilt) < 1e-5);
}

// ═══════════════════════════════════════════════════════════════════════════════
// NORMALIZATION
// ═══════════════════════════════════════════════════════════════════════════════

fn spectrum_batch() -> Array4<Complex32> {
    let pair = TransformPair::new(512, 256, WindowKind::Hann).unwrap();
    let quiet = generate_sine(4000, 880.0, 0.01);
    let loud = generate_noise(4000, 11).mapv(|v| v * 3.0);
    let batch = Array3::from_shape_fn((2, 1, 4000), |(b, _, i)| {
        if b == 0 { quiet[[0, i]] } else { loud[[0, i]] }
    });
    pair.forward_batch(batch.view()).unwrap()
}

#[test]
fn test_normalization_round_trip_and_range() {
    let normalizer = BatchNormalizer::new(1e-8, DegeneratePolicy::Floor, false);
    let magnitude = spectrum_batch().mapv(|z| z.norm());

    let (normalized, envelopes) = normalizer.normalize_magnitude(&magnitude).unwrap();
    assert!(normalized.iter().all(|&v| (0.0..=1.0).contains(&v)));
    assert!(envelopes.iter().all(|e| !e.degenerate));

    let Spectrogram::Magnitude(restored) =
        normalizer.denormalize(&normalized, &envelopes, None).unwrap()
    else {
        panic!("expected magnitude output");
    };
    for (item, env) in envelopes.iter().enumerate() {
        let original = magnitude.index_axis(Axis(0), item);
        let back = restored.index_axis(Axis(0), item);
        for (a, b) in original.iter().zip(back.iter()) {
            // a couple of rounding steps at the item's own scale
            assert!((a - b).abs() <= 4.0 * f32::EPSILON * env.max, "{} vs {}", a, b);
        }
    }
}

#[test]
fn test_phase_reattachment_from_spectrum() {
    let normalizer = BatchNormalizer::new(1e-8, DegeneratePolicy::Floor, true);
    let spectrum = spectrum_batch();

    let normalized = normalizer.normalize(&spectrum).unwrap();
    let restored = normalizer
        .denormalize(
            &normalized.data,
            &normalized.envelopes,
            normalized.phase.as_ref(),
        )
        .unwrap();
    let restored = restored.as_complex().unwrap();

    for (item, env) in normalized.envelopes.iter().enumerate() {
        let tol = 1e-5 * env.max.max(1e-3);
        let original = spectrum.index_axis(Axis(0), item);
        let back = restored.index_axis(Axis(0), item);
        for (a, b) in original.iter().zip(back.iter()) {
            assert_relative_eq!(a.re, b.re, epsilon = tol);
            assert_relative_eq!(a.im, b.im, epsilon = tol);
        }
    }
}

#[test]
fn test_batch_independence_of_scaling() {
    let normalizer = BatchNormalizer::default();
    let spectrum = spectrum_batch();
    let a = normalizer.normalize(&spectrum).unwrap();

    let mut louder = spectrum.clone();
    louder
        .index_axis_mut(Axis(0), 0)
        .mapv_inplace(|z| z * 100.0);
    let b = normalizer.normalize(&louder).unwrap();

    assert_eq!(a.data.index_axis(Axis(0), 1), b.data.index_axis(Axis(0), 1));
    assert_eq!(a.envelopes[1], b.envelopes[1]);
    assert!(b.envelopes[0].max > a.envelopes[0].max * 50.0);
}

#[test]
fn test_silent_and_constant_batches() {
    let pipeline = SeparationPipeline::new(SpectralConfig::default()).unwrap();
    let silent = Array3::<f32>::zeros((1, 1, 4096));

    let encoded = pipeline.encode(silent.view()).unwrap();
    assert!(encoded.has_degenerate());
    assert!(encoded.normalized.iter().all(|v| v.is_finite()));

    let rebuilt = pipeline.separate(&IdentityModel, silent.view()).unwrap();
    assert!(rebuilt.iter().all(|&v| v == 0.0));

    let normalizer = BatchNormalizer::default();
    let constant = Array4::from_elem((2, 1, 8, 8), 0.75f32);
    let (data, envelopes) = normalizer.normalize_magnitude(&constant).unwrap();
    assert!(data.iter().all(|v| v.is_finite()));
    assert!(envelopes.iter().all(|e| e.degenerate));
}

#[test]
fn test_reject_policy_surfaces_degenerate_item() {
    let config = SpectralConfig {
        degenerate: DegeneratePolicy::Reject,
        ..Default::default()
    };
    let pipeline = SeparationPipeline::new(config).unwrap();
    let silent = Array3::<f32>::zeros((1, 1, 4096));

    let err = pipeline.encode(silent.view()).unwrap_err();
    assert!(err.is_batch_local());
}
