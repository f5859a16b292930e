//! Windowed transform pair (STFT / ISTFT)
//!
//! Forward: waveform `(channels, samples)` → one-sided complex spectrogram
//! `(channels, frame_size / 2 + 1, frames)`.
//! Inverse: weighted overlap-add, normalized by the summed squared window.
//!
//! ## Framing
//!
//! Frames are centered: the signal is zero-padded by `frame_size / 2` on the
//! left. The frame count is chosen so that the last input sample sits at most
//! half a hop past the centre of the last frame, and the right side is
//! zero-padded up to `(frames - 1) * hop + frame_size`. With that layout every
//! sample is covered by window coefficients well above zero whenever
//! `hop_size <= frame_size / 2`, and the inverse is an exact left inverse up
//! to rounding. For larger hops, samples falling where the squared-window sum
//! is below [`WINDOW_SUM_FLOOR`] are reconstructed as zero.

use std::sync::Arc;

use ndarray::{Array2, Array3, Array4, ArrayView2, ArrayView3, ArrayView4, Axis};
use num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use crate::config::WindowKind;
use crate::error::{SpectralError, SpectralResult};

/// Squared-window envelope below which overlap-add output is left at zero
pub const WINDOW_SUM_FLOOR: f32 = 1e-8;

/// Planned forward/inverse real FFT pair with a fixed framing
pub struct TransformPair {
    /// Frame size (FFT length)
    frame_size: usize,

    /// Hop between frame starts
    hop_size: usize,

    /// Window shape
    window_kind: WindowKind,

    /// Analysis and synthesis window
    window: Vec<f32>,

    /// Forward real FFT
    fft_forward: Arc<dyn RealToComplex<f32>>,

    /// Inverse real FFT
    fft_inverse: Arc<dyn ComplexToReal<f32>>,
}

impl std::fmt::Debug for TransformPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformPair")
            .field("frame_size", &self.frame_size)
            .field("hop_size", &self.hop_size)
            .field("window", &self.window_kind)
            .finish()
    }
}

impl TransformPair {
    /// Plan a transform pair
    pub fn new(frame_size: usize, hop_size: usize, window: WindowKind) -> SpectralResult<Self> {
        if frame_size < 2 || frame_size % 2 != 0 {
            return Err(SpectralError::InvalidConfig(format!(
                "frame_size must be even and >= 2, got {}",
                frame_size
            )));
        }
        if hop_size == 0 || hop_size > frame_size {
            return Err(SpectralError::InvalidConfig(format!(
                "hop_size must be in 1..={}, got {}",
                frame_size, hop_size
            )));
        }

        let mut planner = RealFftPlanner::<f32>::new();
        let fft_forward = planner.plan_fft_forward(frame_size);
        let fft_inverse = planner.plan_fft_inverse(frame_size);

        Ok(Self {
            frame_size,
            hop_size,
            window_kind: window,
            window: window.coefficients(frame_size),
            fft_forward,
            fft_inverse,
        })
    }

    /// Frame size
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Hop size
    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    /// Window coefficients
    pub fn window(&self) -> &[f32] {
        &self.window
    }

    /// One-sided bin count
    pub fn bin_count(&self) -> usize {
        self.frame_size / 2 + 1
    }

    /// Left padding applied before framing
    fn pad(&self) -> usize {
        self.frame_size / 2
    }

    /// Number of frames produced for a waveform of `len` samples
    pub fn frame_count(&self, len: usize) -> usize {
        let (n, hop) = (self.frame_size, self.hop_size);
        // Last sample no further than half a hop past the last frame's centre
        let centred = 1 + len.saturating_sub(1).saturating_sub(hop / 2).div_ceil(hop);
        // ...and inside the last frame at all
        let covered = 1 + (len + self.pad()).saturating_sub(n).div_ceil(hop);
        centred.max(covered)
    }

    /// Centre frequency of a bin in Hz
    pub fn bin_frequency(&self, bin: usize, sample_rate: u32) -> f32 {
        bin as f32 * sample_rate as f32 / self.frame_size as f32
    }

    /// Forward transform of one waveform `(channels, samples)`
    pub fn forward(&self, waveform: ArrayView2<f32>) -> SpectralResult<Array3<Complex32>> {
        let (channels, len) = waveform.dim();
        if channels == 0 {
            return Err(SpectralError::MalformedInput {
                reason: "waveform has no channels".into(),
            });
        }
        if len < self.frame_size {
            return Err(SpectralError::TooShort {
                needed: self.frame_size,
                got: len,
            });
        }
        if waveform.iter().any(|s| !s.is_finite()) {
            return Err(SpectralError::MalformedInput {
                reason: "waveform contains non-finite samples".into(),
            });
        }

        let n = self.frame_size;
        let pad = self.pad();
        let n_bins = self.bin_count();
        let n_frames = self.frame_count(len);

        let mut spectrum = Array3::<Complex32>::zeros((channels, n_bins, n_frames));
        let mut input_buffer = vec![0.0f32; n];
        let mut output_buffer = vec![Complex32::new(0.0, 0.0); n_bins];
        let mut scratch = vec![Complex32::new(0.0, 0.0); self.fft_forward.get_scratch_len()];

        for (ch, signal) in waveform.outer_iter().enumerate() {
            for frame_idx in 0..n_frames {
                let start = frame_idx * self.hop_size;

                // Window the frame, reading zeros outside the signal
                for (i, slot) in input_buffer.iter_mut().enumerate() {
                    let pos = start + i;
                    let sample = if pos >= pad && pos - pad < len {
                        signal[pos - pad]
                    } else {
                        0.0
                    };
                    *slot = sample * self.window[i];
                }

                self.fft_forward
                    .process_with_scratch(&mut input_buffer, &mut output_buffer, &mut scratch)
                    .map_err(|e| SpectralError::Fft(e.to_string()))?;

                for (bin, &val) in output_buffer.iter().enumerate() {
                    spectrum[[ch, bin, frame_idx]] = val;
                }
            }
        }

        Ok(spectrum)
    }

    /// Inverse transform of one spectrogram `(channels, bins, frames)`.
    ///
    /// `length` trims the output back to the original sample count; without
    /// it the output holds `(frames - 1) * hop` samples.
    pub fn inverse(
        &self,
        spectrum: ArrayView3<Complex32>,
        length: Option<usize>,
    ) -> SpectralResult<Array2<f32>> {
        let (channels, n_bins, n_frames) = spectrum.dim();
        let n = self.frame_size;
        let hop = self.hop_size;
        let pad = self.pad();

        if n_bins != self.bin_count() {
            return Err(SpectralError::ReconstructionMismatch {
                reason: format!(
                    "spectrogram has {} bins, frame size {} needs {}",
                    n_bins,
                    n,
                    self.bin_count()
                ),
            });
        }
        if n_frames == 0 {
            return Err(SpectralError::ReconstructionMismatch {
                reason: "spectrogram has no frames".into(),
            });
        }

        let length = match length {
            Some(len) => {
                let expected = self.frame_count(len);
                if expected != n_frames {
                    return Err(SpectralError::ReconstructionMismatch {
                        reason: format!(
                            "{} samples frame into {} frames at hop {}, spectrogram has {}",
                            len, expected, hop, n_frames
                        ),
                    });
                }
                len
            }
            None => (n_frames - 1) * hop,
        };

        let padded_len = (n_frames - 1) * hop + n;

        // Squared-window envelope is the same for every channel
        let mut window_sum = vec![0.0f32; padded_len];
        for frame_idx in 0..n_frames {
            let start = frame_idx * hop;
            for (i, &w) in self.window.iter().enumerate() {
                window_sum[start + i] += w * w;
            }
        }

        let mut output = Array2::<f32>::zeros((channels, length));
        let mut accum = vec![0.0f32; padded_len];
        let mut input_buffer = vec![Complex32::new(0.0, 0.0); n_bins];
        let mut output_buffer = vec![0.0f32; n];
        let mut scratch = vec![Complex32::new(0.0, 0.0); self.fft_inverse.get_scratch_len()];
        let norm = 1.0 / n as f32;

        for (ch, channel_spec) in spectrum.outer_iter().enumerate() {
            accum.fill(0.0);

            for frame_idx in 0..n_frames {
                for (bin, slot) in input_buffer.iter_mut().enumerate() {
                    *slot = channel_spec[[bin, frame_idx]];
                }
                // A real signal has purely real DC and Nyquist bins
                input_buffer[0].im = 0.0;
                input_buffer[n_bins - 1].im = 0.0;

                self.fft_inverse
                    .process_with_scratch(&mut input_buffer, &mut output_buffer, &mut scratch)
                    .map_err(|e| SpectralError::Fft(e.to_string()))?;

                let start = frame_idx * hop;
                for (i, &sample) in output_buffer.iter().enumerate() {
                    accum[start + i] += sample * norm * self.window[i];
                }
            }

            for (t, out) in output.row_mut(ch).iter_mut().enumerate() {
                let pos = t + pad;
                let sum = window_sum[pos];
                *out = if sum > WINDOW_SUM_FLOOR {
                    accum[pos] / sum
                } else {
                    0.0
                };
            }
        }

        Ok(output)
    }

    /// Forward transform of a batch `(batch, channels, samples)`
    pub fn forward_batch(&self, batch: ArrayView3<f32>) -> SpectralResult<Array4<Complex32>> {
        let (items, channels, len) = batch.dim();
        if items == 0 {
            return Err(SpectralError::MalformedInput {
                reason: "empty batch".into(),
            });
        }

        let mut out = Array4::<Complex32>::zeros((
            items,
            channels,
            self.bin_count(),
            self.frame_count(len),
        ));
        for (item, waveform) in batch.outer_iter().enumerate() {
            let spectrum = self.forward(waveform)?;
            out.index_axis_mut(Axis(0), item).assign(&spectrum);
        }
        Ok(out)
    }

    /// Inverse transform of a batch `(batch, channels, bins, frames)`
    pub fn inverse_batch(
        &self,
        batch: ArrayView4<Complex32>,
        length: Option<usize>,
    ) -> SpectralResult<Array3<f32>> {
        let items = batch.len_of(Axis(0));
        let mut rows = Vec::with_capacity(items);
        for spectrum in batch.outer_iter() {
            rows.push(self.inverse(spectrum, length)?);
        }

        let (channels, samples) = rows.first().map(|r| r.dim()).unwrap_or((0, 0));
        let mut out = Array3::<f32>::zeros((items, channels, samples));
        for (item, row) in rows.iter().enumerate() {
            out.index_axis_mut(Axis(0), item).assign(row);
        }
        Ok(out)
    }
}

/// Bin with the largest summed magnitude across frames for one channel
pub fn dominant_bin(spectrum: ArrayView3<Complex32>, channel: usize) -> Option<usize> {
    if channel >= spectrum.len_of(Axis(0)) {
        return None;
    }
    spectrum
        .index_axis(Axis(0), channel)
        .outer_iter()
        .map(|bin| bin.iter().map(|c| c.norm()).sum::<f32>())
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(bin, _)| bin)
}
