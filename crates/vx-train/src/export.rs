//! Prediction export as `.npy`

use std::path::{Path, PathBuf};

use ndarray::{Array3, Array5};
use ndarray_npy::write_npy;
use vx_spectral::Spectrogram;

use crate::error::{TrainError, TrainResult};

/// Writes `<root>/<epoch>/pred_<batch>.npy`
#[derive(Debug, Clone)]
pub struct PredictionExporter {
    root: PathBuf,
}

impl PredictionExporter {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Directory receiving the predictions of `epoch`
    pub fn epoch_dir(&self, epoch: usize) -> PathBuf {
        self.root.join(epoch.to_string())
    }

    fn target(&self, epoch: usize, batch: usize, suffix: &str) -> TrainResult<PathBuf> {
        let dir = self.epoch_dir(epoch);
        std::fs::create_dir_all(&dir)
            .map_err(|e| TrainError::Export(format!("cannot create {}: {}", dir.display(), e)))?;
        Ok(dir.join(format!("pred_{}{}.npy", batch, suffix)))
    }

    /// Export a predicted spectrogram.
    ///
    /// Magnitude: `(batch, channels, bins, frames)`. Complex: same with a
    /// trailing `[re, im]` axis.
    pub fn export_spectrogram(
        &self,
        epoch: usize,
        batch: usize,
        spectrogram: &Spectrogram,
    ) -> TrainResult<PathBuf> {
        let path = self.target(epoch, batch, "")?;
        let written = match spectrogram {
            Spectrogram::Magnitude(mag) => write_npy(&path, mag),
            Spectrogram::Complex(spec) => {
                let (b, c, f, t) = spec.dim();
                let parts = Array5::from_shape_fn((b, c, f, t, 2), |(b, c, f, t, part)| {
                    let z = spec[[b, c, f, t]];
                    if part == 0 { z.re } else { z.im }
                });
                write_npy(&path, &parts)
            }
        };
        written.map_err(|e| TrainError::Export(format!("{}: {}", path.display(), e)))?;
        log::debug!("Exported {}", path.display());
        Ok(path)
    }

    /// Export reconstructed waveforms `(batch, channels, samples)`
    pub fn export_waveform(
        &self,
        epoch: usize,
        batch: usize,
        waveform: &Array3<f32>,
    ) -> TrainResult<PathBuf> {
        let path = self.target(epoch, batch, "_wave")?;
        write_npy(&path, waveform)
            .map_err(|e| TrainError::Export(format!("{}: {}", path.display(), e)))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array4, Array5};
    use ndarray_npy::read_npy;
    use num_complex::Complex32;

    #[test]
    fn test_magnitude_layout() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = PredictionExporter::new(dir.path());
        let mag = Array4::from_shape_fn((2, 1, 3, 4), |(b, _, f, t)| (b * 100 + f * 10 + t) as f32);

        let path = exporter
            .export_spectrogram(7, 3, &Spectrogram::Magnitude(mag.clone()))
            .unwrap();
        assert!(path.ends_with("7/pred_3.npy"));

        let back: Array4<f32> = read_npy(&path).unwrap();
        assert_eq!(back, mag);
    }

    #[test]
    fn test_complex_trailing_axis() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = PredictionExporter::new(dir.path());
        let spec = Array4::from_shape_fn((1, 1, 2, 2), |(_, _, f, t)| {
            Complex32::new(f as f32, -(t as f32))
        });

        let path = exporter
            .export_spectrogram(0, 0, &Spectrogram::Complex(spec))
            .unwrap();
        let back: Array5<f32> = read_npy(&path).unwrap();
        assert_eq!(back.dim(), (1, 1, 2, 2, 2));
        assert_eq!(back[[0, 0, 1, 1, 0]], 1.0);
        assert_eq!(back[[0, 0, 1, 1, 1]], -1.0);
    }

    #[test]
    fn test_waveform_export() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = PredictionExporter::new(dir.path());
        let wave = Array3::from_elem((1, 1, 16), 0.5f32);
        let path = exporter.export_waveform(2, 0, &wave).unwrap();
        assert!(path.ends_with("2/pred_0_wave.npy"));
        let back: Array3<f32> = read_npy(&path).unwrap();
        assert_eq!(back, wave);
    }
}
