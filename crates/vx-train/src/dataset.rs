//! Mixture/vocal datasets
//!
//! A [`Dataset`] yields time-aligned `(channels, samples)` pairs. Items take a
//! seed so random crops are reproducible per epoch regardless of which loader
//! worker builds them.

use std::path::{Path, PathBuf};

use ndarray::{s, Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use vx_spectral::SpectralError;

use crate::audio::read_wav;
use crate::error::{TrainError, TrainResult};

/// One training example
#[derive(Debug, Clone)]
pub struct Sample {
    pub mixture: Array2<f32>,
    pub vocals: Array2<f32>,
}

/// Source of mixture/vocal pairs
pub trait Dataset: Send + Sync {
    /// Number of items
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load item `index`; `seed` drives any randomness (crop offset)
    fn item(&self, index: usize, seed: u64) -> TrainResult<Sample>;
}

/// How a fixed-length segment is cut from a track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crop {
    /// Random offset, seeded per item
    Random,
    /// Centre of the track
    Centre,
}

/// MUSDB18-style wav tree: `<root>/<split>/<track>/{mixture,vocals}.wav`
#[derive(Debug, Clone)]
pub struct WavDataset {
    tracks: Vec<PathBuf>,
    segment_samples: usize,
    sample_rate: u32,
    crop: Crop,
}

impl WavDataset {
    pub const MIXTURE_FILE: &'static str = "mixture.wav";
    pub const VOCALS_FILE: &'static str = "vocals.wav";

    /// Scan `<root>/<split>` for track directories holding both stems
    pub fn open<P: AsRef<Path>>(
        root: P,
        split: &str,
        segment_samples: usize,
        sample_rate: u32,
        crop: Crop,
    ) -> TrainResult<Self> {
        let dir = root.as_ref().join(split);
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| TrainError::Loader(format!("{}: {}", dir.display(), e)))?;

        let mut tracks = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            if path.join(Self::MIXTURE_FILE).is_file() && path.join(Self::VOCALS_FILE).is_file() {
                tracks.push(path);
            } else {
                log::warn!("Skipping {}: missing mixture or vocals stem", path.display());
            }
        }
        tracks.sort();

        if tracks.is_empty() {
            return Err(TrainError::Loader(format!(
                "no tracks found under {}",
                dir.display()
            )));
        }

        log::info!("{} split: {} tracks in {}", split, tracks.len(), dir.display());

        Ok(Self {
            tracks,
            segment_samples,
            sample_rate,
            crop,
        })
    }

    pub fn tracks(&self) -> &[PathBuf] {
        &self.tracks
    }

    fn load_stem(&self, path: &Path) -> TrainResult<Array2<f32>> {
        let audio = read_wav(path)?;
        if audio.sample_rate != self.sample_rate {
            return Err(TrainError::Loader(format!(
                "{}: sample rate {} Hz, expected {} Hz",
                path.display(),
                audio.sample_rate,
                self.sample_rate
            )));
        }
        Ok(audio.to_mono())
    }

    fn offset(&self, len: usize, index: usize, seed: u64) -> usize {
        let slack = len.saturating_sub(self.segment_samples);
        if slack == 0 {
            return 0;
        }
        match self.crop {
            Crop::Centre => slack / 2,
            Crop::Random => {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                rng.set_stream(index as u64);
                rng.random_range(0..=slack)
            }
        }
    }
}

impl Dataset for WavDataset {
    fn len(&self) -> usize {
        self.tracks.len()
    }

    fn item(&self, index: usize, seed: u64) -> TrainResult<Sample> {
        let track = self.tracks.get(index).ok_or_else(|| {
            TrainError::Loader(format!("track index {} out of range", index))
        })?;

        let mixture = self.load_stem(&track.join(Self::MIXTURE_FILE))?;
        let vocals = self.load_stem(&track.join(Self::VOCALS_FILE))?;
        if mixture.dim() != vocals.dim() {
            return Err(SpectralError::ShapeMismatch {
                expected: format!("vocals aligned with mixture {:?}", mixture.dim()),
                got: format!("{:?} in {}", vocals.dim(), track.display()),
            }
            .into());
        }

        let offset = self.offset(mixture.len_of(Axis(1)), index, seed);
        Ok(Sample {
            mixture: segment(&mixture, offset, self.segment_samples),
            vocals: segment(&vocals, offset, self.segment_samples),
        })
    }
}

/// Cut `len` samples starting at `offset`, zero-padding past the end
fn segment(audio: &Array2<f32>, offset: usize, len: usize) -> Array2<f32> {
    let mut out = Array2::<f32>::zeros((audio.nrows(), len));
    let available = audio.ncols().saturating_sub(offset).min(len);
    out.slice_mut(s![.., ..available])
        .assign(&audio.slice(s![.., offset..offset + available]));
    out
}

/// Dataset over pre-loaded pairs
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataset {
    samples: Vec<Sample>,
}

impl InMemoryDataset {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn push(&mut self, mixture: Array2<f32>, vocals: Array2<f32>) {
        self.samples.push(Sample { mixture, vocals });
    }
}

impl Dataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn item(&self, index: usize, _seed: u64) -> TrainResult<Sample> {
        self.samples
            .get(index)
            .cloned()
            .ok_or_else(|| TrainError::Loader(format!("item {} out of range", index)))
    }
}
