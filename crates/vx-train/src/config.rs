//! Training configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vx_spectral::{sample_rates, SpectralConfig};

use crate::error::{TrainError, TrainResult};
use crate::scheduler::PlateauConfig;

/// Training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Initial learning rate
    pub learning_rate: f64,

    /// Items per batch
    pub batch_size: usize,

    /// Maximum number of epochs
    pub num_epochs: usize,

    /// Loader worker threads (0 = load on the training thread)
    pub num_workers: usize,

    /// Batches buffered ahead of the training thread
    pub prefetch: usize,

    /// Validations without improvement tolerated before stopping
    pub patience: usize,

    /// Global gradient norm clip (None = no clipping)
    pub max_grad_norm: Option<f32>,

    /// Base seed; epoch `e` shuffles with `seed + e`
    pub seed: u64,

    /// Dataset sample rate
    pub sample_rate: u32,

    /// Training segment length in samples
    pub segment_samples: usize,

    /// Drop batch items whose mixture envelope was floored
    pub exclude_degenerate: bool,

    /// Skipped batches tolerated per epoch before the run aborts
    pub max_skipped_batches: usize,

    /// Log progress every N batches
    pub log_interval: usize,

    /// Checkpoint directory
    pub checkpoint_dir: PathBuf,

    /// Prediction export root
    pub export_dir: PathBuf,

    /// Export validation predictions on improvement
    pub export_predictions: bool,

    /// Also export the phase-reconstructed waveforms (needs complex reconstruction)
    pub export_waveforms: bool,

    /// Learning-rate scheduler
    pub scheduler: PlateauConfig,

    /// Spectral pipeline
    pub spectral: SpectralConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-4,
            batch_size: 4,
            num_epochs: 20,
            num_workers: 4,
            prefetch: 4,
            patience: 5,
            max_grad_norm: Some(1.0),
            seed: 0,
            sample_rate: sample_rates::MUSDB,
            segment_samples: sample_rates::MUSDB as usize * 6,
            exclude_degenerate: true,
            max_skipped_batches: 16,
            log_interval: 10,
            checkpoint_dir: PathBuf::from("checkpoints"),
            export_dir: PathBuf::from("saved_spectrograms"),
            export_predictions: true,
            export_waveforms: false,
            scheduler: PlateauConfig::default(),
            spectral: SpectralConfig::default(),
        }
    }
}

impl TrainConfig {
    /// Small, fast configuration for smoke runs
    pub fn quick() -> Self {
        Self {
            batch_size: 2,
            num_epochs: 2,
            num_workers: 1,
            segment_samples: 44100,
            log_interval: 1,
            ..Default::default()
        }
    }

    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> TrainResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            TrainError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> TrainResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> TrainResult<()> {
        self.spectral.validate()?;

        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(TrainError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.batch_size == 0 {
            return Err(TrainError::Config("batch_size must be at least 1".into()));
        }
        if self.export_waveforms && !self.spectral.complex_reconstruction {
            return Err(TrainError::Config(
                "export_waveforms needs spectral.complex_reconstruction".into(),
            ));
        }
        if self.segment_samples < self.spectral.frame_size {
            return Err(TrainError::Config(format!(
                "segment_samples {} shorter than frame_size {}",
                self.segment_samples, self.spectral.frame_size
            )));
        }
        if let Some(norm) = self.max_grad_norm {
            if !(norm.is_finite() && norm > 0.0) {
                return Err(TrainError::Config(format!(
                    "max_grad_norm must be positive, got {}",
                    norm
                )));
            }
        }
        self.scheduler.validate()?;
        Ok(())
    }

    /// Segment duration in seconds
    pub fn segment_seconds(&self) -> f32 {
        self.segment_samples as f32 / self.sample_rate as f32
    }
}
