//! # VoxSplit training
//!
//! Orchestration around the spectral core:
//! - [`Dataset`] / [`DataLoader`]: MUSDB-style wav pairs, prefetched and
//!   reordered on a worker pool
//! - [`Trainer`]: train → validate → checkpoint → early-stop state machine
//! - [`CheckpointStore`] and [`PredictionExporter`] for persistence
//! - [`MaskNet`] (feature `candle`): trainable reference model
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vx_train::{Crop, MaskNet, MaskNetConfig, TrainConfig, Trainer, WavDataset};
//!
//! let config = TrainConfig::load("train.json")?;
//! let train = WavDataset::open("musdb", "train", config.segment_samples, config.sample_rate, Crop::Random)?;
//! let val = WavDataset::open("musdb", "test", config.segment_samples, config.sample_rate, Crop::Centre)?;
//! let model = MaskNet::new(MaskNetConfig::default())?;
//!
//! let mut trainer = Trainer::new(config, model, Arc::new(train), Arc::new(val))?;
//! let summary = trainer.run()?;
//! ```

pub mod accumulator;
pub mod audio;
pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod early_stop;
pub mod export;
pub mod loader;
#[cfg(feature = "candle")]
pub mod masknet;
pub mod model;
pub mod scheduler;
pub mod trainer;

mod error;

pub use accumulator::{mse, LossAccumulator};
pub use audio::{read_wav, write_wav, WavAudio};
pub use checkpoint::{Checkpoint, CheckpointStore, OptimizerState};
pub use config::TrainConfig;
pub use dataset::{Crop, Dataset, InMemoryDataset, Sample, WavDataset};
pub use early_stop::{EarlyStopping, Verdict};
pub use error::{TrainError, TrainResult};
pub use export::PredictionExporter;
pub use loader::{Batch, BatchIter, DataLoader, LoaderConfig};
#[cfg(feature = "candle")]
pub use masknet::{MaskNet, MaskNetConfig};
pub use model::TrainableModel;
pub use scheduler::{PlateauConfig, PlateauScheduler};
pub use trainer::{EpochReport, Phase, StopReason, Trainer, TrainingSummary};
