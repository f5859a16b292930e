//! # VoxSplit spectral core
//!
//! Time-frequency plumbing for vocal separation:
//! - Windowed transform pair (STFT / weighted overlap-add ISTFT)
//! - Per-item min/max batch normalization with phase reattachment
//! - Encode → normalize → model → denormalize → inverse pipeline
//!
//! The same [`SeparationPipeline`] is used for training, validation and
//! export, so all three agree on framing and scaling.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vx_spectral::{OnnxModel, SeparationPipeline, SpectralConfig};
//!
//! let pipeline = SeparationPipeline::new(SpectralConfig::default())?;
//! let model = OnnxModel::load("models/vocals.onnx")?;
//! let vocals = pipeline.separate(&model, mixture.view())?;
//! ```
//!
//! ## Concurrency
//!
//! Everything here is a pure function of its inputs. [`TransformPair`] and
//! [`BatchNormalizer`] are `Send + Sync` and may be shared across threads
//! working on independent batches; nothing in this crate spawns threads.

pub mod config;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod stft;

mod error;

pub use config::{DegeneratePolicy, EnvelopePolicy, SpectralConfig, WindowKind, DEFAULT_EPSILON};
pub use error::{SpectralError, SpectralResult};
pub use model::{IdentityModel, OnnxModel, SeparationModel};
pub use normalize::{BatchNormalizer, Envelope, Normalized, Spectrogram};
pub use pipeline::{stack_waveforms, Encoded, Prediction, SeparationPipeline};
pub use stft::{dominant_bin, TransformPair, WINDOW_SUM_FLOOR};

/// Sample rates commonly used for separation datasets
pub mod sample_rates {
    /// MUSDB18 sample rate
    pub const MUSDB: u32 = 44100;
}
