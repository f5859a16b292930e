//! Trainable model capability

use std::path::Path;

use ndarray::Array4;
use vx_spectral::SeparationModel;

use crate::error::TrainResult;

/// A separation model whose parameters can be optimized and persisted
///
/// Inputs and targets are normalized spectrograms shaped
/// `(batch, channels, bins, frames)`.
pub trait TrainableModel: SeparationModel {
    /// One optimizer step on `input` → `target`; returns the batch loss.
    /// Gradients are clipped to `max_grad_norm` (global L2 norm) when set.
    fn train_step(
        &mut self,
        input: &Array4<f32>,
        target: &Array4<f32>,
        max_grad_norm: Option<f32>,
    ) -> TrainResult<f64>;

    fn learning_rate(&self) -> f64;

    fn set_learning_rate(&mut self, lr: f64);

    /// Persist parameters
    fn save(&self, path: &Path) -> TrainResult<()>;

    /// Restore parameters saved by [`TrainableModel::save`]
    fn load(&mut self, path: &Path) -> TrainResult<()>;

    /// File extension of the parameter file
    fn weights_extension(&self) -> &str {
        "bin"
    }
}

impl<M: TrainableModel + ?Sized> TrainableModel for Box<M> {
    fn train_step(
        &mut self,
        input: &Array4<f32>,
        target: &Array4<f32>,
        max_grad_norm: Option<f32>,
    ) -> TrainResult<f64> {
        (**self).train_step(input, target, max_grad_norm)
    }

    fn learning_rate(&self) -> f64 {
        (**self).learning_rate()
    }

    fn set_learning_rate(&mut self, lr: f64) {
        (**self).set_learning_rate(lr)
    }

    fn save(&self, path: &Path) -> TrainResult<()> {
        (**self).save(path)
    }

    fn load(&mut self, path: &Path) -> TrainResult<()> {
        (**self).load(path)
    }

    fn weights_extension(&self) -> &str {
        (**self).weights_extension()
    }
}
